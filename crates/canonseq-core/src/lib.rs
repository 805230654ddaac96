//! canonseq - gene name resolution and canonical transcript selection.
//!
//! Free-text gene names are resolved to authoritative identities (NCBI Gene,
//! with UniProtKB as a fallback), one canonical transcript is chosen per gene
//! from its RefSeq candidates, and external lookups are cached in SQLite.
//! Large query lists run through a checkpointed, rate-limited batch harness.
//!
//! # Example
//!
//! ```rust,ignore
//! use canonseq::{GenePipeline, Settings};
//!
//! #[tokio::main]
//! async fn main() -> canonseq::Result<()> {
//!     let pipeline = GenePipeline::from_settings(Settings::default())?;
//!
//!     let report = pipeline.process("VEGF").await?;
//!     println!(
//!         "{} -> {} ({})",
//!         report.identity.official_symbol,
//!         report.selection.transcript.full_accession(),
//!         report.selection.method
//!     );
//!
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod models;
pub mod network;
pub mod resolver;
pub mod selector;
pub mod sources;
pub mod storage;

mod pipeline;

// Re-export commonly used types
pub use batch::{BatchCheckpoint, BatchOutcome, BatchRunner, CheckpointStore, CheckpointSummary};
pub use cache::{CacheBackend, CacheConfig, CacheEntry, CacheMeta, CacheStats, SqliteCache};
pub use cancel::CancellationToken;
pub use config::Settings;
pub use error::{CanonError, Lookup, Result};
pub use models::{
    Authority, GeneIdentity, SelectionMethod, SelectionResult, TranscriptCandidate,
};
pub use network::{HttpClient, RateLimiters, RetryConfig};
pub use pipeline::{split_entry, GenePipeline, GeneReport, PipelineBuilder};
pub use resolver::IdentityResolver;
pub use selector::CanonicalSelector;
pub use sources::{
    CanonicalReference, GeneAuthority, GeneRecord, ProteinAuthority, ProteinRecord,
    TranscriptCatalog,
};
