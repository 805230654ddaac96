//! External data sources.
//!
//! The resolver and selector only see the traits below. The HTTP adapters parse
//! every response into typed records at this boundary; nothing downstream
//! touches raw JSON or FASTA.

mod catalog;
mod ncbi;
mod uniprot;

pub use catalog::{parse_cds_fasta, NcbiTranscriptCatalog};
pub use ncbi::{parse_esearch, parse_gene_summaries, EUtils, NcbiGeneClient};
pub use uniprot::{canonical_refseq, parse_uniprot_search, UniProtClient};

use crate::error::Result;
use crate::models::{GeneIdentity, TranscriptCandidate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A gene record from authority A.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneRecord {
    /// NCBI Gene ID.
    pub gene_id: String,
    pub symbol: String,
    pub description: String,
    pub aliases: Vec<String>,
}

/// A RefSeq cross-reference on a protein record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefSeqXref {
    /// RefSeq protein accession, e.g. `NP_000537.3`.
    pub protein: String,
    /// RefSeq nucleotide accession, e.g. `NM_000546.6`.
    pub nucleotide: Option<String>,
    /// UniProt isoform the cross-reference belongs to, e.g. `P04637-1`.
    pub isoform: Option<String>,
}

/// A reviewed protein record from authority B.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProteinRecord {
    pub accession: String,
    pub primary_name: String,
    pub synonyms: Vec<String>,
    pub protein_name: String,
    /// NCBI Gene IDs this entry cross-references.
    pub gene_ids: Vec<String>,
    /// Empty unless RefSeq cross-references were requested.
    pub refseq: Vec<RefSeqXref>,
}

/// Authority A: the primary gene nomenclature source.
#[async_trait]
pub trait GeneAuthority: Send + Sync {
    /// Gene IDs matching `term`, best first.
    async fn search(&self, term: &str) -> Result<Vec<String>>;

    /// Records for `ids`, in the order given. Unknown ids are skipped.
    async fn fetch_details(&self, ids: &[String]) -> Result<Vec<GeneRecord>>;
}

/// Authority B: the secondary (protein-centric) source.
#[async_trait]
pub trait ProteinAuthority: Send + Sync {
    async fn search(&self, term: &str) -> Result<Vec<ProteinRecord>>;

    async fn fetch_details(&self, accessions: &[String]) -> Result<Vec<ProteinRecord>>;
}

/// Source of an externally curated canonical transcript for a gene.
#[async_trait]
pub trait CanonicalReference: Send + Sync {
    /// Accession (possibly versioned) of the canonical transcript, if known.
    async fn canonical_transcript(&self, identity: &GeneIdentity) -> Result<Option<String>>;
}

/// Catalog of candidate transcripts for a resolved gene.
#[async_trait]
pub trait TranscriptCatalog: Send + Sync {
    async fn list_transcripts(&self, identity: &GeneIdentity) -> Result<Vec<TranscriptCandidate>>;
}
