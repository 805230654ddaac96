//! Centralized configuration for canonseq.
//!
//! Fixed constants live on the unit structs below. Everything a user can tune
//! is on [`Settings`], which is read from a JSON document and then overlaid
//! with environment variables.

use crate::error::{CanonError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Network-related constants.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const MAX_RETRIES: u32 = 3;
    pub const USER_AGENT: &'static str = concat!("canonseq/", env!("CARGO_PKG_VERSION"));
    pub const NCBI_EUTILS_BASE: &'static str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
    pub const UNIPROT_REST_BASE: &'static str = "https://rest.uniprot.org/uniprotkb";
    pub const NCBI_SEARCH_RETMAX: u32 = 20;
    pub const NCBI_TRANSCRIPT_RETMAX: u32 = 100;
    pub const UNIPROT_SEARCH_SIZE: u32 = 10;
    /// NCBI allows 3 req/s anonymously and 10 req/s with an API key.
    pub const NCBI_RATE_LIMIT: f64 = 3.0;
    pub const NCBI_RATE_LIMIT_WITH_KEY: f64 = 10.0;
    pub const UNIPROT_RATE_LIMIT: f64 = 10.0;
    pub const HUMAN_TAXON_ID: u32 = 9606;
}

/// Rate-limited service names.
pub struct Services;

impl Services {
    pub const NCBI: &'static str = "ncbi";
    pub const UNIPROT: &'static str = "uniprot";
    /// Bucket consulted once per batch item before dispatch.
    pub const BATCH: &'static str = "batch";
}

/// Cache namespaces and their lifetimes.
///
/// Identity records outlive transcript lists because transcript annotation
/// changes more often than gene nomenclature.
pub struct CacheTtl;

impl CacheTtl {
    pub const NCBI_GENE_NAMESPACE: &'static str = "ncbi_gene";
    pub const UNIPROT_NAMESPACE: &'static str = "uniprot";
    pub const CANONICAL_NAMESPACE: &'static str = "uniprot_canonical";
    pub const TRANSCRIPTS_NAMESPACE: &'static str = "transcripts";
    pub const IDENTITY: Duration = Duration::from_secs(30 * 24 * 3600);
    pub const TRANSCRIPTS: Duration = Duration::from_secs(7 * 24 * 3600);
}

/// Shared directory and file names.
pub struct PathsConfig;

impl PathsConfig {
    pub const DATA_DIR_NAME: &'static str = "canonseq";
    pub const CACHE_DB_FILENAME: &'static str = "cache.sqlite";
    pub const CHECKPOINT_DIR_NAME: &'static str = "checkpoints";
    pub const CHECKPOINT_SUFFIX: &'static str = "_checkpoint.json";
    pub const SETTINGS_FILENAME: &'static str = "config.json";
}

/// Cache section of [`Settings`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub directory: PathBuf,
    pub max_size_bytes: u64,
    pub identity_ttl_days: u64,
    pub transcript_ttl_days: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_data_dir(),
            max_size_bytes: 500 * 1024 * 1024,
            identity_ttl_days: CacheTtl::IDENTITY.as_secs() / 86_400,
            transcript_ttl_days: CacheTtl::TRANSCRIPTS.as_secs() / 86_400,
        }
    }
}

impl CacheSettings {
    pub fn database_path(&self) -> PathBuf {
        self.directory.join(PathsConfig::CACHE_DB_FILENAME)
    }

    /// Per-namespace TTLs derived from the day counts.
    pub fn namespace_ttls(&self) -> BTreeMap<String, Duration> {
        let identity = Duration::from_secs(self.identity_ttl_days * 86_400);
        let transcripts = Duration::from_secs(self.transcript_ttl_days * 86_400);
        BTreeMap::from([
            (CacheTtl::NCBI_GENE_NAMESPACE.to_string(), identity),
            (CacheTtl::UNIPROT_NAMESPACE.to_string(), identity),
            (CacheTtl::CANONICAL_NAMESPACE.to_string(), identity),
            (CacheTtl::TRANSCRIPTS_NAMESPACE.to_string(), transcripts),
        ])
    }
}

/// API credentials and transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub ncbi_api_key: Option<String>,
    pub email: Option<String>,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    pub ncbi_base_url: String,
    pub uniprot_base_url: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            ncbi_api_key: None,
            email: None,
            timeout_seconds: NetworkConfig::REQUEST_TIMEOUT.as_secs(),
            retry_attempts: NetworkConfig::MAX_RETRIES,
            ncbi_base_url: NetworkConfig::NCBI_EUTILS_BASE.to_string(),
            uniprot_base_url: NetworkConfig::UNIPROT_REST_BASE.to_string(),
        }
    }
}

/// Token bucket parameters for one service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub requests_per_second: f64,
    /// Bucket capacity. Defaults to twice the rate, at least 1.
    pub burst: Option<u32>,
}

impl RateLimitSettings {
    pub fn new(requests_per_second: f64) -> Self {
        Self {
            requests_per_second,
            burst: None,
        }
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = Some(burst);
        self
    }

    pub fn effective_burst(&self) -> u32 {
        self.burst
            .unwrap_or_else(|| (self.requests_per_second * 2.0) as u32)
            .max(1)
    }
}

/// Identity resolver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    /// Authority A confidence at or above which Authority B is skipped.
    pub protein_fallback_threshold: f64,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            protein_fallback_threshold: 0.8,
        }
    }
}

/// Canonical selector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionSettings {
    pub prefer_longest_cds: bool,
    pub enable_external_canonical: bool,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            prefer_longest_cds: true,
            enable_external_canonical: true,
        }
    }
}

/// Batch harness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub concurrency: usize,
    pub checkpoint_interval: usize,
    pub enable_checkpoints: bool,
    pub checkpoint_dir: PathBuf,
    pub checkpoint_retention_days: u64,
    /// Cap on items dispatched per second. Unset means items are only paced
    /// by the per-service buckets.
    pub items_per_second: Option<f64>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            checkpoint_interval: 10,
            enable_checkpoints: true,
            checkpoint_dir: default_data_dir().join(PathsConfig::CHECKPOINT_DIR_NAME),
            checkpoint_retention_days: 7,
            items_per_second: None,
        }
    }
}

impl BatchSettings {
    pub const MAX_CONCURRENCY: usize = 256;

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.checkpoint_retention_days * 86_400)
    }
}

/// User-tunable configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache: CacheSettings,
    pub api: ApiSettings,
    pub rate_limits: BTreeMap<String, RateLimitSettings>,
    pub resolver: ResolverSettings,
    pub selection: SelectionSettings,
    pub batch: BatchSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            api: ApiSettings::default(),
            rate_limits: BTreeMap::from([
                (
                    Services::NCBI.to_string(),
                    RateLimitSettings::new(NetworkConfig::NCBI_RATE_LIMIT),
                ),
                (
                    Services::UNIPROT.to_string(),
                    RateLimitSettings::new(NetworkConfig::UNIPROT_RATE_LIMIT),
                ),
            ]),
            resolver: ResolverSettings::default(),
            selection: SelectionSettings::default(),
            batch: BatchSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, or defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents =
            std::fs::read_to_string(path).map_err(|e| CanonError::io_with_path(e, path))?;
        let mut settings: Settings = serde_json::from_str(&contents).map_err(|e| {
            CanonError::Config {
                message: format!("Invalid settings file {}: {}", path.display(), e),
            }
        })?;
        settings.apply_api_key_rate();
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        crate::storage::atomic_write_json(path, self)
    }

    /// Overlay `CANONSEQ_*` environment variables.
    pub fn merge_env(&mut self) -> Result<()> {
        self.merge_vars(|name| std::env::var(name).ok())
    }

    fn merge_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(key) = var("CANONSEQ_NCBI_API_KEY").filter(|k| !k.is_empty()) {
            self.api.ncbi_api_key = Some(key);
            self.apply_api_key_rate();
        }
        if let Some(email) = var("CANONSEQ_EMAIL").filter(|e| !e.is_empty()) {
            self.api.email = Some(email);
        }
        if let Some(dir) = var("CANONSEQ_CACHE_DIR").filter(|d| !d.is_empty()) {
            self.cache.directory = PathBuf::from(dir);
        }
        if var("CANONSEQ_NO_CACHE").is_some() {
            self.cache.enabled = false;
        }
        if let Some(rate) = var("CANONSEQ_NCBI_RATE_LIMIT") {
            let rate: f64 = rate.parse().map_err(|_| CanonError::Config {
                message: format!("CANONSEQ_NCBI_RATE_LIMIT is not a number: {}", rate),
            })?;
            self.rate_limits
                .insert(Services::NCBI.to_string(), RateLimitSettings::new(rate));
        }
        self.validate()
    }

    /// An API key raises NCBI's allowance unless a custom rate was configured.
    fn apply_api_key_rate(&mut self) {
        if self.api.ncbi_api_key.is_none() {
            return;
        }
        let entry = self
            .rate_limits
            .entry(Services::NCBI.to_string())
            .or_insert_with(|| RateLimitSettings::new(NetworkConfig::NCBI_RATE_LIMIT));
        if entry.requests_per_second == NetworkConfig::NCBI_RATE_LIMIT {
            *entry = RateLimitSettings::new(NetworkConfig::NCBI_RATE_LIMIT_WITH_KEY);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.resolver.protein_fallback_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(CanonError::Validation {
                field: "resolver.protein_fallback_threshold".into(),
                message: format!("must be within [0, 1], got {}", threshold),
            });
        }
        if !(1..=BatchSettings::MAX_CONCURRENCY).contains(&self.batch.concurrency) {
            return Err(CanonError::Validation {
                field: "batch.concurrency".into(),
                message: format!(
                    "must be within [1, {}], got {}",
                    BatchSettings::MAX_CONCURRENCY,
                    self.batch.concurrency
                ),
            });
        }
        if let Some(rate) = self.batch.items_per_second {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(CanonError::Validation {
                    field: "batch.items_per_second".into(),
                    message: "must be positive".into(),
                });
            }
        }
        if self.batch.checkpoint_interval == 0 {
            return Err(CanonError::Validation {
                field: "batch.checkpoint_interval".into(),
                message: "must be at least 1".into(),
            });
        }
        for (service, limit) in &self.rate_limits {
            if !(limit.requests_per_second > 0.0) {
                return Err(CanonError::Validation {
                    field: format!("rate_limits.{}", service),
                    message: "requests_per_second must be positive".into(),
                });
            }
        }
        Ok(())
    }
}

/// Default data directory: the platform cache dir, or `./.canonseq`.
pub fn default_data_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join(PathsConfig::DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".canonseq"))
}

/// Default location of the settings file.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join(PathsConfig::DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".canonseq"))
        .join(PathsConfig::SETTINGS_FILENAME)
}
