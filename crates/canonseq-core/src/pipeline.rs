//! End-to-end gene processing: resolve, list transcripts, select.

use crate::cache::{self, CacheBackend, CacheConfig, SqliteCache};
use crate::config::{CacheTtl, Settings};
use crate::error::{CanonError, Result};
use crate::models::{GeneIdentity, SelectionResult, TranscriptCandidate};
use crate::network::{HttpClient, RateLimiters};
use crate::resolver::IdentityResolver;
use crate::selector::CanonicalSelector;
use crate::sources::{
    CanonicalReference, EUtils, GeneAuthority, NcbiGeneClient, NcbiTranscriptCatalog,
    ProteinAuthority, TranscriptCatalog, UniProtClient,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Everything known about one processed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneReport {
    pub query: String,
    pub identity: GeneIdentity,
    pub selection: SelectionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_preference: Option<String>,
}

/// Split a batch entry into a gene query and an optional preferred accession.
///
/// Entries are either `GENE` or `GENE<TAB>ACCESSION` (a comma also separates).
pub fn split_entry(entry: &str) -> (&str, Option<&str>) {
    match entry.split_once(['\t', ',']) {
        Some((query, preference)) => {
            let preference = preference.trim();
            (query.trim(), (!preference.is_empty()).then_some(preference))
        }
        None => (entry.trim(), None),
    }
}

/// Builder for [`GenePipeline`].
///
/// Anything not injected explicitly is built from [`Settings`] on
/// [`build`](Self::build).
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = GenePipeline::builder(Settings::default())
///     .with_gene_authority(Arc::new(my_authority))
///     .without_cache()
///     .build()?;
/// ```
pub struct PipelineBuilder {
    settings: Settings,
    genes: Option<Arc<dyn GeneAuthority>>,
    proteins: Option<Arc<dyn ProteinAuthority>>,
    canonical: Option<Arc<dyn CanonicalReference>>,
    catalog: Option<Arc<dyn TranscriptCatalog>>,
    cache: Option<Arc<dyn CacheBackend>>,
    limiters: Option<Arc<RateLimiters>>,
    disable_protein_fallback: bool,
    disable_cache: bool,
}

impl PipelineBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            genes: None,
            proteins: None,
            canonical: None,
            catalog: None,
            cache: None,
            limiters: None,
            disable_protein_fallback: false,
            disable_cache: false,
        }
    }

    pub fn with_gene_authority(mut self, genes: Arc<dyn GeneAuthority>) -> Self {
        self.genes = Some(genes);
        self
    }

    pub fn with_protein_authority(mut self, proteins: Arc<dyn ProteinAuthority>) -> Self {
        self.proteins = Some(proteins);
        self
    }

    /// Resolve with authority A only.
    pub fn without_protein_fallback(mut self) -> Self {
        self.disable_protein_fallback = true;
        self
    }

    pub fn with_canonical_reference(mut self, canonical: Arc<dyn CanonicalReference>) -> Self {
        self.canonical = Some(canonical);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn TranscriptCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Skip the result cache entirely, even if one is configured.
    pub fn without_cache(mut self) -> Self {
        self.disable_cache = true;
        self
    }

    pub fn with_rate_limiters(mut self, limiters: Arc<RateLimiters>) -> Self {
        self.limiters = Some(limiters);
        self
    }

    pub fn build(self) -> Result<GenePipeline> {
        let settings = self.settings;
        settings.validate()?;

        let limiters = match self.limiters {
            Some(limiters) => limiters,
            None => Arc::new(RateLimiters::from_settings(&settings.rate_limits)?),
        };

        let cache: Option<Arc<dyn CacheBackend>> = if self.disable_cache {
            None
        } else if let Some(cache) = self.cache {
            Some(cache)
        } else if settings.cache.enabled {
            let config = CacheConfig {
                max_size_bytes: settings.cache.max_size_bytes,
                namespace_ttls: settings.cache.namespace_ttls(),
                ..CacheConfig::default()
            };
            let cache = SqliteCache::open_or_in_memory(settings.cache.database_path(), config)?;
            Some(Arc::new(cache))
        } else {
            None
        };

        // HTTP adapters are only built when at least one source was not injected.
        let needs_http = self.genes.is_none()
            || self.catalog.is_none()
            || (self.proteins.is_none() && !self.disable_protein_fallback)
            || (self.canonical.is_none() && settings.selection.enable_external_canonical);
        let (eutils, uniprot) = if needs_http {
            let http = HttpClient::from_settings(&settings.api)?;
            let eutils = EUtils::new(http.clone(), limiters.clone(), &settings.api);
            let uniprot = UniProtClient::new(http, limiters.clone(), &settings.api);
            (Some(eutils), Some(uniprot))
        } else {
            (None, None)
        };

        let genes = match (self.genes, &eutils) {
            (Some(genes), _) => genes,
            (None, Some(eutils)) => Arc::new(NcbiGeneClient::new(eutils.clone())),
            (None, None) => return Err(missing("gene authority")),
        };
        let catalog = match (self.catalog, &eutils) {
            (Some(catalog), _) => catalog,
            (None, Some(eutils)) => Arc::new(NcbiTranscriptCatalog::new(eutils.clone())),
            (None, None) => return Err(missing("transcript catalog")),
        };

        let proteins: Option<Arc<dyn ProteinAuthority>> = if self.disable_protein_fallback {
            None
        } else {
            self.proteins.or_else(|| {
                uniprot
                    .clone()
                    .map(|client| Arc::new(client) as Arc<dyn ProteinAuthority>)
            })
        };
        let canonical: Option<Arc<dyn CanonicalReference>> =
            if settings.selection.enable_external_canonical {
                self.canonical.or_else(|| {
                    uniprot.map(|client| Arc::new(client) as Arc<dyn CanonicalReference>)
                })
            } else {
                None
            };

        let mut resolver =
            IdentityResolver::new(genes).with_settings(settings.resolver.clone());
        if let Some(proteins) = proteins {
            resolver = resolver.with_protein_authority(proteins);
        }

        let mut selector = CanonicalSelector::new(settings.selection.clone());
        if let Some(canonical) = canonical {
            selector = selector.with_canonical_reference(canonical);
        }

        if let Some(cache) = &cache {
            resolver = resolver.with_cache(cache.clone());
            selector = selector.with_cache(cache.clone());
        }

        Ok(GenePipeline {
            resolver,
            selector,
            catalog,
            cache,
            limiters,
            settings,
        })
    }
}

fn missing(what: &str) -> CanonError {
    CanonError::Config {
        message: format!("No {} configured", what),
    }
}

/// Resolves gene names and selects their canonical transcripts.
pub struct GenePipeline {
    resolver: IdentityResolver,
    selector: CanonicalSelector,
    catalog: Arc<dyn TranscriptCatalog>,
    cache: Option<Arc<dyn CacheBackend>>,
    limiters: Arc<RateLimiters>,
    settings: Settings,
}

impl GenePipeline {
    pub fn builder(settings: Settings) -> PipelineBuilder {
        PipelineBuilder::new(settings)
    }

    /// Build with HTTP adapters for every source.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        PipelineBuilder::new(settings).build()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> Option<&Arc<dyn CacheBackend>> {
        self.cache.as_ref()
    }

    pub fn rate_limiters(&self) -> &Arc<RateLimiters> {
        &self.limiters
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Resolve `query` without selecting a transcript.
    pub async fn resolve(&self, query: &str) -> Result<GeneIdentity> {
        self.resolver
            .resolve(query)
            .await
            .into_result(format!("gene {:?}", query))
    }

    pub async fn process(&self, query: &str) -> Result<GeneReport> {
        self.process_with_preference(query, None).await
    }

    /// Process a batch entry (see [`split_entry`]).
    pub async fn process_entry(&self, entry: &str) -> Result<GeneReport> {
        let (query, preference) = split_entry(entry);
        self.process_with_preference(query, preference).await
    }

    pub async fn process_with_preference(
        &self,
        query: &str,
        user_preference: Option<&str>,
    ) -> Result<GeneReport> {
        let identity = self.resolve(query).await?;
        let transcripts = self.transcripts(&identity).await?;
        if transcripts.is_empty() {
            return Err(CanonError::not_found(format!(
                "transcripts for {} (GeneID {})",
                identity.official_symbol, identity.stable_id
            )));
        }

        let selection = self
            .selector
            .select(&transcripts, &identity, user_preference)
            .await
            .into_result(format!("canonical transcript for {}", identity.official_symbol))?;

        info!(
            "{} -> {} ({}, {:.2})",
            identity.official_symbol,
            selection.transcript.full_accession(),
            selection.method,
            selection.confidence
        );

        Ok(GeneReport {
            query: query.to_string(),
            identity,
            selection,
            user_preference: user_preference.map(str::to_string),
        })
    }

    /// Transcript list for `identity`, cached by stable id.
    ///
    /// Empty lists are not cached so newly annotated genes are picked up.
    pub async fn transcripts(&self, identity: &GeneIdentity) -> Result<Vec<TranscriptCandidate>> {
        let namespace = CacheTtl::TRANSCRIPTS_NAMESPACE;
        let key = identity.stable_id.as_str();
        if let Some(cache) = &self.cache {
            if let Some(transcripts) = cache::get_json(cache.as_ref(), namespace, key) {
                debug!("Cache hit {}:{}", namespace, key);
                return Ok(transcripts);
            }
        }

        let transcripts = self.catalog.list_transcripts(identity).await?;

        if let Some(cache) = &self.cache {
            if !transcripts.is_empty() {
                cache::set_json(cache.as_ref(), namespace, key, &transcripts, None);
            }
        }
        Ok(transcripts)
    }
}
