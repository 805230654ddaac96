//! Gene identity resolution across two authorities.
//!
//! Authority A (NCBI Gene) is always asked first. Authority B (UniProtKB) is
//! only consulted when A's best candidate scores below the fallback threshold,
//! and the two answers are then arbitrated by confidence.

use crate::cache::{self, CacheBackend};
use crate::config::{CacheTtl, ResolverSettings};
use crate::error::{Lookup, Result};
use crate::models::{Authority, GeneIdentity};
use crate::sources::{GeneAuthority, GeneRecord, ProteinAuthority, ProteinRecord};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runner-up score above which the chosen candidate gets a disambiguation note.
const DISAMBIGUATION_SCORE: f64 = 0.7;

/// Trim and collapse internal whitespace.
pub fn clean_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Secondary search term: the cleaned query without `_`, `-` or spaces.
pub fn normalize(query: &str) -> String {
    clean_query(query)
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .collect()
}

/// Confidence that an authority A record is what `query` names.
pub fn score_gene(query: &str, record: &GeneRecord) -> f64 {
    let query = query.to_lowercase();
    let symbol = record.symbol.to_lowercase();

    if symbol == query {
        1.0
    } else if record.aliases.iter().any(|a| a.to_lowercase() == query) {
        0.9
    } else if record.description.to_lowercase().contains(&query) {
        0.7
    } else if symbol.contains(&query) {
        0.6
    } else {
        0.5
    }
}

/// Confidence that an authority B record is what `query` names.
pub fn score_protein(query: &str, record: &ProteinRecord) -> f64 {
    let query = query.to_lowercase();
    let primary = record.primary_name.to_lowercase();

    if primary == query {
        0.95
    } else if record.synonyms.iter().any(|s| s.to_lowercase() == query) {
        0.85
    } else if primary.contains(&query) {
        0.7
    } else {
        0.5
    }
}

/// Index of the highest score; the earliest wins ties.
fn best_index(scores: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, score) in scores.iter().enumerate() {
        match best {
            Some(b) if scores[b] >= *score => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Resolves free-text gene names to gene identities.
pub struct IdentityResolver {
    genes: Arc<dyn GeneAuthority>,
    proteins: Option<Arc<dyn ProteinAuthority>>,
    cache: Option<Arc<dyn CacheBackend>>,
    settings: ResolverSettings,
}

impl IdentityResolver {
    pub fn new(genes: Arc<dyn GeneAuthority>) -> Self {
        Self {
            genes,
            proteins: None,
            cache: None,
            settings: ResolverSettings::default(),
        }
    }

    pub fn with_protein_authority(mut self, proteins: Arc<dyn ProteinAuthority>) -> Self {
        self.proteins = Some(proteins);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_settings(mut self, settings: ResolverSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Resolve `query` to a gene identity.
    ///
    /// Authority failures count as "no candidates from that source", so this
    /// returns `NotFound` rather than `Unavailable` when both sources fail.
    pub async fn resolve(&self, query: &str) -> Lookup<GeneIdentity> {
        let cleaned = clean_query(query);
        if cleaned.is_empty() {
            return Lookup::NotFound;
        }

        let from_a = self.resolve_via_genes(&cleaned).await;
        if let Some(identity) = &from_a {
            if identity.confidence >= self.settings.protein_fallback_threshold {
                info!(
                    "Resolved {:?} -> {} via {} ({:.2})",
                    cleaned, identity.official_symbol, identity.source, identity.confidence
                );
                return Lookup::Found(identity.clone());
            }
        }

        let from_b = self.resolve_via_proteins(&cleaned).await;

        let chosen = match (from_a, from_b) {
            (Some(a), Some(b)) if b.confidence > a.confidence => b,
            (Some(mut a), Some(b)) => {
                if !a.official_symbol.eq_ignore_ascii_case(&b.official_symbol) {
                    let note = format!("{} suggests {}", Authority::UniProt, b.official_symbol);
                    a.disambiguation = Some(match a.disambiguation.take() {
                        Some(existing) => format!("{}; {}", existing, note),
                        None => note,
                    });
                }
                a
            }
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => {
                warn!("No gene found for {:?}", cleaned);
                return Lookup::NotFound;
            }
        };

        info!(
            "Resolved {:?} -> {} via {} ({:.2})",
            cleaned, chosen.official_symbol, chosen.source, chosen.confidence
        );
        Lookup::Found(chosen)
    }

    async fn resolve_via_genes(&self, query: &str) -> Option<GeneIdentity> {
        let normalized = normalize(query);
        let mut terms = vec![query.to_string()];
        if !normalized.is_empty() && normalized != query {
            terms.push(normalized);
        }

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for term in &terms {
            match self.gene_records(term).await {
                Ok(records) => candidates.extend(
                    records
                        .into_iter()
                        .filter(|r| seen.insert(r.gene_id.clone())),
                ),
                Err(e) => warn!("{} lookup for {:?} failed: {}", Authority::NcbiGene, term, e),
            }
        }

        let scores: Vec<f64> = candidates.iter().map(|c| score_gene(query, c)).collect();
        let best = best_index(&scores)?;

        let runner_up = (0..candidates.len())
            .filter(|&i| i != best)
            .max_by(|&x, &y| scores[x].total_cmp(&scores[y]).then(y.cmp(&x)));
        let disambiguation = runner_up
            .filter(|&i| scores[i] > DISAMBIGUATION_SCORE)
            .map(|i| {
                format!(
                    "Selected over {} based on confidence score",
                    candidates[i].symbol
                )
            });

        let record = candidates.swap_remove(best);
        debug!(
            "{} best match for {:?}: {} ({:.2})",
            Authority::NcbiGene,
            query,
            record.symbol,
            scores[best]
        );

        Some(GeneIdentity {
            input_name: query.to_string(),
            official_symbol: record.symbol,
            stable_id: record.gene_id,
            description: record.description,
            aliases: record.aliases,
            confidence: scores[best],
            source: Authority::NcbiGene,
            disambiguation,
        })
    }

    async fn resolve_via_proteins(&self, query: &str) -> Option<GeneIdentity> {
        let proteins = self.proteins.as_ref()?;
        let records = match self.protein_records(proteins.as_ref(), query).await {
            Ok(records) => records,
            Err(e) => {
                warn!("{} lookup for {:?} failed: {}", Authority::UniProt, query, e);
                return None;
            }
        };

        let mut candidates: Vec<ProteinRecord> = records
            .into_iter()
            .filter(|r| !r.gene_ids.is_empty())
            .collect();
        let scores: Vec<f64> = candidates.iter().map(|c| score_protein(query, c)).collect();
        let best = best_index(&scores)?;
        let record = candidates.swap_remove(best);

        Some(GeneIdentity {
            input_name: query.to_string(),
            official_symbol: record.primary_name,
            stable_id: record.gene_ids[0].clone(),
            description: record.protein_name,
            aliases: record.synonyms,
            confidence: scores[best],
            source: Authority::UniProt,
            disambiguation: None,
        })
    }

    async fn gene_records(&self, term: &str) -> Result<Vec<GeneRecord>> {
        let namespace = CacheTtl::NCBI_GENE_NAMESPACE;
        if let Some(cache) = &self.cache {
            if let Some(records) = cache::get_json(cache.as_ref(), namespace, term) {
                debug!("Cache hit {}:{}", namespace, term);
                return Ok(records);
            }
        }

        let ids = self.genes.search(term).await?;
        let records = self.genes.fetch_details(&ids).await?;

        if let Some(cache) = &self.cache {
            cache::set_json(cache.as_ref(), namespace, term, &records, None);
        }
        Ok(records)
    }

    async fn protein_records(
        &self,
        proteins: &dyn ProteinAuthority,
        term: &str,
    ) -> Result<Vec<ProteinRecord>> {
        let namespace = CacheTtl::UNIPROT_NAMESPACE;
        if let Some(cache) = &self.cache {
            if let Some(records) = cache::get_json(cache.as_ref(), namespace, term) {
                debug!("Cache hit {}:{}", namespace, term);
                return Ok(records);
            }
        }

        let records = proteins.search(term).await?;

        if let Some(cache) = &self.cache {
            cache::set_json(cache.as_ref(), namespace, term, &records, None);
        }
        Ok(records)
    }
}
