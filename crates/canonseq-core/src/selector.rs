//! Canonical transcript selection.
//!
//! The first rule that matches wins:
//!
//! 1. user override (1.0)
//! 2. RefSeq Select flag (0.95)
//! 3. external canonical reference (0.9)
//! 4. longest CDS (0.8), or the most recent version among equal lengths (0.7)
//! 5. unique most recent version when longest-CDS preference is off (0.6)
//! 6. first candidate (0.5)

use crate::cache::{self, CacheBackend};
use crate::config::{CacheTtl, SelectionSettings};
use crate::error::Lookup;
use crate::models::{GeneIdentity, SelectionMethod, SelectionResult, TranscriptCandidate};
use crate::sources::CanonicalReference;
use std::sync::Arc;
use tracing::{debug, warn};

const USER_OVERRIDE_CONFIDENCE: f64 = 1.0;
const CURATED_SELECT_CONFIDENCE: f64 = 0.95;
const EXTERNAL_CANONICAL_CONFIDENCE: f64 = 0.9;
const LONGEST_SEQUENCE_CONFIDENCE: f64 = 0.8;
const LENGTH_TIE_CONFIDENCE: f64 = 0.7;
const MOST_RECENT_CONFIDENCE: f64 = 0.6;
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Picks one canonical transcript from a candidate list.
pub struct CanonicalSelector {
    settings: SelectionSettings,
    canonical: Option<Arc<dyn CanonicalReference>>,
    cache: Option<Arc<dyn CacheBackend>>,
}

impl Default for CanonicalSelector {
    fn default() -> Self {
        Self::new(SelectionSettings::default())
    }
}

impl CanonicalSelector {
    pub fn new(settings: SelectionSettings) -> Self {
        Self {
            settings,
            canonical: None,
            cache: None,
        }
    }

    pub fn with_canonical_reference(mut self, canonical: Arc<dyn CanonicalReference>) -> Self {
        self.canonical = Some(canonical);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Select the canonical transcript for `identity`.
    ///
    /// Returns `NotFound` only for an empty candidate list.
    pub async fn select(
        &self,
        candidates: &[TranscriptCandidate],
        identity: &GeneIdentity,
        user_preference: Option<&str>,
    ) -> Lookup<SelectionResult> {
        if candidates.is_empty() {
            return Lookup::NotFound;
        }

        let mut warnings = Vec::new();
        let result = |candidate: &TranscriptCandidate,
                      method: SelectionMethod,
                      confidence: f64,
                      rationale: String,
                      warnings: Vec<String>| {
            debug!(
                "Selected {} for {} via {}",
                candidate.full_accession(),
                identity.official_symbol,
                method
            );
            Lookup::Found(SelectionResult {
                transcript: candidate.clone(),
                method,
                confidence,
                rationale,
                warnings,
                alternatives_count: candidates.len() - 1,
            })
        };

        if let Some(preference) = user_preference.map(str::trim).filter(|p| !p.is_empty()) {
            match candidates.iter().find(|c| c.matches_accession(preference)) {
                Some(candidate) => {
                    return result(
                        candidate,
                        SelectionMethod::UserOverride,
                        USER_OVERRIDE_CONFIDENCE,
                        format!("User requested {}", preference),
                        warnings,
                    );
                }
                None => warnings.push(format!("User preference {} not found", preference)),
            }
        }

        if let Some(candidate) = candidates.iter().find(|c| c.is_refseq_select) {
            return result(
                candidate,
                SelectionMethod::CuratedSelect,
                CURATED_SELECT_CONFIDENCE,
                format!("{} is the RefSeq Select transcript", candidate.full_accession()),
                warnings,
            );
        }

        if let Some(accession) = self.external_canonical(identity).await {
            match candidates.iter().find(|c| c.matches_accession(&accession)) {
                Some(candidate) => {
                    return result(
                        candidate,
                        SelectionMethod::ExternalCanonical,
                        EXTERNAL_CANONICAL_CONFIDENCE,
                        format!("UniProt canonical isoform maps to {}", accession),
                        warnings,
                    );
                }
                None => warnings.push(format!(
                    "UniProt canonical transcript {} not among candidates",
                    accession
                )),
            }
        }

        if self.settings.prefer_longest_cds {
            let longest = candidates.iter().map(|c| c.cds_length).max().unwrap_or(0);
            let tied: Vec<&TranscriptCandidate> = candidates
                .iter()
                .filter(|c| c.cds_length == longest)
                .collect();

            if let [only] = tied.as_slice() {
                return result(
                    *only,
                    SelectionMethod::LongestSequence,
                    LONGEST_SEQUENCE_CONFIDENCE,
                    format!("Longest CDS ({} bp)", longest),
                    warnings,
                );
            }

            if let Some(newest) = most_recent(tied.iter().copied()) {
                warnings.push(format!("{} transcripts with equal CDS length", tied.len()));
                return result(
                    newest,
                    SelectionMethod::MostRecentVersion,
                    LENGTH_TIE_CONFIDENCE,
                    format!(
                        "Longest CDS ({} bp) shared; chose highest version {}",
                        longest,
                        newest.full_accession()
                    ),
                    warnings,
                );
            }
        } else if let Some(newest) = most_recent(candidates.iter()) {
            let unique = candidates
                .iter()
                .filter(|c| c.version == newest.version)
                .count()
                == 1;
            if unique {
                warnings.push("No strong selection signal; chose most recent version".to_string());
                return result(
                    newest,
                    SelectionMethod::MostRecentVersion,
                    MOST_RECENT_CONFIDENCE,
                    format!("Highest version {}", newest.full_accession()),
                    warnings,
                );
            }
        }

        warnings.push("No selection criteria met; using first available transcript".to_string());
        result(
            &candidates[0],
            SelectionMethod::Default,
            DEFAULT_CONFIDENCE,
            format!("First candidate {}", candidates[0].full_accession()),
            warnings,
        )
    }

    /// Canonical accession from the external reference, if enabled and known.
    ///
    /// An unavailable reference is logged and treated as "no answer".
    async fn external_canonical(&self, identity: &GeneIdentity) -> Option<String> {
        if !self.settings.enable_external_canonical {
            return None;
        }
        let canonical = self.canonical.as_ref()?;

        let namespace = CacheTtl::CANONICAL_NAMESPACE;
        let key = identity.stable_id.as_str();
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache::get_json::<Option<String>>(cache.as_ref(), namespace, key) {
                return cached;
            }
        }

        match Lookup::from(canonical.canonical_transcript(identity).await) {
            Lookup::Found(accession) => {
                self.remember_canonical(key, &Some(accession.clone()));
                Some(accession)
            }
            Lookup::NotFound => {
                self.remember_canonical(key, &None);
                None
            }
            Lookup::Unavailable { reason } => {
                warn!(
                    "Canonical reference lookup for {} unavailable: {}",
                    identity.official_symbol, reason
                );
                None
            }
        }
    }

    /// Only definite answers are cached; an unavailable source is asked again next time.
    fn remember_canonical(&self, key: &str, accession: &Option<String>) {
        if let Some(cache) = &self.cache {
            cache::set_json(cache.as_ref(), CacheTtl::CANONICAL_NAMESPACE, key, accession, None);
        }
    }
}

/// Highest version; the first in iteration order wins ties.
fn most_recent<'a>(
    candidates: impl Iterator<Item = &'a TranscriptCandidate>,
) -> Option<&'a TranscriptCandidate> {
    candidates.fold(None, |best, candidate| match best {
        Some(b) if b.version >= candidate.version => Some(b),
        _ => Some(candidate),
    })
}
