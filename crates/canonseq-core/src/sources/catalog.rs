//! RefSeq transcript catalog backed by NCBI nuccore.

use super::{EUtils, TranscriptCatalog};
use crate::config::NetworkConfig;
use crate::error::Result;
use crate::models::{GeneIdentity, TranscriptCandidate};
use async_trait::async_trait;
use bio::io::fasta;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// Lists RefSeq mRNA transcripts for a gene with their coding sequences.
#[derive(Debug, Clone)]
pub struct NcbiTranscriptCatalog {
    eutils: EUtils,
}

impl NcbiTranscriptCatalog {
    pub fn new(eutils: EUtils) -> Self {
        Self { eutils }
    }

    fn transcript_term(gene_id: &str) -> String {
        format!("{}[Gene ID] AND refseq[filter] AND mRNA[filter]", gene_id)
    }
}

#[async_trait]
impl TranscriptCatalog for NcbiTranscriptCatalog {
    async fn list_transcripts(&self, identity: &GeneIdentity) -> Result<Vec<TranscriptCandidate>> {
        let term = Self::transcript_term(&identity.stable_id);
        let accessions = self
            .eutils
            .esearch(
                "nuccore",
                &term,
                NetworkConfig::NCBI_TRANSCRIPT_RETMAX,
                Some("acc"),
            )
            .await?;
        if accessions.is_empty() {
            info!(
                "No RefSeq transcripts for {} (GeneID {})",
                identity.official_symbol, identity.stable_id
            );
            return Ok(Vec::new());
        }

        let select_term = format!("{} AND refseq_select[filter]", term);
        let select: HashSet<String> = match self
            .eutils
            .esearch(
                "nuccore",
                &select_term,
                NetworkConfig::NCBI_TRANSCRIPT_RETMAX,
                Some("acc"),
            )
            .await
        {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!(
                    "RefSeq Select lookup for {} failed, continuing without it: {}",
                    identity.official_symbol, e
                );
                HashSet::new()
            }
        };

        let fasta = self
            .eutils
            .efetch("nuccore", &accessions, "fasta_cds_na")
            .await?;

        let mut candidates = parse_cds_fasta(&fasta)?;
        for candidate in &mut candidates {
            candidate.is_refseq_select = select.contains(&candidate.full_accession())
                || select.contains(&candidate.accession);
        }

        debug!(
            "Catalog for {}: {} transcripts, {} flagged RefSeq Select",
            identity.official_symbol,
            candidates.len(),
            candidates.iter().filter(|c| c.is_refseq_select).count()
        );
        Ok(candidates)
    }
}

/// `[key=value]` attributes in a `fasta_cds_na` description line.
static ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(?P<key>[A-Za-z_]+)=(?P<value>[^\]]*)\]").expect("attribute regex must compile")
});

static ISOFORM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"isoform\s+\S+").expect("isoform regex must compile"));

/// Parse `fasta_cds_na` output into candidates, one per transcript.
///
/// Headers look like
/// `>lcl|NM_000546.6_cds_NP_000537.3_1 [gene=TP53] [protein=... isoform a] [protein_id=NP_000537.3]`.
/// Only the first CDS of each transcript is kept. Non-letter bytes in the
/// sequence do not count toward the CDS length.
pub fn parse_cds_fasta(text: &str) -> Result<Vec<TranscriptCandidate>> {
    let mut candidates: Vec<TranscriptCandidate> = Vec::new();
    let mut seen = HashSet::new();

    let reader = fasta::Reader::new(text.trim_start().as_bytes());
    for record in reader.records() {
        let record = record?;
        let Some(mut candidate) = parse_header(record.id(), record.desc().unwrap_or("")) else {
            debug!("Skipping CDS record with unparseable id {}", record.id());
            continue;
        };

        let sequence: String = record
            .seq()
            .iter()
            .filter(|b| b.is_ascii_alphabetic())
            .map(|b| b.to_ascii_uppercase() as char)
            .collect();
        if sequence.is_empty() || !seen.insert(candidate.full_accession()) {
            continue;
        }

        candidate.cds_length = sequence.len();
        candidate.cds_sequence = sequence;
        candidates.push(candidate);
    }

    Ok(candidates)
}

fn parse_header(id: &str, description: &str) -> Option<TranscriptCandidate> {
    let id = id.strip_prefix("lcl|").unwrap_or(id);
    let transcript = id.split("_cds_").next()?;
    let (accession, version) = transcript.rsplit_once('.')?;
    let version = version.parse::<u32>().ok()?;

    let mut candidate = TranscriptCandidate::new(accession, version, "");
    if let Some(protein_id) = attribute(description, "protein_id") {
        candidate = candidate.with_protein_id(protein_id);
    }
    if let Some(label) = attribute(description, "protein").and_then(isoform_label) {
        candidate = candidate.with_variant_label(label);
    }
    Some(candidate)
}

/// Value of a `[key=value]` attribute in a FASTA description.
fn attribute<'a>(description: &'a str, key: &str) -> Option<&'a str> {
    ATTRIBUTE_RE
        .captures_iter(description)
        .find(|caps| &caps["key"] == key)
        .and_then(|caps| caps.name("value"))
        .map(|m| m.as_str())
}

fn isoform_label(protein: &str) -> Option<String> {
    ISOFORM_RE
        .find(protein)
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
}
