//! Core data types shared by the resolver, selector and batch harness.

use serde::{Deserialize, Serialize};
use std::fmt;

/// External authority that produced a gene identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authority {
    /// NCBI Gene (authority A).
    NcbiGene,
    /// UniProtKB reviewed entries (authority B).
    UniProt,
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authority::NcbiGene => write!(f, "NCBI Gene"),
            Authority::UniProt => write!(f, "UniProt"),
        }
    }
}

/// An authoritative gene identity resolved from a free-text query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneIdentity {
    /// The query as the user typed it.
    pub input_name: String,
    pub official_symbol: String,
    /// NCBI Gene ID.
    pub stable_id: String,
    pub description: String,
    pub aliases: Vec<String>,
    /// Within [0, 1].
    pub confidence: f64,
    pub source: Authority,
    /// Set when a close runner-up or the other authority suggested something else.
    pub disambiguation: Option<String>,
}

/// One candidate transcript from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptCandidate {
    /// Accession without version, e.g. `NM_000546`.
    pub accession: String,
    pub version: u32,
    /// Coding sequence (nucleotides).
    pub cds_sequence: String,
    pub cds_length: usize,
    /// Flagged as the curated representative (RefSeq Select).
    pub is_refseq_select: bool,
    pub variant_label: Option<String>,
    pub protein_id: Option<String>,
}

impl TranscriptCandidate {
    pub fn new(accession: impl Into<String>, version: u32, cds_sequence: impl Into<String>) -> Self {
        let cds_sequence = cds_sequence.into();
        Self {
            accession: accession.into(),
            version,
            cds_length: cds_sequence.len(),
            cds_sequence,
            is_refseq_select: false,
            variant_label: None,
            protein_id: None,
        }
    }

    pub fn with_refseq_select(mut self, flag: bool) -> Self {
        self.is_refseq_select = flag;
        self
    }

    pub fn with_variant_label(mut self, label: impl Into<String>) -> Self {
        self.variant_label = Some(label.into());
        self
    }

    pub fn with_protein_id(mut self, protein_id: impl Into<String>) -> Self {
        self.protein_id = Some(protein_id.into());
        self
    }

    /// `accession.version`, e.g. `NM_000546.6`.
    pub fn full_accession(&self) -> String {
        format!("{}.{}", self.accession, self.version)
    }

    /// Whether `reference` names this transcript, with or without a version.
    pub fn matches_accession(&self, reference: &str) -> bool {
        let reference = reference.trim();
        match reference.split_once('.') {
            Some((accession, version)) => {
                accession.eq_ignore_ascii_case(&self.accession)
                    && version.parse::<u32>().ok() == Some(self.version)
            }
            None => reference.eq_ignore_ascii_case(&self.accession),
        }
    }
}

/// Rule of the selection hierarchy that chose a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionMethod {
    UserOverride,
    /// Curated RefSeq Select flag.
    CuratedSelect,
    ExternalCanonical,
    LongestSequence,
    MostRecentVersion,
    Default,
}

impl fmt::Display for SelectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SelectionMethod::UserOverride => "USER_OVERRIDE",
            SelectionMethod::CuratedSelect => "CURATED_SELECT",
            SelectionMethod::ExternalCanonical => "EXTERNAL_CANONICAL",
            SelectionMethod::LongestSequence => "LONGEST_SEQUENCE",
            SelectionMethod::MostRecentVersion => "MOST_RECENT_VERSION",
            SelectionMethod::Default => "DEFAULT",
        };
        f.write_str(name)
    }
}

/// The chosen canonical transcript and how it was chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub transcript: TranscriptCandidate,
    pub method: SelectionMethod,
    pub confidence: f64,
    pub rationale: String,
    /// In the order they were raised.
    pub warnings: Vec<String>,
    /// Number of candidates that were not chosen.
    pub alternatives_count: usize,
}
