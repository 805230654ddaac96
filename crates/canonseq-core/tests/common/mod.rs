//! Fake authorities and catalog shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use canonseq::config::Settings;
use canonseq::{
    CacheBackend, CanonError, GeneAuthority, GeneIdentity, GenePipeline, GeneRecord,
    ProteinAuthority, ProteinRecord, Result, TranscriptCandidate, TranscriptCatalog,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn gene(id: &str, symbol: &str, description: &str, aliases: &[&str]) -> GeneRecord {
    GeneRecord {
        gene_id: id.into(),
        symbol: symbol.into(),
        description: description.into(),
        aliases: aliases.iter().map(|a| a.to_string()).collect(),
    }
}

pub fn protein(accession: &str, name: &str, synonyms: &[&str], gene_id: &str) -> ProteinRecord {
    ProteinRecord {
        accession: accession.into(),
        primary_name: name.into(),
        synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        protein_name: format!("{} protein", name),
        gene_ids: vec![gene_id.into()],
        refseq: vec![],
    }
}

/// Authority A answering from a fixed term -> ids table.
#[derive(Default)]
pub struct FakeGenes {
    terms: HashMap<String, Vec<String>>,
    records: HashMap<String, GeneRecord>,
    pub searches: AtomicUsize,
    pub fail: bool,
}

impl FakeGenes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Make `term` return `records`, in order.
    pub fn with_term(mut self, term: &str, records: Vec<GeneRecord>) -> Self {
        let ids = records.iter().map(|r| r.gene_id.clone()).collect();
        self.terms.insert(term.to_string(), ids);
        for record in records {
            self.records.insert(record.gene_id.clone(), record);
        }
        self
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeneAuthority for FakeGenes {
    async fn search(&self, term: &str) -> Result<Vec<String>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CanonError::Http {
                url: "https://eutils.example/esearch.fcgi".into(),
                status: 503,
            });
        }
        Ok(self.terms.get(term).cloned().unwrap_or_default())
    }

    async fn fetch_details(&self, ids: &[String]) -> Result<Vec<GeneRecord>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect())
    }
}

/// Authority B matching terms against names and synonyms.
#[derive(Default)]
pub struct FakeProteins {
    records: Vec<ProteinRecord>,
    pub searches: AtomicUsize,
    pub fail: bool,
}

impl FakeProteins {
    pub fn new(records: Vec<ProteinRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProteinAuthority for FakeProteins {
    async fn search(&self, term: &str) -> Result<Vec<ProteinRecord>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CanonError::Timeout(std::time::Duration::from_secs(30)));
        }
        let term = term.to_lowercase();
        Ok(self
            .records
            .iter()
            .filter(|r| {
                std::iter::once(&r.primary_name)
                    .chain(&r.synonyms)
                    .any(|name| name.to_lowercase().contains(&term))
            })
            .cloned()
            .collect())
    }

    async fn fetch_details(&self, accessions: &[String]) -> Result<Vec<ProteinRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| accessions.contains(&r.accession))
            .cloned()
            .collect())
    }
}

/// Transcript catalog keyed by gene id.
#[derive(Default)]
pub struct FakeCatalog {
    transcripts: HashMap<String, Vec<TranscriptCandidate>>,
    pub calls: AtomicUsize,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gene(mut self, gene_id: &str, transcripts: Vec<TranscriptCandidate>) -> Self {
        self.transcripts.insert(gene_id.to_string(), transcripts);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptCatalog for FakeCatalog {
    async fn list_transcripts(&self, identity: &GeneIdentity) -> Result<Vec<TranscriptCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .transcripts
            .get(&identity.stable_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Settings that never reach the network for canonical lookups.
pub fn offline_settings() -> Settings {
    let mut settings = Settings::default();
    settings.cache.enabled = false;
    settings.selection.enable_external_canonical = false;
    settings
}

pub fn tp53_transcripts() -> Vec<TranscriptCandidate> {
    vec![
        TranscriptCandidate::new("NM_001126112", 3, "ATG".repeat(400)),
        TranscriptCandidate::new("NM_000546", 6, "ATG".repeat(394)).with_refseq_select(true),
        TranscriptCandidate::new("NM_001276760", 3, "ATG".repeat(350)),
    ]
}

/// A panel of genes covering the common resolution paths.
pub fn panel() -> (Arc<FakeGenes>, Arc<FakeProteins>, Arc<FakeCatalog>) {
    let genes = FakeGenes::new()
        .with_term(
            "TP53",
            vec![gene("7157", "TP53", "tumor protein p53", &["P53", "LFS1"])],
        )
        .with_term(
            "VEGF",
            vec![gene(
                "7422",
                "VEGFA",
                "vascular endothelial growth factor A",
                &["VEGF", "VPF"],
            )],
        )
        .with_term(
            "BRCA1",
            vec![gene("672", "BRCA1", "BRCA1 DNA repair associated", &["RNF53"])],
        );
    let proteins = FakeProteins::new(vec![protein("P04637", "TP53", &["P53"], "7157")]);
    let catalog = FakeCatalog::new()
        .with_gene("7157", tp53_transcripts())
        .with_gene(
            "7422",
            vec![
                TranscriptCandidate::new("NM_001171623", 1, "ATG".repeat(300)),
                TranscriptCandidate::new("NM_003376", 6, "ATG".repeat(300)),
            ],
        )
        .with_gene(
            "672",
            vec![
                TranscriptCandidate::new("NM_007294", 4, "ATG".repeat(1863)).with_refseq_select(true),
                TranscriptCandidate::new("NM_007300", 4, "ATG".repeat(1884)),
            ],
        );
    (Arc::new(genes), Arc::new(proteins), Arc::new(catalog))
}

pub fn pipeline(
    genes: Arc<FakeGenes>,
    proteins: Arc<FakeProteins>,
    catalog: Arc<FakeCatalog>,
    cache: Option<Arc<dyn CacheBackend>>,
) -> GenePipeline {
    let mut builder = GenePipeline::builder(offline_settings())
        .with_gene_authority(genes)
        .with_protein_authority(proteins)
        .with_catalog(catalog);
    if let Some(cache) = cache {
        builder = builder.with_cache(cache);
    }
    builder.build().expect("pipeline builds from fakes")
}
