//! Integration tests for resolution, selection and caching through the pipeline.

mod common;

use canonseq::config::ResolverSettings;
use canonseq::{
    Authority, CacheBackend, CacheConfig, CanonError, CanonicalSelector, GeneIdentity,
    IdentityResolver, Lookup, SelectionMethod, SqliteCache, TranscriptCandidate,
};
use common::*;
use std::sync::Arc;

fn identity(symbol: &str, stable_id: &str) -> GeneIdentity {
    GeneIdentity {
        input_name: symbol.into(),
        official_symbol: symbol.into(),
        stable_id: stable_id.into(),
        description: String::new(),
        aliases: vec![],
        confidence: 1.0,
        source: Authority::NcbiGene,
        disambiguation: None,
    }
}

#[tokio::test]
async fn test_exact_match_skips_secondary_authority() {
    let (genes, proteins, _) = panel();
    let resolver = IdentityResolver::new(genes.clone()).with_protein_authority(proteins.clone());

    let identity = resolver.resolve("TP53").await.found().unwrap();

    assert_eq!(identity.official_symbol, "TP53");
    assert_eq!(identity.stable_id, "7157");
    assert_eq!(identity.confidence, 1.0);
    assert_eq!(identity.source, Authority::NcbiGene);
    assert_eq!(proteins.search_count(), 0);
}

#[tokio::test]
async fn test_single_refseq_select_wins() {
    let (genes, proteins, catalog) = panel();
    let pipeline = pipeline(genes, proteins, catalog, None);

    let report = pipeline.process("TP53").await.unwrap();

    assert_eq!(report.selection.transcript.full_accession(), "NM_000546.6");
    assert_eq!(report.selection.method, SelectionMethod::CuratedSelect);
    assert_eq!(report.selection.confidence, 0.95);
    assert_eq!(report.selection.alternatives_count, 2);
    assert!(report.selection.warnings.is_empty());
}

#[tokio::test]
async fn test_warm_cache_is_idempotent() {
    let (genes, proteins, catalog) = panel();
    let cache: Arc<dyn CacheBackend> =
        Arc::new(SqliteCache::in_memory(CacheConfig::default()).unwrap());
    let pipeline = pipeline(genes.clone(), proteins, catalog.clone(), Some(cache.clone()));

    let cold = pipeline.process("BRCA1").await.unwrap();
    let searches = genes.search_count();
    let listings = catalog.call_count();
    let misses = cache.stats().unwrap().miss_count;
    assert_eq!(cache.stats().unwrap().hit_count, 0);
    assert!(misses > 0);

    let warm = pipeline.process("BRCA1").await.unwrap();

    assert_eq!(cold, warm);
    assert_eq!(genes.search_count(), searches);
    assert_eq!(catalog.call_count(), listings);
    // One hit for the gene records and one for the transcript list.
    let stats = cache.stats().unwrap();
    assert_eq!(stats.hit_count, 2);
    assert_eq!(stats.miss_count, misses);
}

#[tokio::test]
async fn test_equal_length_tie_prefers_most_recent_version() {
    let selector = CanonicalSelector::default();
    let candidates = vec![
        TranscriptCandidate::new("NM_000001", 1, "ATGAAATAG"),
        TranscriptCandidate::new("NM_000002", 3, "ATGCCCTAG"),
    ];

    let first = selector
        .select(&candidates, &identity("GENE1", "1"), None)
        .await
        .found()
        .unwrap();
    let second = selector
        .select(&candidates, &identity("GENE1", "1"), None)
        .await
        .found()
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.transcript.full_accession(), "NM_000002.3");
    assert_eq!(first.method, SelectionMethod::MostRecentVersion);
    assert_eq!(first.confidence, 0.7);
    assert_eq!(first.warnings.len(), 1);
    assert!(first.warnings[0].contains('2'));
}

#[tokio::test]
async fn test_vegf_alias_resolves_to_vegfa() {
    let (genes, proteins, catalog) = panel();
    let pipeline = pipeline(genes, proteins.clone(), catalog, None);

    let report = pipeline.process("VEGF").await.unwrap();

    assert_eq!(report.identity.official_symbol, "VEGFA");
    assert_eq!(report.identity.stable_id, "7422");
    assert_eq!(report.identity.confidence, 0.9);
    assert_eq!(proteins.search_count(), 0);
    assert_eq!(report.selection.transcript.full_accession(), "NM_003376.6");
    assert_eq!(report.selection.method, SelectionMethod::MostRecentVersion);
}

#[tokio::test]
async fn test_user_preference_overrides_select() {
    let (genes, proteins, catalog) = panel();
    let pipeline = pipeline(genes, proteins, catalog, None);

    let report = pipeline.process_entry("TP53\tNM_001126112").await.unwrap();

    assert_eq!(report.selection.method, SelectionMethod::UserOverride);
    assert_eq!(report.selection.confidence, 1.0);
    assert_eq!(report.user_preference.as_deref(), Some("NM_001126112"));
}

#[tokio::test]
async fn test_secondary_authority_wins_on_higher_score() {
    let genes = FakeGenes::new().with_term(
        "HER2",
        vec![gene("2064", "ERBB2", "erb-b2 receptor tyrosine kinase 2", &["NEU"])],
    );
    let proteins = Arc::new(FakeProteins::new(vec![protein(
        "P04626",
        "ERBB2",
        &["HER2", "NEU"],
        "2064",
    )]));
    let resolver = IdentityResolver::new(Arc::new(genes)).with_protein_authority(proteins.clone());

    let identity = resolver.resolve("HER2").await.found().unwrap();

    assert_eq!(proteins.search_count(), 1);
    assert_eq!(identity.source, Authority::UniProt);
    assert_eq!(identity.official_symbol, "ERBB2");
    assert_eq!(identity.stable_id, "2064");
    assert_eq!(identity.confidence, 0.85);
}

#[tokio::test]
async fn test_failing_authorities_give_not_found() {
    let genes = Arc::new(FakeGenes::failing());
    let proteins = Arc::new(FakeProteins::failing());
    let resolver = IdentityResolver::new(genes.clone()).with_protein_authority(proteins.clone());

    assert_eq!(resolver.resolve("TP53").await, Lookup::NotFound);
    assert!(genes.search_count() >= 1);
    assert_eq!(proteins.search_count(), 1);
}

#[tokio::test]
async fn test_close_runner_up_is_noted() {
    let genes = FakeGenes::new().with_term(
        "CAP",
        vec![
            gene(
                "10487",
                "CAP1",
                "cyclase associated actin cytoskeleton regulatory protein 1",
                &["CAP"],
            ),
            gene("10580", "SORBS1", "sorbin and SH3 domain containing 1", &["CAP", "FLAF2"]),
        ],
    );
    let proteins = Arc::new(FakeProteins::default());
    let resolver = IdentityResolver::new(Arc::new(genes)).with_protein_authority(proteins.clone());

    let identity = resolver.resolve("CAP").await.found().unwrap();

    assert_eq!(identity.official_symbol, "CAP1");
    assert_eq!(identity.confidence, 0.9);
    assert_eq!(
        identity.disambiguation.as_deref(),
        Some("Selected over SORBS1 based on confidence score")
    );
    assert_eq!(proteins.search_count(), 0);
}

#[tokio::test]
async fn test_primary_kept_on_tie_notes_secondary_symbol() {
    let genes = FakeGenes::new().with_term(
        "HER",
        vec![gene("2065", "ERBB3", "erb-b2 receptor tyrosine kinase 3 (HER3)", &["ErbB-3"])],
    );
    let proteins = Arc::new(FakeProteins::new(vec![protein(
        "P04626",
        "ERBB2",
        &["HER2", "NEU"],
        "2064",
    )]));
    let resolver = IdentityResolver::new(Arc::new(genes)).with_protein_authority(proteins.clone());

    let identity = resolver.resolve("HER").await.found().unwrap();

    assert_eq!(proteins.search_count(), 1);
    assert_eq!(identity.source, Authority::NcbiGene);
    assert_eq!(identity.official_symbol, "ERBB3");
    assert_eq!(identity.confidence, 0.7);
    assert_eq!(identity.disambiguation.as_deref(), Some("UniProt suggests ERBB2"));
}

#[tokio::test]
async fn test_secondary_suggestion_is_appended_to_runner_up_note() {
    let genes = FakeGenes::new().with_term(
        "CAP",
        vec![
            gene(
                "10487",
                "CAP1",
                "cyclase associated actin cytoskeleton regulatory protein 1",
                &["CAP"],
            ),
            gene("10580", "SORBS1", "sorbin and SH3 domain containing 1", &["CAP"]),
        ],
    );
    let proteins = Arc::new(FakeProteins::new(vec![protein(
        "Q9BX66",
        "SORBS1",
        &["CAP", "KIAA1296"],
        "10580",
    )]));
    let resolver = IdentityResolver::new(Arc::new(genes))
        .with_protein_authority(proteins.clone())
        .with_settings(ResolverSettings {
            protein_fallback_threshold: 0.95,
        });

    let identity = resolver.resolve("CAP").await.found().unwrap();

    assert_eq!(proteins.search_count(), 1);
    assert_eq!(identity.official_symbol, "CAP1");
    assert_eq!(
        identity.disambiguation.as_deref(),
        Some("Selected over SORBS1 based on confidence score; UniProt suggests SORBS1")
    );
}

#[tokio::test]
async fn test_unknown_gene_is_an_item_error() {
    let (genes, proteins, catalog) = panel();
    let pipeline = pipeline(genes, proteins, catalog, None);

    let error = pipeline.process("NOTAGENE").await.unwrap_err();
    assert!(matches!(error, CanonError::NotFound { .. }));
}

#[tokio::test]
async fn test_gene_without_transcripts_is_an_item_error() {
    let genes = Arc::new(FakeGenes::new().with_term(
        "LINC00001",
        vec![gene("999", "LINC00001", "long intergenic non-coding RNA 1", &[])],
    ));
    let pipeline = pipeline(
        genes,
        Arc::new(FakeProteins::default()),
        Arc::new(FakeCatalog::new()),
        None,
    );

    let error = pipeline.process("LINC00001").await.unwrap_err();
    assert!(error.to_string().contains("transcripts for LINC00001"));
}

#[test]
fn test_cache_eviction_drops_least_recently_used() {
    let cache = SqliteCache::in_memory(CacheConfig::default().with_max_size(1000)).unwrap();
    let payload = vec![b'x'; 400];

    cache.set("ncbi_gene", "a", &payload, None).unwrap();
    cache.set("ncbi_gene", "b", &payload, None).unwrap();
    cache.set("ncbi_gene", "c", &payload, None).unwrap();

    let stats = cache.stats().unwrap();
    assert_eq!(stats.evicted_count, 1);
    assert_eq!(stats.total_entries, 2);
    assert!(stats.total_size_bytes <= 1000);
    assert!(cache.get("ncbi_gene", "a").unwrap().is_none());
    assert!(cache.get("ncbi_gene", "c").unwrap().is_some());
}

#[tokio::test]
async fn test_agreeing_secondary_adds_no_note() {
    let genes = FakeGenes::new().with_term(
        "HER",
        vec![gene("2065", "ERBB3", "erb-b2 receptor tyrosine kinase 3 (HER3)", &[])],
    );
    let proteins = Arc::new(FakeProteins::new(vec![protein(
        "P21860",
        "ERBB3",
        &["HER3"],
        "2065",
    )]));
    let resolver = IdentityResolver::new(Arc::new(genes)).with_protein_authority(proteins.clone());

    let identity = resolver.resolve("HER").await.found().unwrap();

    assert_eq!(proteins.search_count(), 1);
    assert_eq!(identity.official_symbol, "ERBB3");
    assert_eq!(identity.disambiguation, None);
}
