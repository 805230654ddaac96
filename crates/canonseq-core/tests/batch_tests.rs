//! Integration tests for the batch harness and its checkpoints.

mod common;

use canonseq::{BatchCheckpoint, BatchRunner, CanonError, CheckpointStore, GeneReport, Result};
use common::*;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn assert_partition(checkpoint: &BatchCheckpoint, queries: &[String]) {
    let processed: HashSet<_> = checkpoint.processed.iter().collect();
    let failed: HashSet<_> = checkpoint.failed.iter().collect();
    let pending: HashSet<_> = checkpoint.pending.iter().collect();

    assert!(processed.is_disjoint(&failed));
    assert!(processed.is_disjoint(&pending));
    assert!(failed.is_disjoint(&pending));

    let union: HashSet<_> = processed.union(&failed).chain(pending.iter()).collect();
    let expected: HashSet<_> = queries.iter().collect();
    assert_eq!(union.len(), expected.len());
    assert!(expected.iter().all(|q| union.contains(q)));
    assert_eq!(
        checkpoint.processed.len() + checkpoint.failed.len() + checkpoint.pending.len(),
        checkpoint.total_items
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pipeline_batch_keeps_sets_partitioned() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path());
    let (genes, proteins, catalog) = panel();
    let pipeline = Arc::new(pipeline(genes, proteins, catalog, None));
    let queries = ids(&["TP53", "VEGF", "NOTAGENE", "BRCA1", "TP53\tNM_001276760"]);

    let runner = BatchRunner::new()
        .with_store(store.clone())
        .with_concurrency(3)
        .with_checkpoint_interval(2);
    let outcome = runner
        .run_named("panel", &queries, move |entry| {
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.process_entry(&entry).await }
        })
        .await
        .unwrap();

    assert_partition(&outcome.checkpoint, &queries);
    assert_eq!(outcome.success_count(), 4);
    assert_eq!(outcome.failure_count(), 1);
    assert!(outcome.checkpoint.pending.is_empty());
    assert!(outcome.checkpoint.errors["NOTAGENE"].contains("Not found"));

    let report: &GeneReport = &outcome.results["TP53\tNM_001276760"];
    assert_eq!(report.selection.transcript.full_accession(), "NM_001276760.3");

    let saved = store.load("panel").unwrap();
    assert_partition(&saved, &queries);
    assert_eq!(saved.results, outcome.checkpoint.results);
}

#[tokio::test]
async fn test_resume_submits_only_pending() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path());
    let queries = ids(&["A", "B", "C", "D", "E"]);

    let mut checkpoint = BatchCheckpoint::new("interrupted", &queries);
    checkpoint.record_success("A", json!({"symbol": "A", "score": 1.0}));
    checkpoint.record_success("B", json!({"symbol": "B", "nested": [1, 2, 3]}));
    checkpoint.record_failure("C", "Request timeout after 30s");
    store.save(&checkpoint).unwrap();
    let carried_a = serde_json::to_string(&checkpoint.results["A"]).unwrap();
    let carried_b = serde_json::to_string(&checkpoint.results["B"]).unwrap();

    let submitted = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = submitted.clone();
    let runner = BatchRunner::new().with_store(store.clone());
    let outcome = runner
        .resume("interrupted", move |id| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(id.clone());
                Ok::<Value, CanonError>(json!({ "symbol": id }))
            }
        })
        .await
        .unwrap();

    assert_eq!(*submitted.lock().unwrap(), vec!["D", "E"]);
    assert_eq!(outcome.checkpoint.processed.len(), 4);
    assert_eq!(outcome.checkpoint.failed, vec!["C"]);
    assert!(outcome.checkpoint.pending.is_empty());
    assert_eq!(
        serde_json::to_string(&outcome.checkpoint.results["A"]).unwrap(),
        carried_a
    );
    assert_eq!(
        serde_json::to_string(&outcome.checkpoint.results["B"]).unwrap(),
        carried_b
    );
    assert_partition(&outcome.checkpoint, &queries);

    let saved = store.load("interrupted").unwrap();
    assert_eq!(saved.processed.len(), 4);
    assert!(saved.pending.is_empty());
}

#[tokio::test]
async fn test_resume_loads_suffixless_file() {
    let temp = TempDir::new().unwrap();
    let checkpoint = BatchCheckpoint::new("plain", &ids(&["X"]));
    let body = serde_json::to_vec_pretty(&checkpoint).unwrap();
    std::fs::write(temp.path().join("plain.json"), body).unwrap();

    let runner = BatchRunner::new().with_store(CheckpointStore::new(temp.path()));
    let outcome = runner
        .resume("plain", |id| async move { Ok::<_, CanonError>(id) })
        .await
        .unwrap();

    assert_eq!(outcome.results["X"], "X");
}

#[tokio::test]
async fn test_resume_unknown_checkpoint_fails() {
    let temp = TempDir::new().unwrap();
    let runner = BatchRunner::new().with_store(CheckpointStore::new(temp.path()));

    let result: Result<_> = runner
        .resume("never_saved", |id| async move { Ok::<_, CanonError>(id) })
        .await;

    match result {
        Err(CanonError::CheckpointNotFound(id)) => assert_eq!(id, "never_saved"),
        other => panic!("expected CheckpointNotFound, got {:?}", other.map(|o| o.batch_id)),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_items_are_not_lost() {
    let queries: Vec<String> = (0..8).map(|i| format!("Q{}", i)).collect();
    let outcome = BatchRunner::new()
        .with_concurrency(4)
        .run(&queries, |id| async move {
            if id.ends_with('3') || id.ends_with('6') {
                panic!("worker bug on {}", id);
            }
            Ok::<_, CanonError>(id.len())
        })
        .await
        .unwrap();

    assert_partition(&outcome.checkpoint, &queries);
    assert_eq!(outcome.success_count(), 6);
    assert_eq!(outcome.failure_count(), 2);
    assert!(outcome.checkpoint.errors["Q3"].contains("worker bug on Q3"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_batch_resumes_to_completion() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path());
    let queries: Vec<String> = (0..6).map(|i| format!("G{}", i)).collect();
    let calls = Arc::new(AtomicUsize::new(0));

    let runner = BatchRunner::new().with_store(store.clone());
    let token = runner.cancellation_token();
    let counter = calls.clone();
    let first = runner
        .run_named("stop_early", &queries, move |id| {
            let (token, counter) = (token.clone(), counter.clone());
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 2 {
                    token.cancel();
                }
                Ok::<_, CanonError>(id)
            }
        })
        .await
        .unwrap();

    assert!(first.cancelled);
    assert_eq!(first.checkpoint.processed.len(), 3);
    assert_eq!(first.checkpoint.pending.len(), 3);
    assert_partition(&first.checkpoint, &queries);

    let resumed = BatchRunner::new()
        .with_store(store)
        .with_concurrency(2)
        .resume("stop_early", |id| async move { Ok::<_, CanonError>(id) })
        .await
        .unwrap();

    assert!(!resumed.cancelled);
    assert!(resumed.checkpoint.is_complete());
    assert_eq!(resumed.success_count(), 6);
    assert_eq!(resumed.results.len(), 6);
}

#[tokio::test]
async fn test_retry_failed_moves_recovered_items() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path());
    let runner = BatchRunner::new().with_store(store.clone());
    let queries = ids(&["TP53", "FLAKY1", "FLAKY2", "GONE"]);

    runner
        .run_named("nightly", &queries, |id| async move {
            match id.as_str() {
                "TP53" => Ok(id),
                _ => Err(CanonError::Http {
                    url: "https://eutils.example".into(),
                    status: 502,
                }),
            }
        })
        .await
        .unwrap();

    let outcome = runner
        .retry_failed("nightly", |id| async move {
            if id.starts_with("FLAKY") {
                Ok(id)
            } else {
                Err(CanonError::not_found(format!("gene {:?}", id)))
            }
        })
        .await
        .unwrap();

    assert_eq!(outcome.success_count(), 3);
    assert_eq!(outcome.checkpoint.failed, vec!["GONE"]);
    assert!(outcome.checkpoint.errors["GONE"].contains("Not found"));
    assert!(!outcome.checkpoint.errors.contains_key("FLAKY1"));
    assert_partition(&outcome.checkpoint, &queries);

    let summaries = store.list().unwrap();
    assert_eq!(summaries.len(), 2);
    assert!(summaries
        .iter()
        .any(|s| s.batch_id.starts_with("nightly_retry_") && s.total_items == 3));
}
