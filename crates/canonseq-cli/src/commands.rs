//! Subcommand implementations. Each returns the JSON document to print.

use crate::CacheAction;
use anyhow::{Context, Result};
use canonseq::{
    BatchOutcome, BatchRunner, CacheBackend, CacheConfig, CancellationToken, CheckpointStore,
    GenePipeline, GeneReport, Settings, SqliteCache,
};
use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn resolve(settings: Settings, query: &str) -> Result<Value> {
    let pipeline = GenePipeline::from_settings(settings)?;
    let identity = pipeline.resolve(query).await?;
    Ok(serde_json::to_value(identity)?)
}

pub async fn select(settings: Settings, query: &str, prefer: Option<&str>) -> Result<Value> {
    let pipeline = GenePipeline::from_settings(settings)?;
    let report = pipeline.process_with_preference(query, prefer).await?;
    Ok(serde_json::to_value(report)?)
}

pub async fn run(
    settings: Settings,
    file: &Path,
    concurrency: Option<usize>,
    batch_id: Option<String>,
    cancel: CancellationToken,
) -> Result<Value> {
    let queries = read_queries(file)?;
    info!("Read {} queries from {}", queries.len(), file.display());

    let runner = runner(&settings, concurrency, cancel)?;
    let op = process_op(settings)?;
    let outcome = match batch_id {
        Some(id) => runner.run_named(&id, &queries, op).await?,
        None => runner.run(&queries, op).await?,
    };
    Ok(report(&outcome))
}

pub async fn resume(
    settings: Settings,
    batch_id: &str,
    concurrency: Option<usize>,
    cancel: CancellationToken,
) -> Result<Value> {
    let runner = runner(&settings, concurrency, cancel)?;
    let outcome = runner.resume(batch_id, process_op(settings)?).await?;
    Ok(report(&outcome))
}

pub async fn retry(
    settings: Settings,
    batch_id: &str,
    concurrency: Option<usize>,
    cancel: CancellationToken,
) -> Result<Value> {
    let runner = runner(&settings, concurrency, cancel)?;
    let outcome = runner.retry_failed(batch_id, process_op(settings)?).await?;
    Ok(report(&outcome))
}

pub fn checkpoints(settings: &Settings, cleanup: bool) -> Result<Value> {
    let store = CheckpointStore::new(&settings.batch.checkpoint_dir);
    if cleanup {
        let removed = store.cleanup_older_than(settings.batch.retention())?;
        return Ok(json!({ "removed": removed }));
    }
    Ok(serde_json::to_value(store.list()?)?)
}

pub fn cache(settings: &Settings, action: CacheAction) -> Result<Value> {
    let config = CacheConfig {
        max_size_bytes: settings.cache.max_size_bytes,
        namespace_ttls: settings.cache.namespace_ttls(),
        ..CacheConfig::default()
    };
    let path = settings.cache.database_path();
    let cache = SqliteCache::open(&path, config)
        .with_context(|| format!("Failed to open cache at {}", path.display()))?;

    let output = match action {
        CacheAction::Stats => {
            let stats = cache.stats()?;
            json!({
                "path": path,
                "hit_rate": stats.hit_rate(),
                "stats": stats,
            })
        }
        CacheAction::Cleanup => json!({ "removed": cache.cleanup_expired()? }),
        CacheAction::Clear => {
            cache.clear_all()?;
            json!({ "cleared": true })
        }
    };
    Ok(output)
}

/// Non-empty lines of `file`, skipping `#` comments.
pub fn read_queries(file: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn runner(
    settings: &Settings,
    concurrency: Option<usize>,
    cancel: CancellationToken,
) -> Result<BatchRunner> {
    Ok(BatchRunner::from_settings(&settings.batch)?
        .with_concurrency(concurrency.unwrap_or(settings.batch.concurrency))
        .with_cancellation(cancel))
}

fn process_op(
    settings: Settings,
) -> Result<impl Fn(String) -> BoxFuture<'static, canonseq::Result<GeneReport>> + Send + Sync + 'static>
{
    let pipeline = Arc::new(GenePipeline::from_settings(settings)?);
    Ok(move |entry: String| {
        let pipeline = Arc::clone(&pipeline);
        async move { pipeline.process_entry(&entry).await }.boxed()
    })
}

fn report(outcome: &BatchOutcome<GeneReport>) -> Value {
    let checkpoint = &outcome.checkpoint;
    info!(
        "Batch {}: {} succeeded, {} failed",
        outcome.batch_id,
        outcome.success_count(),
        outcome.failure_count()
    );
    if outcome.cancelled {
        warn!(
            "Batch {} was interrupted; resume with `canonseq resume {}`",
            outcome.batch_id, outcome.batch_id
        );
    }

    json!({
        "batch_id": outcome.batch_id,
        "cancelled": outcome.cancelled,
        "total": checkpoint.total_items,
        "succeeded": outcome.success_count(),
        "failed": outcome.failure_count(),
        "pending": checkpoint.pending.len(),
        "results": outcome.results,
        "errors": checkpoint.errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_queries_skips_blanks_and_comments() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("genes.txt");
        std::fs::write(&file, "# panel\nTP53\n\n  BRCA1\tNM_007294 \nVEGF\n").unwrap();

        let queries = read_queries(&file).unwrap();
        assert_eq!(queries, vec!["TP53", "BRCA1\tNM_007294", "VEGF"]);
    }

    #[test]
    fn test_read_queries_missing_file() {
        let temp = TempDir::new().unwrap();
        assert!(read_queries(&temp.path().join("absent.txt")).is_err());
    }
}
