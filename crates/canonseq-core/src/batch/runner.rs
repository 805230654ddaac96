//! Batch coordinator and worker pool.

use super::checkpoint::{BatchCheckpoint, CheckpointStore};
use crate::cancel::CancellationToken;
use crate::config::{BatchSettings, RateLimitSettings, Services};
use crate::error::{CanonError, Result};
use crate::network::RateLimiters;
use chrono::Utc;
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

type ItemOutcome = std::result::Result<serde_json::Value, String>;

/// Result of driving one batch to completion or cancellation.
#[derive(Debug, Clone)]
pub struct BatchOutcome<R> {
    pub batch_id: String,
    /// Every successful result, including ones carried over from a resumed checkpoint.
    pub results: BTreeMap<String, R>,
    pub checkpoint: BatchCheckpoint,
    pub cancelled: bool,
}

impl<R> BatchOutcome<R> {
    pub fn success_count(&self) -> usize {
        self.checkpoint.success_count()
    }

    pub fn failure_count(&self) -> usize {
        self.checkpoint.failure_count()
    }
}

/// Drives an async operation over many query ids.
///
/// With concurrency 1 items run strictly in order on the caller's task.
/// Above that, a bounded pool of workers reports outcomes over a channel and
/// the coordinator alone updates the checkpoint.
pub struct BatchRunner {
    store: Option<CheckpointStore>,
    concurrency: usize,
    checkpoint_interval: usize,
    cancel: CancellationToken,
    rate_limit: Option<(Arc<RateLimiters>, String)>,
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRunner {
    pub fn new() -> Self {
        Self {
            store: None,
            concurrency: 1,
            checkpoint_interval: 10,
            cancel: CancellationToken::new(),
            rate_limit: None,
        }
    }

    pub fn from_settings(settings: &BatchSettings) -> Result<Self> {
        let mut runner = Self::new()
            .with_concurrency(settings.concurrency)
            .with_checkpoint_interval(settings.checkpoint_interval);
        if settings.enable_checkpoints {
            runner = runner.with_store(CheckpointStore::new(&settings.checkpoint_dir));
        }
        if let Some(rate) = settings.items_per_second {
            let limiters = RateLimiters::new()
                .with_service(Services::BATCH, RateLimitSettings::new(rate).with_burst(1))?;
            runner = runner.with_rate_limit(Arc::new(limiters), Services::BATCH);
        }
        Ok(runner)
    }

    pub fn with_store(mut self, store: CheckpointStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Clamped to `1..=BatchSettings::MAX_CONCURRENCY`.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, BatchSettings::MAX_CONCURRENCY);
        self
    }

    /// Save the checkpoint after every `interval` completions (zero is treated as one).
    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval.max(1);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Take a token from `service`'s bucket before dispatching each item.
    pub fn with_rate_limit(mut self, limiters: Arc<RateLimiters>, service: impl Into<String>) -> Self {
        self.rate_limit = Some((limiters, service.into()));
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> Option<&CheckpointStore> {
        self.store.as_ref()
    }

    /// Run a new batch under a generated id.
    pub async fn run<F, Fut, R>(&self, queries: &[String], op: F) -> Result<BatchOutcome<R>>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Serialize + DeserializeOwned + Send + 'static,
    {
        self.run_named(&new_batch_id(), queries, op).await
    }

    /// Run a new batch under `batch_id`.
    pub async fn run_named<F, Fut, R>(
        &self,
        batch_id: &str,
        queries: &[String],
        op: F,
    ) -> Result<BatchOutcome<R>>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Serialize + DeserializeOwned + Send + 'static,
    {
        let checkpoint = BatchCheckpoint::new(batch_id, queries);
        info!(
            "Starting batch {} with {} queries (concurrency {})",
            batch_id, checkpoint.total_items, self.concurrency
        );
        self.drive(checkpoint, Arc::new(op)).await
    }

    /// Continue a saved batch, submitting only its pending queries.
    ///
    /// Results already in the checkpoint are carried over untouched.
    pub async fn resume<F, Fut, R>(&self, batch_id: &str, op: F) -> Result<BatchOutcome<R>>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Serialize + DeserializeOwned + Send + 'static,
    {
        let checkpoint = self.load(batch_id)?;
        info!(
            "Resuming batch {}: {} pending, {} processed, {} failed",
            checkpoint.batch_id,
            checkpoint.pending.len(),
            checkpoint.processed.len(),
            checkpoint.failed.len()
        );
        self.drive(checkpoint, Arc::new(op)).await
    }

    /// Rerun the failed queries of a saved batch as a sub-batch.
    ///
    /// The sub-batch gets its own id and checkpoint. Items that now succeed
    /// move from failed to processed in the original checkpoint, which is
    /// saved again and returned.
    pub async fn retry_failed<F, Fut, R>(&self, batch_id: &str, op: F) -> Result<BatchOutcome<R>>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Serialize + DeserializeOwned + Send + 'static,
    {
        let mut original = self.load(batch_id)?;
        let retry_id = format!(
            "{}_retry_{}",
            original.batch_id,
            Utc::now().format("%Y%m%d_%H%M%S")
        );

        let mut sub_batch = BatchCheckpoint::new(&retry_id, &original.failed);
        sub_batch.metadata.insert(
            "retry_of".into(),
            serde_json::Value::String(original.batch_id.clone()),
        );
        sub_batch
            .metadata
            .insert("original_failed_count".into(), original.failed.len().into());
        info!(
            "Retrying {} failed queries of {} as {}",
            sub_batch.total_items, original.batch_id, retry_id
        );

        let retry: BatchOutcome<R> = self.drive(sub_batch, Arc::new(op)).await?;

        let mut recovered = 0;
        for id in &retry.checkpoint.processed {
            if let Some(value) = retry.checkpoint.results.get(id) {
                if original.record_success(id, value.clone()) {
                    recovered += 1;
                }
            }
        }
        for (id, error) in &retry.checkpoint.errors {
            original.errors.insert(id.clone(), error.clone());
        }
        info!(
            "Retry of {} recovered {}/{} queries",
            original.batch_id, recovered, retry.checkpoint.total_items
        );

        self.persist(&original);
        Ok(BatchOutcome {
            batch_id: original.batch_id.clone(),
            results: decode_results(&original),
            checkpoint: original,
            cancelled: retry.cancelled,
        })
    }

    fn load(&self, batch_id: &str) -> Result<BatchCheckpoint> {
        match &self.store {
            Some(store) => store.load(batch_id),
            None => Err(CanonError::CheckpointNotFound(batch_id.to_string())),
        }
    }

    /// Save `checkpoint`, logging instead of failing.
    fn persist(&self, checkpoint: &BatchCheckpoint) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(checkpoint) {
                warn!("Failed to save checkpoint {}: {}", checkpoint.batch_id, e);
            }
        }
    }

    async fn drive<F, Fut, R>(
        &self,
        mut checkpoint: BatchCheckpoint,
        op: Arc<F>,
    ) -> Result<BatchOutcome<R>>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Serialize + DeserializeOwned + Send + 'static,
    {
        let items = checkpoint.pending.clone();
        let total = items.len();
        let mut completed = 0usize;
        let mut cancelled = false;

        self.persist(&checkpoint);

        if self.concurrency == 1 {
            for id in items {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                self.acquire_item_token().await;
                let outcome = run_item(op.as_ref(), id.clone()).await;
                completed += 1;
                self.apply(&mut checkpoint, &id, outcome, completed, total);
            }
        } else {
            let (tx, mut rx) =
                mpsc::channel::<(String, ItemOutcome)>(self.concurrency.saturating_mul(2));
            let semaphore = Arc::new(Semaphore::new(self.concurrency));
            let cancel = self.cancel.clone();
            let rate_limit = self.rate_limit.clone();

            let dispatcher = tokio::spawn(async move {
                let mut halted = false;
                for id in items {
                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                        break;
                    };
                    if cancel.is_cancelled() {
                        halted = true;
                        break;
                    }
                    if let Some((limiters, service)) = &rate_limit {
                        limiters.acquire(service).await;
                    }

                    let tx = tx.clone();
                    let op = Arc::clone(&op);
                    tokio::spawn(async move {
                        let outcome = run_item(op.as_ref(), id.clone()).await;
                        drop(permit);
                        if tx.send((id, outcome)).await.is_err() {
                            debug!("Batch coordinator went away before a worker reported");
                        }
                    });
                }
                halted
            });

            while let Some((id, outcome)) = rx.recv().await {
                completed += 1;
                self.apply(&mut checkpoint, &id, outcome, completed, total);
            }

            cancelled = dispatcher.await.map_err(|e| {
                CanonError::Other(format!("Batch dispatcher failed: {}", e))
            })?;
        }

        if cancelled {
            warn!(
                "Batch {} cancelled with {} queries still pending",
                checkpoint.batch_id,
                checkpoint.pending.len()
            );
        }

        self.persist(&checkpoint);
        info!(
            "Batch {} finished: {} succeeded, {} failed, {} pending",
            checkpoint.batch_id,
            checkpoint.success_count(),
            checkpoint.failure_count(),
            checkpoint.pending.len()
        );

        Ok(BatchOutcome {
            batch_id: checkpoint.batch_id.clone(),
            results: decode_results(&checkpoint),
            checkpoint,
            cancelled,
        })
    }

    async fn acquire_item_token(&self) {
        if let Some((limiters, service)) = &self.rate_limit {
            limiters.acquire(service).await;
        }
    }

    fn apply(
        &self,
        checkpoint: &mut BatchCheckpoint,
        id: &str,
        outcome: ItemOutcome,
        completed: usize,
        total: usize,
    ) {
        match outcome {
            Ok(value) => {
                checkpoint.record_success(id, value);
                debug!("[{}/{}] {} succeeded", completed, total, id);
            }
            Err(error) => {
                warn!("[{}/{}] {} failed: {}", completed, total, id, error);
                checkpoint.record_failure(id, error);
            }
        }

        if completed % self.checkpoint_interval == 0 {
            self.persist(checkpoint);
            info!("Progress {}/{} for batch {}", completed, total, checkpoint.batch_id);
        }
    }
}

/// Run one item, turning errors and panics into an error message.
async fn run_item<F, Fut, R>(op: &F, id: String) -> ItemOutcome
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<R>>,
    R: Serialize,
{
    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| op(id))) {
        Ok(future) => future,
        Err(panic) => return Err(panic_message(panic.as_ref())),
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(result)) => serde_json::to_value(&result)
            .map_err(|e| format!("Failed to encode result: {}", e)),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Worker panicked: {}", detail)
}

fn decode_results<R: DeserializeOwned>(checkpoint: &BatchCheckpoint) -> BTreeMap<String, R> {
    checkpoint
        .results
        .iter()
        .filter_map(|(id, value)| match serde_json::from_value(value.clone()) {
            Ok(result) => Some((id.clone(), result)),
            Err(e) => {
                warn!("Result for {} in {} does not decode: {}", id, checkpoint.batch_id, e);
                None
            }
        })
        .collect()
}

/// `batch_{timestamp}_{short uuid}`.
pub fn new_batch_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("batch_{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &uuid[..8])
}
