//! Batch checkpoints and their on-disk store.

use crate::config::PathsConfig;
use crate::error::{CanonError, Result};
use crate::storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Progress of one batch.
///
/// Every query id sits in exactly one of `pending`, `processed` or `failed`.
/// Only the batch coordinator mutates a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCheckpoint {
    pub batch_id: String,
    /// Last time the checkpoint was modified.
    pub timestamp: DateTime<Utc>,
    pub total_items: usize,
    pub processed: Vec<String>,
    pub failed: Vec<String>,
    pub pending: Vec<String>,
    /// Results of processed items, keyed by query id.
    pub results: BTreeMap<String, serde_json::Value>,
    /// Error messages of failed items, keyed by query id.
    pub errors: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl BatchCheckpoint {
    /// Start a checkpoint with every query pending. Duplicate ids are dropped.
    pub fn new(batch_id: impl Into<String>, queries: &[String]) -> Self {
        let mut seen = HashSet::new();
        let pending: Vec<String> = queries
            .iter()
            .filter(|q| seen.insert(q.as_str()))
            .cloned()
            .collect();

        Self {
            batch_id: batch_id.into(),
            timestamp: Utc::now(),
            total_items: pending.len(),
            processed: Vec::new(),
            failed: Vec::new(),
            pending,
            results: BTreeMap::new(),
            errors: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Move `id` into `processed` and store its result.
    ///
    /// Accepts ids that are pending or previously failed. Returns false for
    /// ids this checkpoint does not track or that are already processed.
    pub fn record_success(&mut self, id: &str, result: serde_json::Value) -> bool {
        if !(remove_item(&mut self.pending, id) || remove_item(&mut self.failed, id)) {
            return false;
        }
        self.errors.remove(id);
        self.processed.push(id.to_string());
        self.results.insert(id.to_string(), result);
        self.timestamp = Utc::now();
        true
    }

    /// Move a pending `id` into `failed` and store its error.
    pub fn record_failure(&mut self, id: &str, error: impl Into<String>) -> bool {
        if !remove_item(&mut self.pending, id) {
            return false;
        }
        self.failed.push(id.to_string());
        self.errors.insert(id.to_string(), error.into());
        self.timestamp = Utc::now();
        true
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.processed.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    /// Check that the three id sets partition the batch.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for id in self.processed.iter().chain(&self.failed).chain(&self.pending) {
            if !seen.insert(id.as_str()) {
                return Err(CanonError::Validation {
                    field: format!("checkpoint {}", self.batch_id),
                    message: format!("query {:?} appears more than once", id),
                });
            }
        }
        if seen.len() != self.total_items {
            return Err(CanonError::Validation {
                field: format!("checkpoint {}", self.batch_id),
                message: format!(
                    "tracks {} queries but total_items is {}",
                    seen.len(),
                    self.total_items
                ),
            });
        }
        Ok(())
    }

    pub fn summary(&self, path: Option<PathBuf>) -> CheckpointSummary {
        CheckpointSummary {
            batch_id: self.batch_id.clone(),
            timestamp: self.timestamp,
            total_items: self.total_items,
            processed: self.processed.len(),
            failed: self.failed.len(),
            pending: self.pending.len(),
            path,
        }
    }
}

fn remove_item(list: &mut Vec<String>, id: &str) -> bool {
    match list.iter().position(|item| item == id) {
        Some(index) => {
            list.remove(index);
            true
        }
        None => false,
    }
}

/// Counts-only view of a stored checkpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointSummary {
    pub batch_id: String,
    pub timestamp: DateTime<Utc>,
    pub total_items: usize,
    pub processed: usize,
    pub failed: usize,
    pub pending: usize,
    pub path: Option<PathBuf>,
}

/// Directory of checkpoint files, one JSON document per batch.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, batch_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}", batch_id, PathsConfig::CHECKPOINT_SUFFIX))
    }

    /// Atomically write `checkpoint`.
    pub fn save(&self, checkpoint: &BatchCheckpoint) -> Result<PathBuf> {
        let path = self.path_for(&checkpoint.batch_id);
        storage::atomic_write_json(&path, checkpoint)?;
        debug!(
            "Saved checkpoint {} ({} processed, {} failed, {} pending)",
            checkpoint.batch_id,
            checkpoint.processed.len(),
            checkpoint.failed.len(),
            checkpoint.pending.len()
        );
        Ok(path)
    }

    /// Load a checkpoint by batch id or by file stem.
    pub fn load(&self, batch_id: &str) -> Result<BatchCheckpoint> {
        let candidates = [
            self.dir.join(format!("{}.json", batch_id)),
            self.path_for(batch_id),
        ];
        for path in &candidates {
            if let Some(checkpoint) = storage::read_json::<BatchCheckpoint>(path)? {
                checkpoint.validate()?;
                info!(
                    "Loaded checkpoint {}: {}/{} done",
                    checkpoint.batch_id,
                    checkpoint.processed.len() + checkpoint.failed.len(),
                    checkpoint.total_items
                );
                return Ok(checkpoint);
            }
        }
        Err(CanonError::CheckpointNotFound(batch_id.to_string()))
    }

    /// Summaries of all readable checkpoints, newest first.
    pub fn list(&self) -> Result<Vec<CheckpointSummary>> {
        let mut summaries: Vec<CheckpointSummary> = self
            .checkpoint_files()?
            .into_iter()
            .filter_map(|path| match storage::read_json::<BatchCheckpoint>(&path) {
                Ok(Some(checkpoint)) => Some(checkpoint.summary(Some(path))),
                Ok(None) => None,
                Err(e) => {
                    warn!("Skipping unreadable checkpoint {}: {}", path.display(), e);
                    None
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(summaries)
    }

    /// Delete checkpoints last modified more than `retention` ago.
    ///
    /// Returns the number of files removed.
    pub fn cleanup_older_than(&self, retention: Duration) -> Result<usize> {
        let retention = chrono::Duration::from_std(retention).map_err(|e| {
            CanonError::Validation {
                field: "retention".into(),
                message: e.to_string(),
            }
        })?;
        let cutoff = Utc::now() - retention;

        let mut removed = 0;
        for path in self.checkpoint_files()? {
            let timestamp = match storage::read_json::<BatchCheckpoint>(&path) {
                Ok(Some(checkpoint)) => Some(checkpoint.timestamp),
                _ => file_modified(&path),
            };
            if timestamp.is_some_and(|t| t < cutoff) {
                std::fs::remove_file(&path).map_err(|e| CanonError::io_with_path(e, &path))?;
                debug!("Removed expired checkpoint {}", path.display());
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Removed {} checkpoints older than {} days", removed, retention.num_days());
        }
        Ok(removed)
    }

    fn checkpoint_files(&self) -> Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CanonError::io_with_path(e, &self.dir)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| CanonError::io_with_path(e, &self.dir))?.path();
            let is_checkpoint = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".json") && !n.starts_with('.'));
            if is_checkpoint && path.is_file() {
                files.push(path);
            }
        }
        Ok(files)
    }
}

fn file_modified(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}
