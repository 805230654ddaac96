//! Batch execution with checkpoint/resume.
//!
//! A [`BatchRunner`] drives any async per-query operation over a list of
//! query ids and keeps a [`BatchCheckpoint`] recording which ids are
//! processed, failed or still pending. Checkpoints are written through a
//! [`CheckpointStore`] so an interrupted run can be resumed later.

mod checkpoint;
mod runner;

pub use checkpoint::{BatchCheckpoint, CheckpointStore, CheckpointSummary};
pub use runner::{new_batch_id, BatchOutcome, BatchRunner};
