//! Core domain types for the webhook job queue.
//!
//! This crate contains shared types used across all packages:
//! - JobData, JobRecord and JobStatus for submitted work
//! - BatchProcessorState for jobs resumed across wake-ups
//! - JobStats for the status API

mod batch;
mod job;
mod stats;

pub use batch::{BATCH_STATE_KEY, BatchCursor, BatchProcessorState, BatchStatus};
pub use job::{
    JobData, JobId, JobRecord, JobResult, JobStatus, PayloadRef, RoutingMetadata,
    ValidationError, merge_config,
};
pub use stats::JobStats;
