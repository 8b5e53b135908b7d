//! Message types for actor communication.

use hookq_core::{BatchProcessorState, JobData, JobId, JobRecord, JobStats};
use ractor::RpcReplyPort;

use crate::QueueError;

/// Messages for the QueueActor.
#[derive(Debug)]
pub enum QueueMessage {
    /// Tier and persist a new job, then queue it for draining.
    Submit {
        job: Box<JobData>,
        reply: RpcReplyPort<Result<JobRecord, QueueError>>,
    },

    /// Process the job at the head of the work list.
    Drain,

    /// Put a job that hit a store outage back on the work list.
    Requeue { job_id: JobId },

    /// Resume the active batch job.
    WakeUp,

    /// Get a job record by ID.
    GetJob {
        job_id: JobId,
        reply: RpcReplyPort<Result<Option<JobRecord>, QueueError>>,
    },

    /// Reconstruct the submission of a job, payload included.
    GetJobData {
        job_id: JobId,
        reply: RpcReplyPort<Result<JobData, QueueError>>,
    },

    /// The most recently created jobs, newest first.
    ListJobs {
        limit: usize,
        reply: RpcReplyPort<Result<Vec<JobRecord>, QueueError>>,
    },

    /// Get queue stats.
    GetStats {
        reply: RpcReplyPort<Result<JobStats, QueueError>>,
    },

    /// Get the persisted batch checkpoint, running or failed.
    GetBatchState {
        reply: RpcReplyPort<Result<Option<BatchProcessorState>, QueueError>>,
    },

    /// Stop the actor. Durable state is left for the next start.
    Shutdown,
}
