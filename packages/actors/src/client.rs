//! Typed handle for talking to a queue actor.

use std::time::Duration;

use hookq_core::{BatchProcessorState, JobData, JobId, JobRecord, JobStats};
use ractor::concurrency::JoinHandle;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef, RpcReplyPort};

use crate::messages::QueueMessage;
use crate::queue_actor::{QueueActor, QueueActorArgs};
use crate::QueueError;

/// Client for one queue actor. Cheap to clone.
#[derive(Clone)]
pub struct QueueClient {
    actor: ActorRef<QueueMessage>,
    timeout: Duration,
}

impl QueueClient {
    pub fn new(actor: ActorRef<QueueMessage>, timeout: Duration) -> Self {
        Self { actor, timeout }
    }

    async fn call<T, F>(&self, build: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<Result<T, QueueError>>) -> QueueMessage,
    {
        match ractor::rpc::call(&self.actor, build, Some(self.timeout)).await {
            Ok(CallResult::Success(result)) => result,
            Ok(CallResult::Timeout) => Err(QueueError::Timeout),
            Ok(CallResult::SenderError) => {
                Err(QueueError::Actor("queue actor dropped the reply".to_string()))
            }
            Err(e) => Err(QueueError::Actor(e.to_string())),
        }
    }

    /// Submit a job and return its ID.
    pub async fn submit(&self, job: JobData) -> Result<JobId, QueueError> {
        Ok(self.enqueue(job).await?.id)
    }

    /// Submit a job and return the freshly persisted record.
    pub async fn enqueue(&self, job: JobData) -> Result<JobRecord, QueueError> {
        self.call(|reply| QueueMessage::Submit {
            job: Box::new(job),
            reply,
        })
        .await
    }

    pub async fn get_job_status(&self, job_id: JobId) -> Result<Option<JobRecord>, QueueError> {
        self.call(|reply| QueueMessage::GetJob { job_id, reply }).await
    }

    pub async fn get_job_data(&self, job_id: JobId) -> Result<JobData, QueueError> {
        self.call(|reply| QueueMessage::GetJobData { job_id, reply }).await
    }

    pub async fn list_jobs(&self, limit: usize) -> Result<Vec<JobRecord>, QueueError> {
        self.call(|reply| QueueMessage::ListJobs { limit, reply }).await
    }

    pub async fn get_stats(&self) -> Result<JobStats, QueueError> {
        self.call(|reply| QueueMessage::GetStats { reply }).await
    }

    pub async fn batch_state(&self) -> Result<Option<BatchProcessorState>, QueueError> {
        self.call(|reply| QueueMessage::GetBatchState { reply }).await
    }

    /// Trigger a wake-up from outside, e.g. from a cron job.
    pub fn wake_up(&self) -> Result<(), QueueError> {
        self.actor
            .send_message(QueueMessage::WakeUp)
            .map_err(|e| QueueError::Actor(e.to_string()))
    }

    pub fn shutdown(&self) -> Result<(), QueueError> {
        self.actor
            .send_message(QueueMessage::Shutdown)
            .map_err(|e| QueueError::Actor(e.to_string()))
    }
}

/// Spawn a queue actor and return a client for it.
pub async fn start_queue(
    args: QueueActorArgs,
) -> Result<(QueueClient, JoinHandle<()>), QueueError> {
    let name = format!("queue-{}", args.config.deployment_key);
    let timeout = args.config.call_timeout;

    let (actor, handle) = Actor::spawn(Some(name), QueueActor, args)
        .await
        .map_err(|e| QueueError::Actor(format!("Failed to spawn queue: {}", e)))?;

    Ok((QueueClient::new(actor, timeout), handle))
}
