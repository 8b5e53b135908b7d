//! Queue actor owning one deployment's jobs.
//!
//! All mutations (submit, drain steps, wake-ups) run one at a time inside the
//! actor. Draining is a chain of `Drain` messages, one job per message, so
//! submissions and queries interleave between jobs while the FIFO order of
//! the work list is preserved.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use db::Database;
use db::repositories::{BatchStateRepository, JobRepository, KvRepository};
use hookq_core::{JobData, JobId, JobRecord, JobResult, JobStatus};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use serde_json::Value;
use storage::Storage;
use ulid::Generator;

use crate::batch::{BatchEngine, BatchOutcome};
use crate::config::{QueueConfig, Secrets};
use crate::context::{ClientFactory, DurableState, JobContext, NoApiClients};
use crate::handler::{JobHandlerRegistry, ResolvedHandler, guarded};
use crate::messages::QueueMessage;
use crate::tiering::{PayloadTiering, is_unreadable_payload};
use crate::wakeup::{TimerWakeUp, WakeUpScheduler};
use crate::QueueError;

/// Arguments for spawning a [`QueueActor`].
#[derive(Clone)]
pub struct QueueActorArgs {
    pub db: Database,
    pub storage: Storage,
    pub handlers: Arc<JobHandlerRegistry>,
    pub config: QueueConfig,
    pub secrets: Arc<Secrets>,
    pub clients: Arc<dyn ClientFactory>,
    pub scheduler: Arc<dyn WakeUpScheduler>,
}

impl QueueActorArgs {
    pub fn new(db: Database, storage: Storage, handlers: JobHandlerRegistry) -> Self {
        Self {
            db,
            storage,
            handlers: Arc::new(handlers),
            config: QueueConfig::default(),
            secrets: Arc::new(Secrets::default()),
            clients: Arc::new(NoApiClients),
            scheduler: Arc::new(TimerWakeUp::new()),
        }
    }

    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_secrets(mut self, secrets: Secrets) -> Self {
        self.secrets = Arc::new(secrets);
        self
    }

    pub fn with_clients(mut self, clients: Arc<dyn ClientFactory>) -> Self {
        self.clients = clients;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn WakeUpScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }
}

/// State for the queue actor.
pub struct QueueActorState {
    jobs: JobRepository,
    batches: BatchStateRepository,
    kv: KvRepository,
    tiering: PayloadTiering,
    engine: BatchEngine,
    handlers: Arc<JobHandlerRegistry>,
    config: QueueConfig,
    secrets: Arc<Secrets>,
    clients: Arc<dyn ClientFactory>,
    scheduler: Arc<dyn WakeUpScheduler>,
    ids: Generator,
    /// In-memory work list, FIFO.
    pending: VecDeque<JobId>,
    /// Batch jobs parked while another batch is active.
    deferred: VecDeque<JobId>,
    /// A `Drain` message is in flight.
    processing: bool,
}

impl QueueActorState {
    fn new(args: QueueActorArgs) -> Self {
        let kv = KvRepository::new(args.db.clone());
        let batches = BatchStateRepository::new(args.db.clone());
        let engine = BatchEngine::new(
            batches.clone(),
            kv.clone(),
            args.config.batch.clone(),
            args.scheduler.clone(),
        );

        Self {
            jobs: JobRepository::new(args.db),
            batches,
            kv,
            tiering: PayloadTiering::new(args.storage, args.config.large_payload_bytes()),
            engine,
            handlers: args.handlers,
            config: args.config,
            secrets: args.secrets,
            clients: args.clients,
            scheduler: args.scheduler,
            ids: Generator::new(),
            pending: VecDeque::new(),
            deferred: VecDeque::new(),
            processing: false,
        }
    }

    /// Re-populate the work list from durable `pending` records and re-arm
    /// the wake-up of a running batch.
    async fn recover(&mut self) -> Result<(), QueueError> {
        let active = self.batches.active().await?;

        for record in self.jobs.list_pending().await? {
            if active.as_ref().is_some_and(|b| b.job_id == record.id) {
                continue;
            }
            self.pending.push_back(record.id);
        }

        if let Some(batch) = active {
            let at = batch.next_wake_at.unwrap_or_else(Utc::now);
            tracing::info!("Re-arming wake-up of batch job {} at {}", batch.job_id, at);
            self.scheduler.schedule_once(at);
        }

        if !self.pending.is_empty() {
            tracing::info!(
                "Recovered {} pending jobs for queue {}",
                self.pending.len(),
                self.config.deployment_key
            );
        }
        Ok(())
    }

    /// Start a drain chain unless one is already running.
    fn kick(&mut self, myself: &ActorRef<QueueMessage>) {
        if !self.processing && !self.pending.is_empty() {
            self.processing = true;
            let _ = myself.send_message(QueueMessage::Drain);
        }
    }

    async fn submit(&mut self, data: JobData) -> Result<JobRecord, QueueError> {
        data.validate()?;
        let id = JobId::from(self.ids.generate().map_err(|_| QueueError::IdExhausted)?);
        let record = self.tiering.tier(id, data).await?;
        let record = self.jobs.create(&record).await?;

        tracing::info!(
            "Job submitted: {} ({}, {:.1} KB{})",
            record.id,
            record.routing.job_path,
            record.payload_size_kb,
            if record.is_large_payload { ", tiered" } else { "" }
        );
        Ok(record)
    }

    fn context(&self, record: &JobRecord, payload: Value, with_state: bool) -> Arc<JobContext> {
        let routing = &record.routing;
        Arc::new(JobContext {
            job_id: record.id,
            job_path: routing.job_path.clone(),
            tenant: routing.tenant.clone(),
            topic: routing.topic.clone(),
            payload,
            client: self.clients.client_for(&routing.tenant, &routing.tenant_config),
            tenant_config: routing.tenant_config.clone(),
            job_config: routing.job_config.clone(),
            secrets: self.secrets.clone(),
            state: with_state
                .then(|| DurableState::new(record.id, self.kv.clone(), self.scheduler.clone())),
        })
    }

    /// Process one job from the work list.
    ///
    /// A payload that is missing or does not decode fails the job. Other
    /// store failures return `Err` with the job still `pending`.
    async fn process(&mut self, job_id: JobId) -> Result<(), QueueError> {
        let Some(record) = self.jobs.get(job_id).await? else {
            tracing::warn!("Job {} vanished before processing", job_id);
            return Ok(());
        };
        if record.status != JobStatus::Pending {
            tracing::debug!("Skipping job {} already {}", job_id, record.status);
            return Ok(());
        }

        let Some(handler) = self.handlers.resolve(&record.routing.job_path) else {
            let error = QueueError::UnknownJobPath(record.routing.job_path.clone());
            return self.fail_job(job_id, &error.to_string()).await;
        };

        let payload = match self.tiering.load(&record).await {
            Ok(payload) => payload,
            Err(e) if is_unreadable_payload(&e) => {
                return self.fail_job(job_id, &e.to_string()).await;
            }
            Err(e) => return Err(e),
        };

        match handler {
            ResolvedHandler::Process(handler) => {
                tracing::info!("Processing job {} ({})", job_id, record.routing.job_path);
                let ctx = self.context(&record, payload, false);
                match guarded(handler.process(ctx)).await {
                    Ok(result) => self.complete_job(job_id, &result).await,
                    Err(error) => self.fail_job(job_id, &error).await,
                }
            }
            ResolvedHandler::Batch(handler) => {
                if let Some(active) = self.batches.active().await? {
                    if active.job_id != job_id {
                        tracing::info!(
                            "Deferring batch job {} while {} is active",
                            job_id,
                            active.job_id
                        );
                        self.deferred.push_back(job_id);
                    }
                    return Ok(());
                }

                let ctx = self.context(&record, payload, true);
                let outcome = self.engine.start(handler, ctx).await?;
                self.after_batch(job_id, &outcome);
                Ok(())
            }
        }
    }

    async fn complete_job(&self, job_id: JobId, result: &JobResult) -> Result<(), QueueError> {
        match self.jobs.mark_completed(job_id, result).await? {
            Some(_) => tracing::info!("Job {} completed: {}", job_id, result.summary),
            None => tracing::warn!("Job {} was no longer pending, completion dropped", job_id),
        }
        Ok(())
    }

    async fn fail_job(&self, job_id: JobId, error: &str) -> Result<(), QueueError> {
        match self.jobs.mark_failed(job_id, error).await? {
            Some(_) => tracing::warn!("Job {} failed: {}", job_id, error),
            None => tracing::warn!("Job {} was no longer pending, failure dropped", job_id),
        }
        Ok(())
    }

    /// Release deferred batch jobs once the active batch is over.
    fn after_batch(&mut self, job_id: JobId, outcome: &BatchOutcome) {
        match outcome {
            BatchOutcome::Yielded { wake_at } => {
                tracing::debug!("Batch job {} continues at {}", job_id, wake_at);
                return;
            }
            BatchOutcome::Completed(record) => {
                let summary = record
                    .as_ref()
                    .and_then(|r| r.result.as_ref())
                    .map_or("", |r| r.summary.as_str());
                tracing::info!("Batch job {} completed: {}", job_id, summary);
            }
            BatchOutcome::Failed(error) => tracing::warn!("Batch job {} failed: {}", job_id, error),
        }
        while let Some(job_id) = self.deferred.pop_back() {
            self.pending.push_front(job_id);
        }
    }

    /// Resume the job owning the active batch checkpoint.
    async fn wake_up(&mut self) -> Result<(), QueueError> {
        let Some(state) = self.batches.active().await? else {
            tracing::warn!("Wake-up with no active batch, ignoring");
            return Ok(());
        };
        let job_id = state.job_id;

        let record = match self.jobs.get(state.job_id).await? {
            Some(record) if record.status == JobStatus::Pending => record,
            Some(record) => {
                let outcome = self
                    .engine
                    .abort(state, format!("owning job is already {}", record.status))
                    .await?;
                self.after_batch(job_id, &outcome);
                return Ok(());
            }
            None => {
                let outcome = self.engine.abort(state, "owning job record is missing").await?;
                self.after_batch(job_id, &outcome);
                return Ok(());
            }
        };

        let handler = match self.handlers.resolve(&state.job_path) {
            Some(ResolvedHandler::Batch(handler)) => handler,
            _ => {
                let error = format!("no batch handler registered for {:?}", state.job_path);
                let outcome = self.engine.abort(state, error).await?;
                self.after_batch(job_id, &outcome);
                return Ok(());
            }
        };

        let payload = match self.tiering.load(&record).await {
            Ok(payload) => payload,
            Err(e) if is_unreadable_payload(&e) => {
                let outcome = self.engine.abort(state, e.to_string()).await?;
                self.after_batch(job_id, &outcome);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let ctx = self.context(&record, payload, true);
        let outcome = self.engine.resume(handler, ctx, state).await?;
        self.after_batch(job_id, &outcome);
        Ok(())
    }

    async fn job_data(&self, job_id: JobId) -> Result<JobData, QueueError> {
        let record = self
            .jobs
            .get(job_id)
            .await?
            .ok_or(QueueError::JobNotFound(job_id))?;
        self.tiering.job_data(&record).await
    }
}

/// Queue actor that manages a single deployment's queue.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueActorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting queue actor: {}", args.config.deployment_key);

        let mut state = QueueActorState::new(args);

        let target = myself.clone();
        state.scheduler.on_fire(Arc::new(move || {
            if target.send_message(QueueMessage::WakeUp).is_err() {
                tracing::warn!("Wake-up fired after the queue actor stopped");
            }
        }));

        state.recover().await?;
        state.kick(&myself);

        Ok(state)
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.scheduler.cancel();
        tracing::info!("Queue actor stopped: {}", state.config.deployment_key);
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Submit { job, reply } => {
                let result = state.submit(*job).await;
                if let Ok(record) = &result {
                    state.pending.push_back(record.id);
                    state.kick(&myself);
                }
                let _ = reply.send(result);
            }

            QueueMessage::Drain => {
                if let Some(job_id) = state.pending.pop_front()
                    && let Err(e) = state.process(job_id).await
                {
                    let delay = state.config.retry_delay;
                    tracing::error!(
                        "Job {} hit a store failure, retrying in {:?}: {}",
                        job_id,
                        delay,
                        e
                    );
                    let target = myself.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = target.send_message(QueueMessage::Requeue { job_id });
                    });
                }
                state.processing = false;
                state.kick(&myself);
            }

            QueueMessage::Requeue { job_id } => {
                state.pending.push_back(job_id);
                state.kick(&myself);
            }

            QueueMessage::WakeUp => {
                if let Err(e) = state.wake_up().await {
                    let retry_at = Utc::now()
                        + chrono::Duration::from_std(state.config.batch.wake_up_delay)
                            .unwrap_or_else(|_| chrono::Duration::seconds(1));
                    tracing::error!("Batch wake-up failed, retrying at {}: {}", retry_at, e);
                    state.scheduler.schedule_once(retry_at);
                }
                state.kick(&myself);
            }

            QueueMessage::GetJob { job_id, reply } => {
                let _ = reply.send(state.jobs.get(job_id).await.map_err(QueueError::from));
            }

            QueueMessage::GetJobData { job_id, reply } => {
                let _ = reply.send(state.job_data(job_id).await);
            }

            QueueMessage::ListJobs { limit, reply } => {
                let _ = reply.send(state.jobs.list_recent(limit).await.map_err(QueueError::from));
            }

            QueueMessage::GetStats { reply } => {
                let _ = reply.send(state.jobs.stats().await.map_err(QueueError::from));
            }

            QueueMessage::GetBatchState { reply } => {
                let _ = reply.send(state.batches.load().await.map_err(QueueError::from));
            }

            QueueMessage::Shutdown => {
                tracing::info!("Shutting down queue: {}", state.config.deployment_key);
                myself.stop(None);
            }
        }

        Ok(())
    }
}
