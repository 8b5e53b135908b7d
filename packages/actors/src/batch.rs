//! Batch continuation engine.
//!
//! Drives a [`BatchHandler`] through its collection one quantum at a time.
//! Every processed item advances the cursor in [`BatchProcessorState`]; when
//! the quantum's budget runs out the state is checkpointed and a single
//! wake-up is requested. A wake-up resumes from the checkpoint, never from
//! the start of the collection.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use db::repositories::{BatchStateRepository, KvRepository};
use hookq_core::{BatchProcessorState, JobRecord, JobResult};
use serde_json::json;

use crate::config::BatchConfig;
use crate::context::{JobContext, checkpoint_prefix};
use crate::handler::{BatchHandler, BatchSummary, guarded};
use crate::wakeup::WakeUpScheduler;
use crate::QueueError;

/// How a quantum ended.
#[derive(Debug)]
pub(crate) enum BatchOutcome {
    /// Budget spent; the batch continues at `wake_at`.
    Yielded { wake_at: DateTime<Utc> },
    /// Collection exhausted and the job completed.
    Completed(Option<JobRecord>),
    /// Unrecoverable error; job and state are failed.
    Failed(String),
}

#[derive(Clone)]
pub(crate) struct BatchEngine {
    batches: BatchStateRepository,
    kv: KvRepository,
    config: BatchConfig,
    scheduler: Arc<dyn WakeUpScheduler>,
}

struct Budget {
    started: Instant,
    items: usize,
    pages: usize,
}

impl BatchEngine {
    pub(crate) fn new(
        batches: BatchStateRepository,
        kv: KvRepository,
        config: BatchConfig,
        scheduler: Arc<dyn WakeUpScheduler>,
    ) -> Self {
        Self {
            batches,
            kv,
            config,
            scheduler,
        }
    }

    /// Create the checkpoint for a new batch job and run its first quantum.
    pub(crate) async fn start(
        &self,
        handler: Arc<dyn BatchHandler>,
        ctx: Arc<JobContext>,
    ) -> Result<BatchOutcome, QueueError> {
        let state = BatchProcessorState::new(ctx.job_id, &ctx.job_path, handler.start_cursor(&ctx));
        self.batches.save(&state).await?;
        tracing::info!("Started batch job {} ({})", ctx.job_id, ctx.job_path);
        self.run_quantum(handler, ctx, state).await
    }

    /// Run one quantum from the persisted cursor.
    pub(crate) async fn resume(
        &self,
        handler: Arc<dyn BatchHandler>,
        ctx: Arc<JobContext>,
        mut state: BatchProcessorState,
    ) -> Result<BatchOutcome, QueueError> {
        tracing::info!(
            "Resuming batch job {} at page {} offset {} ({} done)",
            state.job_id,
            state.batch_number(),
            state.cursor.offset,
            state.completed_count
        );
        state.next_wake_at = None;
        self.run_quantum(handler, ctx, state).await
    }

    /// Fail the batch without running the handler.
    pub(crate) async fn abort(
        &self,
        state: BatchProcessorState,
        error: impl Into<String>,
    ) -> Result<BatchOutcome, QueueError> {
        self.fail(state, error.into()).await
    }

    async fn run_quantum(
        &self,
        handler: Arc<dyn BatchHandler>,
        ctx: Arc<JobContext>,
        mut state: BatchProcessorState,
    ) -> Result<BatchOutcome, QueueError> {
        let mut budget = Budget {
            started: Instant::now(),
            items: 0,
            pages: 0,
        };

        loop {
            if self.spent(&budget) {
                return self.yield_quantum(state).await;
            }

            let page = match guarded(handler.fetch_page(ctx.clone(), state.cursor.page.clone())).await
            {
                Ok(page) => page,
                Err(e) => return self.fail(state, format!("fetching page failed: {e}")).await,
            };

            if state.page_size.is_none() && !page.items.is_empty() {
                state.page_size = Some(page.items.len());
            }
            if page.total_count.is_some() {
                state.total_count = page.total_count;
            }

            let skip = state.cursor.offset;
            for item in page.items.into_iter().skip(skip) {
                if self.spent(&budget) {
                    return self.yield_quantum(state).await;
                }

                match guarded(handler.on_batch_item(ctx.clone(), item)).await {
                    Ok(result) => {
                        state.record_item(result);
                        budget.items += 1;
                        tracing::debug!(
                            "Batch job {} processed item {}",
                            state.job_id,
                            state.completed_count
                        );
                    }
                    Err(e) => return self.fail(state, e).await,
                }
            }

            let summary = BatchSummary {
                results: state.page_results.clone(),
                batch_number: state.batch_number(),
                total_batches: state.total_batches(),
            };
            if let Err(e) = guarded(handler.on_batch_complete(ctx.clone(), summary)).await {
                return self.fail(state, e).await;
            }
            state.batches_completed += 1;
            budget.pages += 1;

            match page.next {
                Some(next) => {
                    state.advance_page(next);
                    self.batches.save(&state).await?;
                }
                None => return self.complete(state).await,
            }
        }
    }

    /// Budget checks only apply once the quantum made some progress.
    fn spent(&self, budget: &Budget) -> bool {
        if budget.items == 0 && budget.pages == 0 {
            return false;
        }
        let items_spent = self
            .config
            .max_items_per_quantum
            .is_some_and(|max| budget.items >= max);
        items_spent || budget.started.elapsed() >= self.config.quantum
    }

    async fn yield_quantum(&self, mut state: BatchProcessorState) -> Result<BatchOutcome, QueueError> {
        let delay = chrono::Duration::from_std(self.config.wake_up_delay)
            .unwrap_or_else(|_| chrono::Duration::seconds(1));
        let wake_at = Utc::now() + delay;
        state.next_wake_at = Some(wake_at);
        state.updated_at = Utc::now();

        self.batches.save(&state).await?;
        self.scheduler.schedule_once(wake_at);

        tracing::info!(
            "Batch job {} yielded after {} items, waking at {}",
            state.job_id,
            state.completed_count,
            wake_at
        );
        Ok(BatchOutcome::Yielded { wake_at })
    }

    async fn complete(&self, state: BatchProcessorState) -> Result<BatchOutcome, QueueError> {
        let result = JobResult::with_output(
            format!(
                "Processed {} items in {} batches",
                state.completed_count, state.batches_completed
            ),
            json!({
                "completed_count": state.completed_count,
                "batches": state.batches_completed,
                "total_count": state.total_count,
            }),
        );

        let record = self.batches.complete(&state, &result).await?;
        self.kv.delete_prefix(&checkpoint_prefix(state.job_id)).await?;
        self.scheduler.cancel();
        Ok(BatchOutcome::Completed(record))
    }

    async fn fail(
        &self,
        mut state: BatchProcessorState,
        error: String,
    ) -> Result<BatchOutcome, QueueError> {
        state.mark_failed(error.clone());
        self.batches.fail(&state).await?;
        self.scheduler.cancel();
        Ok(BatchOutcome::Failed(error))
    }
}
