//! Persistence of the single batch processor checkpoint.

use chrono::Utc;
use hookq_core::{BATCH_STATE_KEY, BatchProcessorState, JobRecord, JobResult};

use super::kv_repo::{KvEntry, KvRepository};
use crate::{Database, DbError};

/// Repository for the `batch:processor:state` entry.
///
/// Terminal transitions touch the owning job record and the checkpoint in
/// one transaction so neither can be observed without the other.
#[derive(Clone)]
pub struct BatchStateRepository {
    db: Database,
    kv: KvRepository,
}

impl BatchStateRepository {
    pub fn new(db: Database) -> Self {
        Self {
            kv: KvRepository::new(db.clone()),
            db,
        }
    }

    /// Load the stored state, running or retained-failed.
    pub async fn load(&self) -> Result<Option<BatchProcessorState>, DbError> {
        self.kv.get(BATCH_STATE_KEY).await
    }

    /// Load the state only if it is still running.
    pub async fn active(&self) -> Result<Option<BatchProcessorState>, DbError> {
        Ok(self.load().await?.filter(BatchProcessorState::is_running))
    }

    /// Checkpoint progress.
    pub async fn save(&self, state: &BatchProcessorState) -> Result<(), DbError> {
        self.kv.set(BATCH_STATE_KEY, state).await
    }

    /// Mark the owning job completed and drop the checkpoint.
    pub async fn complete(
        &self,
        state: &BatchProcessorState,
        result: &JobResult,
    ) -> Result<Option<JobRecord>, DbError> {
        self.db
            .query(
                r#"
                BEGIN TRANSACTION;
                UPDATE type::thing('job', $job_id)
                    SET status = 'completed', result = $result, updated_at = $now
                    WHERE status = 'pending';
                DELETE type::thing('kv', $key);
                COMMIT TRANSACTION;
                "#,
            )
            .bind(("job_id", state.job_id.to_string()))
            .bind(("result", result.clone()))
            .bind(("now", Utc::now()))
            .bind(("key", BATCH_STATE_KEY))
            .await?
            .check()?;

        self.job(state).await
    }

    /// Mark the owning job failed and retain the failed checkpoint for
    /// inspection.
    pub async fn fail(&self, state: &BatchProcessorState) -> Result<Option<JobRecord>, DbError> {
        let error = state
            .error
            .clone()
            .unwrap_or_else(|| "batch processing failed".to_string());
        let entry = KvEntry::new(BATCH_STATE_KEY, serde_json::to_value(state)?);

        self.db
            .query(
                r#"
                BEGIN TRANSACTION;
                UPDATE type::thing('job', $job_id)
                    SET status = 'failed', error = $error, updated_at = $now
                    WHERE status = 'pending';
                UPSERT type::thing('kv', $key) CONTENT $entry;
                COMMIT TRANSACTION;
                "#,
            )
            .bind(("job_id", state.job_id.to_string()))
            .bind(("error", error))
            .bind(("now", Utc::now()))
            .bind(("key", BATCH_STATE_KEY))
            .bind(("entry", entry))
            .await?
            .check()?;

        self.job(state).await
    }

    async fn job(&self, state: &BatchProcessorState) -> Result<Option<JobRecord>, DbError> {
        let record: Option<JobRecord> = self.db.select(("job", state.job_id.to_string())).await?;
        Ok(record)
    }
}
