//! Job repository for the job record lifecycle.

use chrono::Utc;
use hookq_core::{JobId, JobRecord, JobResult, JobStats};
use serde::Deserialize;

use crate::{Database, DbError};

/// Repository for job persistence operations.
///
/// Records are keyed `job:<ulid>` and never deleted; terminal records stay
/// around for status queries.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new job record.
    pub async fn create(&self, record: &JobRecord) -> Result<JobRecord, DbError> {
        let created: Option<JobRecord> = self
            .db
            .create(("job", record.id.to_string()))
            .content(record.clone())
            .await?;

        created.ok_or_else(|| DbError::Query(format!("Failed to create job {}", record.id)))
    }

    /// Get a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Option<JobRecord>, DbError> {
        let record: Option<JobRecord> = self.db.select(("job", id.to_string())).await?;
        Ok(record)
    }

    /// All pending jobs in submission order.
    pub async fn list_pending(&self) -> Result<Vec<JobRecord>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM job WHERE status = 'pending' ORDER BY job_id ASC")
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(records)
    }

    /// The `limit` most recently created jobs, newest first.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<JobRecord>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM job ORDER BY job_id DESC LIMIT $limit")
            .bind(("limit", i64::try_from(limit).unwrap_or(i64::MAX)))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(records)
    }

    /// Move a pending job to `completed`.
    ///
    /// Returns `None` when the job is missing or already terminal.
    pub async fn mark_completed(
        &self,
        id: JobId,
        result: &JobResult,
    ) -> Result<Option<JobRecord>, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET status = 'completed', result = $result, updated_at = $now
                WHERE status = 'pending'
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("result", result.clone()))
            .bind(("now", Utc::now()))
            .await?;

        let records: Vec<JobRecord> = response.take(0)?;
        Ok(records.into_iter().next())
    }

    /// Move a pending job to `failed` with a human-readable cause.
    ///
    /// Returns `None` when the job is missing or already terminal.
    pub async fn mark_failed(&self, id: JobId, error: &str) -> Result<Option<JobRecord>, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET status = 'failed', error = $error, updated_at = $now
                WHERE status = 'pending'
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("error", error.to_string()))
            .bind(("now", Utc::now()))
            .await?;

        let records: Vec<JobRecord> = response.take(0)?;
        Ok(records.into_iter().next())
    }

    /// Counts by status and total payload size over every record.
    pub async fn stats(&self) -> Result<JobStats, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT status, count() AS count, math::sum(payload_size_kb) AS total_kb
                FROM job
                GROUP BY status
                "#,
            )
            .await?;

        #[derive(Deserialize)]
        struct StatusCount {
            status: Option<String>,
            count: i64,
            #[serde(default)]
            total_kb: f64,
        }

        let counts: Vec<StatusCount> = result.take(0)?;

        let mut stats = JobStats::default();
        for row in counts {
            let count = row.count.max(0) as u64;
            match row.status.as_deref() {
                Some("pending") => stats.pending += count,
                Some("completed") => stats.completed += count,
                Some("failed") => stats.failed += count,
                other => tracing::warn!("Ignoring jobs with unknown status {:?}", other),
            }
            stats.total_payload_kb += row.total_kb;
        }

        Ok(stats)
    }
}
