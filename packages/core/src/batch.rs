//! Checkpoint state for multi-quantum batch jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::JobId;

/// Durable key holding the single active batch state.
pub const BATCH_STATE_KEY: &str = "batch:processor:state";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Running,
    Failed,
}

/// Resume position inside a paginated collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchCursor {
    /// Handler-defined token for the page being worked on. `None` is the
    /// handler's starting page.
    #[serde(default)]
    pub page: Option<Value>,
    /// Items of that page already processed.
    #[serde(default)]
    pub offset: usize,
}

/// Progress of the batch job currently spread across wake-ups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProcessorState {
    /// The job this state belongs to. Wake-ups resume exactly this job.
    pub job_id: JobId,
    pub job_path: String,
    pub status: BatchStatus,
    pub cursor: BatchCursor,
    /// Item results of the current page, handed to the page-complete hook.
    #[serde(default)]
    pub page_results: Vec<Value>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub batches_completed: u32,
    #[serde(default)]
    pub completed_count: u64,
    #[serde(default)]
    pub total_count: Option<u64>,
    #[serde(default)]
    pub next_wake_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchProcessorState {
    pub fn new(job_id: JobId, job_path: impl Into<String>, start: Option<Value>) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            job_path: job_path.into(),
            status: BatchStatus::Running,
            cursor: BatchCursor {
                page: start,
                offset: 0,
            },
            page_results: Vec::new(),
            page_size: None,
            batches_completed: 0,
            completed_count: 0,
            total_count: None,
            next_wake_at: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == BatchStatus::Running
    }

    /// Record one processed item of the current page.
    pub fn record_item(&mut self, result: Value) {
        self.page_results.push(result);
        self.cursor.offset += 1;
        self.completed_count += 1;
        self.touch();
    }

    /// Close the current page and point the cursor at `next`.
    pub fn advance_page(&mut self, next: Value) {
        self.cursor = BatchCursor {
            page: Some(next),
            offset: 0,
        };
        self.page_results.clear();
        self.touch();
    }

    /// 1-based number of the page currently being processed.
    pub fn batch_number(&self) -> u32 {
        self.batches_completed + 1
    }

    /// Number of pages in the collection, when its size is known.
    pub fn total_batches(&self) -> Option<u32> {
        let total = self.total_count?;
        let size = self.page_size.filter(|s| *s > 0)? as u64;
        u32::try_from(total.div_ceil(size)).ok()
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = BatchStatus::Failed;
        self.error = Some(error.into());
        self.next_wake_at = None;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cursor_tracks_offset_within_page_and_resets_on_advance() {
        let mut state = BatchProcessorState::new(JobId::new(), "export", None);
        state.record_item(json!(1));
        state.record_item(json!(2));
        assert_eq!(state.cursor.offset, 2);
        assert_eq!(state.completed_count, 2);
        assert_eq!(state.page_results.len(), 2);

        state.batches_completed += 1;
        state.advance_page(json!("page-2"));
        assert_eq!(state.cursor.page, Some(json!("page-2")));
        assert_eq!(state.cursor.offset, 0);
        assert!(state.page_results.is_empty());
        assert_eq!(state.completed_count, 2);
        assert_eq!(state.batch_number(), 2);
    }

    #[test]
    fn total_batches_needs_size_and_total() {
        let mut state = BatchProcessorState::new(JobId::new(), "export", None);
        assert_eq!(state.total_batches(), None);
        state.total_count = Some(25);
        state.page_size = Some(10);
        assert_eq!(state.total_batches(), Some(3));
        state.page_size = Some(0);
        assert_eq!(state.total_batches(), None);
    }

    #[test]
    fn failure_is_retained_with_cause() {
        let mut state = BatchProcessorState::new(JobId::new(), "export", None);
        state.next_wake_at = Some(Utc::now());
        state.mark_failed("upstream 500");
        assert!(!state.is_running());
        assert_eq!(state.error.as_deref(), Some("upstream 500"));
        assert!(state.next_wake_at.is_none());
    }
}
