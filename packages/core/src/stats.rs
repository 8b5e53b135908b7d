//! Aggregate statistics over all known job records.

use serde::{Deserialize, Serialize};

/// Counts by status plus total payload volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobStats {
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
    /// Sum of `payload_size_kb` across every record.
    pub total_payload_kb: f64,
}

impl JobStats {
    /// Total jobs known to the queue.
    pub fn total(&self) -> u64 {
        self.pending + self.completed + self.failed
    }

    /// Total processed jobs.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some((self.completed as f64 / total as f64) * 100.0)
        }
    }
}
