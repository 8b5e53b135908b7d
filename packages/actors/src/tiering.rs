//! Inline vs. blob-store placement of job payloads.

use hookq_core::{JobData, JobId, JobRecord, PayloadRef};
use serde_json::Value;
use storage::{Storage, StorageError, payload_key};

use crate::QueueError;

/// Decides where a payload lives and reads it back.
#[derive(Clone, Debug)]
pub struct PayloadTiering {
    storage: Storage,
    threshold_bytes: usize,
}

impl PayloadTiering {
    pub fn new(storage: Storage, threshold_bytes: usize) -> Self {
        Self {
            storage,
            threshold_bytes,
        }
    }

    /// Build the pending record for `data`, writing the payload body to the
    /// blob store first when it is over the threshold.
    ///
    /// Nothing is persisted to the primary store here. A failed blob write
    /// returns before a record exists.
    pub async fn tier(&self, id: JobId, data: JobData) -> Result<JobRecord, QueueError> {
        let (routing, payload) = data.into_parts();
        let size = serde_json::to_vec(&payload)?.len();
        let size_kb = size as f64 / 1024.0;

        if size > self.threshold_bytes {
            let key = payload_key(&id.to_string());
            self.storage.put_payload(&key, &payload).await?;
            tracing::info!("Tiered {:.1} KB payload of job {} to {}", size_kb, id, key);
            Ok(JobRecord::tiered(id, routing, key, size_kb))
        } else {
            Ok(JobRecord::inline(id, routing, payload, size_kb))
        }
    }

    /// Reconstruct the payload body of `record`.
    pub async fn load(&self, record: &JobRecord) -> Result<Value, QueueError> {
        match &record.payload {
            PayloadRef::Inline { body } => Ok(body.clone()),
            PayloadRef::Blob { key } => Ok(self.storage.get_payload(key).await?),
        }
    }

    /// Reconstruct the full submission of `record`.
    pub async fn job_data(&self, record: &JobRecord) -> Result<JobData, QueueError> {
        let payload = self.load(record).await?;
        Ok(JobData::from_parts(record.routing.clone(), payload))
    }
}

/// Whether a load failed for good: the blob is gone or does not decode.
pub(crate) fn is_unreadable_payload(err: &QueueError) -> bool {
    matches!(
        err,
        QueueError::Storage(StorageError::NotFound(_) | StorageError::Json(_))
            | QueueError::Serialization(_)
    )
}
