//! Job domain types for webhook work items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Ulid> for JobId {
    fn from(value: Ulid) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a job.
///
/// `Pending` moves to exactly one of the terminal states and never back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Human-readable summary of the result.
    pub summary: String,
    /// Optional structured output data as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl JobResult {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            output: None,
        }
    }

    pub fn with_output(summary: impl Into<String>, output: Value) -> Self {
        Self {
            summary: summary.into(),
            output: Some(output),
        }
    }
}

/// Routing metadata captured at enqueue time.
///
/// Processing only ever reads this snapshot, so a job replays the same way
/// even after the tenant's live configuration has changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingMetadata {
    /// Logical handler path, e.g. `hello-world` or `orders/tag`.
    pub job_path: String,
    /// Tenant (shop) the event originated from.
    pub tenant: String,
    /// Originating webhook topic.
    pub topic: String,
    #[serde(default)]
    pub tenant_config: Value,
    /// Job configuration with any per-invocation override already merged in.
    #[serde(default)]
    pub job_config: Value,
}

/// A job submission as received from the webhook layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobData {
    pub tenant: String,
    pub job_path: String,
    pub topic: String,
    #[serde(default)]
    pub tenant_config: Value,
    #[serde(default)]
    pub job_config: Value,
    /// Per-invocation override merged over `job_config`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_override: Option<Value>,
    /// The webhook body. This is the variable-size part that gets tiered.
    pub payload: Value,
}

impl JobData {
    pub fn new(
        tenant: impl Into<String>,
        job_path: impl Into<String>,
        topic: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            job_path: job_path.into(),
            topic: topic.into(),
            tenant_config: Value::Null,
            job_config: Value::Null,
            config_override: None,
            payload,
        }
    }

    pub fn with_tenant_config(mut self, config: Value) -> Self {
        self.tenant_config = config;
        self
    }

    pub fn with_job_config(mut self, config: Value) -> Self {
        self.job_config = config;
        self
    }

    pub fn with_override(mut self, config_override: Value) -> Self {
        self.config_override = Some(config_override);
        self
    }

    /// Reject malformed submissions before anything is written.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tenant.trim().is_empty() {
            return Err(ValidationError::MissingField("tenant"));
        }
        if self.topic.trim().is_empty() {
            return Err(ValidationError::MissingField("topic"));
        }
        if self.job_path.trim().is_empty() {
            return Err(ValidationError::MissingField("job_path"));
        }
        if !self
            .job_path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/'))
        {
            return Err(ValidationError::InvalidJobPath(self.job_path.clone()));
        }
        if let Some(over) = &self.config_override
            && !over.is_object()
        {
            return Err(ValidationError::InvalidOverride);
        }
        Ok(())
    }

    /// Split into the routing snapshot and the payload body.
    pub fn into_parts(self) -> (RoutingMetadata, Value) {
        let job_config = match self.config_override {
            Some(over) => merge_config(self.job_config, over),
            None => self.job_config,
        };
        let routing = RoutingMetadata {
            job_path: self.job_path,
            tenant: self.tenant,
            topic: self.topic,
            tenant_config: self.tenant_config,
            job_config,
        };
        (routing, self.payload)
    }

    /// Reassemble job data from a stored routing snapshot and payload.
    pub fn from_parts(routing: RoutingMetadata, payload: Value) -> Self {
        Self {
            tenant: routing.tenant,
            job_path: routing.job_path,
            topic: routing.topic,
            tenant_config: routing.tenant_config,
            job_config: routing.job_config,
            config_override: None,
            payload,
        }
    }
}

/// Shallow merge of `over` into `base`. Non-object bases are replaced.
pub fn merge_config(base: Value, over: Value) -> Value {
    match (base, over) {
        (Value::Object(mut base), Value::Object(over)) => {
            for (key, value) in over {
                base.insert(key, value);
            }
            Value::Object(base)
        }
        (_, over) => over,
    }
}

/// Where a job's payload body lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadRef {
    /// Small payload kept on the record itself.
    Inline { body: Value },
    /// Large payload tiered out to the blob store under `key`.
    Blob { key: String },
}

/// Persisted metadata for one submitted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(rename = "job_id")]
    pub id: JobId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: JobStatus,
    pub is_large_payload: bool,
    pub payload: PayloadRef,
    pub payload_size_kb: f64,
    pub routing: RoutingMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
}

impl JobRecord {
    /// A pending record carrying its payload inline.
    pub fn inline(id: JobId, routing: RoutingMetadata, body: Value, payload_size_kb: f64) -> Self {
        Self::pending(id, routing, PayloadRef::Inline { body }, false, payload_size_kb)
    }

    /// A pending record whose payload lives in the blob store under `key`.
    pub fn tiered(
        id: JobId,
        routing: RoutingMetadata,
        key: impl Into<String>,
        payload_size_kb: f64,
    ) -> Self {
        Self::pending(
            id,
            routing,
            PayloadRef::Blob { key: key.into() },
            true,
            payload_size_kb,
        )
    }

    fn pending(
        id: JobId,
        routing: RoutingMetadata,
        payload: PayloadRef,
        is_large_payload: bool,
        payload_size_kb: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            status: JobStatus::Pending,
            is_large_payload,
            payload,
            payload_size_kb,
            routing,
            error: None,
            result: None,
        }
    }

    /// The blob key, when the payload was tiered.
    pub fn blob_key(&self) -> Option<&str> {
        match &self.payload {
            PayloadRef::Blob { key } => Some(key),
            PayloadRef::Inline { .. } => None,
        }
    }
}

/// Malformed job submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid job path: {0:?}")]
    InvalidJobPath(String),
    #[error("config override must be a JSON object")]
    InvalidOverride,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> JobData {
        JobData::new("shop-1.example", "hello-world", "orders/create", json!({"id": 1}))
    }

    #[test]
    fn validate_rejects_malformed_data() {
        assert!(data().validate().is_ok());

        let mut missing = data();
        missing.tenant = "  ".into();
        assert_eq!(
            missing.validate(),
            Err(ValidationError::MissingField("tenant"))
        );

        let mut bad_path = data();
        bad_path.job_path = "../etc/passwd".into();
        assert!(matches!(
            bad_path.validate(),
            Err(ValidationError::InvalidJobPath(_))
        ));

        let bad_override = data().with_override(json!("nope"));
        assert_eq!(
            bad_override.validate(),
            Err(ValidationError::InvalidOverride)
        );
    }

    #[test]
    fn override_is_merged_into_job_config() {
        let (routing, payload) = data()
            .with_job_config(json!({"tag": "vip", "limit": 5}))
            .with_override(json!({"limit": 10}))
            .into_parts();
        assert_eq!(routing.job_config, json!({"tag": "vip", "limit": 10}));
        assert_eq!(payload, json!({"id": 1}));
    }

    #[test]
    fn inline_record_starts_pending_without_blob() {
        let (routing, body) = data().into_parts();
        let record = JobRecord::inline(JobId::new(), routing, body.clone(), 0.1);
        assert_eq!(record.status, JobStatus::Pending);
        assert!(!record.is_large_payload);
        assert!(record.blob_key().is_none());
        assert_eq!(record.payload, PayloadRef::Inline { body });
    }

    #[test]
    fn tiered_record_serializes_blob_reference() {
        let (routing, _) = data().into_parts();
        let id = JobId::new();
        let record = JobRecord::tiered(id, routing, format!("payloads/{id}.json"), 512.0);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["job_id"], json!(id.to_string()));
        assert_eq!(value["payload"]["kind"], json!("blob"));
        assert_eq!(value["is_large_payload"], json!(true));
        assert!(value.get("error").is_none());
    }
}
