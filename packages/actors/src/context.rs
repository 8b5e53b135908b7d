//! Everything a handler sees while processing one job.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use db::repositories::KvRepository;
use hookq_core::JobId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::Secrets;
use crate::wakeup::WakeUpScheduler;
use crate::QueueError;

/// Future returned by [`ApiClient::execute`].
pub type ApiFuture = Pin<Box<dyn Future<Output = Result<Value, ApiError>> + Send>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("No API client configured for tenant {0}")]
    Unconfigured(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("API returned errors: {0}")]
    Response(Value),
}

/// GraphQL-style client, pre-authenticated for one tenant.
pub trait ApiClient: Send + Sync {
    /// Run a query or mutation with `variables` and return the `data` part.
    fn execute(&self, query: &str, variables: Value) -> ApiFuture;
}

/// Builds the API client for a job's tenant.
pub trait ClientFactory: Send + Sync + 'static {
    fn client_for(&self, tenant: &str, tenant_config: &Value) -> Arc<dyn ApiClient>;
}

/// Client factory for deployments without an API connector.
///
/// Every call fails with [`ApiError::Unconfigured`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoApiClients;

struct UnconfiguredClient {
    tenant: String,
}

impl ApiClient for UnconfiguredClient {
    fn execute(&self, _query: &str, _variables: Value) -> ApiFuture {
        let tenant = self.tenant.clone();
        Box::pin(async move { Err(ApiError::Unconfigured(tenant)) })
    }
}

impl ClientFactory for NoApiClients {
    fn client_for(&self, tenant: &str, _tenant_config: &Value) -> Arc<dyn ApiClient> {
        Arc::new(UnconfiguredClient {
            tenant: tenant.to_string(),
        })
    }
}

/// Context passed to a handler.
///
/// Built from the routing snapshot stored on the job record, never from live
/// tenant configuration.
pub struct JobContext {
    pub job_id: JobId,
    pub job_path: String,
    pub tenant: String,
    pub topic: String,
    /// The reconstructed webhook body.
    pub payload: Value,
    pub client: Arc<dyn ApiClient>,
    pub tenant_config: Value,
    /// Job configuration with the per-invocation override merged in.
    pub job_config: Value,
    pub secrets: Arc<Secrets>,
    /// Durable checkpoint storage. Only present for batch handlers.
    pub state: Option<DurableState>,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("job_path", &self.job_path)
            .field("tenant", &self.tenant)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl JobContext {
    /// Durable state, or an error string suitable as a handler failure.
    pub fn durable_state(&self) -> Result<&DurableState, String> {
        self.state
            .as_ref()
            .ok_or_else(|| format!("job {} has no durable state", self.job_id))
    }
}

/// Checkpoint storage scoped to one job.
///
/// Keys live in the primary store as `checkpoint:<job id>:<key>`.
#[derive(Clone)]
pub struct DurableState {
    job_id: JobId,
    kv: KvRepository,
    scheduler: Arc<dyn WakeUpScheduler>,
}

impl DurableState {
    pub(crate) fn new(job_id: JobId, kv: KvRepository, scheduler: Arc<dyn WakeUpScheduler>) -> Self {
        Self {
            job_id,
            kv,
            scheduler,
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", checkpoint_prefix(self.job_id), key)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, QueueError> {
        Ok(self.kv.get(&self.key(key)).await?)
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), QueueError> {
        Ok(self.kv.set(&self.key(key), value).await?)
    }

    pub async fn delete(&self, key: &str) -> Result<bool, QueueError> {
        Ok(self.kv.delete(&self.key(key)).await?)
    }

    /// Every checkpoint of this job, keyed without the namespace prefix.
    pub async fn list(&self) -> Result<Vec<(String, Value)>, QueueError> {
        let prefix = checkpoint_prefix(self.job_id);
        let entries = self.kv.list_prefix(&prefix).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, value)| Some((key.strip_prefix(&prefix)?.to_string(), value)))
            .collect())
    }

    pub fn schedule_wake_up(&self, at: DateTime<Utc>) {
        self.scheduler.schedule_once(at);
    }

    pub fn pending_wake_up(&self) -> Option<DateTime<Utc>> {
        self.scheduler.pending()
    }

    pub fn clear_wake_up(&self) {
        self.scheduler.cancel();
    }
}

pub(crate) fn checkpoint_prefix(job_id: JobId) -> String {
    format!("checkpoint:{job_id}:")
}
