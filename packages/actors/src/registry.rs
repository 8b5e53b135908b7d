//! Directory of running queue actors, keyed by deployment key.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::client::QueueClient;

/// Lookup of queue clients by deployment key.
///
/// This provides a way for ingress code to find the queue of a deployment
/// without passing references through the entire call stack.
#[derive(Default)]
pub struct QueueDirectory {
    queues: RwLock<HashMap<String, QueueClient>>,
}

impl QueueDirectory {
    /// Create a new empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the queue of a deployment, replacing any previous one.
    pub fn register(&self, deployment_key: &str, queue: QueueClient) {
        self.queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(deployment_key.to_string(), queue);
    }

    pub fn unregister(&self, deployment_key: &str) -> Option<QueueClient> {
        self.queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(deployment_key)
    }

    pub fn get(&self, deployment_key: &str) -> Option<QueueClient> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(deployment_key)
            .cloned()
    }
}

/// Global directory instance.
static DIRECTORY: std::sync::LazyLock<QueueDirectory> =
    std::sync::LazyLock::new(QueueDirectory::new);

/// Get the global queue directory.
pub fn global_directory() -> &'static QueueDirectory {
    &DIRECTORY
}
