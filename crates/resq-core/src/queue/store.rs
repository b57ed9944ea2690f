//! Persistence seam for the durable queue.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

/// Records of one namespace: id -> serialized record.
pub type Records = BTreeMap<String, serde_json::Value>;

/// Key-value store the queue persists into.
///
/// Each call is atomic: after `set` returns, a later `get` (in this or a
/// future process) sees exactly the written mapping.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// All records of `namespace`; empty if nothing was ever written.
    async fn get(&self, namespace: &str) -> Result<Records>;
    /// Replace the records of `namespace`.
    async fn set(&self, namespace: &str, records: &Records) -> Result<()>;
    /// Drop `namespace` entirely.
    async fn delete(&self, namespace: &str) -> Result<()>;
}

/// Process-local store for tests and for running without persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: Mutex<HashMap<String, Records>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn namespaces(&self) -> std::sync::MutexGuard<'_, HashMap<String, Records>> {
        self.namespaces
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn get(&self, namespace: &str) -> Result<Records> {
        Ok(self.namespaces().get(namespace).cloned().unwrap_or_default())
    }

    async fn set(&self, namespace: &str, records: &Records) -> Result<()> {
        self.namespaces()
            .insert(namespace.to_string(), records.clone());
        Ok(())
    }

    async fn delete(&self, namespace: &str) -> Result<()> {
        self.namespaces().remove(namespace);
        Ok(())
    }
}
