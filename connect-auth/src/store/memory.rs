//! In-memory store adapter.
//!
//! Data lives in a map behind a [`parking_lot::RwLock`]; clones share the same
//! map, so one store can be handed to the installer, the authenticator and the
//! registrar at once.
//!
//! # Example
//!
//! ```
//! use connect_auth::store::{CredentialStore, MemoryStore};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = MemoryStore::new();
//! store.set("clientInfo", json!({"clientKey": "jira:1"}), "jira:1").await.unwrap();
//! assert!(store.get("clientInfo", "jira:1").await.unwrap().is_some());
//! assert!(store.is_ephemeral());
//! # }
//! ```

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::{CredentialStore, StoreResult};

/// Ephemeral store backed by a shared hash map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<HashMap<(String, String), Value>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries across all tenants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, key: &str, tenant: &str) -> StoreResult<Option<Value>> {
        Ok(self.data.read().get(&(key.to_owned(), tenant.to_owned())).cloned())
    }

    async fn set(&self, key: &str, value: Value, tenant: &str) -> StoreResult<Value> {
        self.data.write().insert((key.to_owned(), tenant.to_owned()), value.clone());
        Ok(value)
    }

    async fn delete(&self, key: &str, tenant: &str) -> StoreResult<()> {
        self.data.write().remove(&(key.to_owned(), tenant.to_owned()));
        Ok(())
    }

    fn is_ephemeral(&self) -> bool {
        true
    }
}
