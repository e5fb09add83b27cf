//! Tenant-scoped key-value storage.
//!
//! The add-on keeps everything it knows about a tenant in a store keyed by
//! `(record key, tenant key)`. Credentials live under [`CLIENT_INFO_KEY`];
//! cached access tokens live under their scope list.
//!
//! [`CredentialStore`] is the seam for real databases. [`MemoryStore`] is the
//! bundled adapter and reports itself as ephemeral, which makes the registrar
//! force registration at startup and deregistration at shutdown.

use async_trait::async_trait;
use serde_json::Value;

mod credential;
mod memory;

pub use credential::{
    SharedSecret, TenantCredential, delete_credential, load_credential, save_credential,
};
pub use memory::MemoryStore;

/// Record key under which tenant credentials are stored.
pub const CLIENT_INFO_KEY: &str = "clientInfo";

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors a store adapter reports.
///
/// Adapters map their backend-specific failures onto these variants.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A network or connection failure talking to the backend.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A stored value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The operation exceeded its time limit.
    #[error("Operation timeout")]
    Timeout,

    /// Any other backend failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Asynchronous, tenant-scoped key-value store.
///
/// Implementations must be `Send + Sync` and give last-writer-wins semantics
/// per `(key, tenant)` with read-after-write consistency.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Reads the value stored under `key` for `tenant`.
    async fn get(&self, key: &str, tenant: &str) -> StoreResult<Option<Value>>;

    /// Stores `value` under `key` for `tenant` and returns it.
    async fn set(&self, key: &str, value: Value, tenant: &str) -> StoreResult<Value>;

    /// Removes the value stored under `key` for `tenant`. Missing keys are not an error.
    async fn delete(&self, key: &str, tenant: &str) -> StoreResult<()>;

    /// Whether stored data is lost when the process exits.
    fn is_ephemeral(&self) -> bool {
        false
    }
}
