//! Tenant credentials established at installation.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{CLIENT_INFO_KEY, CredentialStore, StoreResult};

/// A tenant's symmetric signing key.
///
/// The value is redacted from `Debug`/`Display` output, wiped from memory on
/// drop, and only readable through [`expose`](Self::expose).
///
/// # Examples
///
/// ```
/// use connect_auth::store::SharedSecret;
///
/// let secret = SharedSecret::new("s3cr3t");
/// assert_eq!(format!("{secret:?}"), "SharedSecret(***)");
/// assert_eq!(secret.expose(), "s3cr3t");
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SharedSecret(String);

impl SharedSecret {
    /// Wraps a secret value.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw secret, for signing and verification only.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(***)")
    }
}

impl fmt::Display for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Everything the add-on knows about one installed tenant.
///
/// Field names follow the host's install payload (`clientKey`, `sharedSecret`,
/// `baseUrl`, ...). Older hosts send `oauthId`/`oauthSecret`, accepted as
/// aliases. Any other host-supplied metadata is kept verbatim in
/// [`extra`](Self::extra).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantCredential {
    /// Tenant key, unique per installation.
    #[serde(alias = "oauthId")]
    pub client_key: String,

    /// Signing secret for this tenant.
    #[serde(alias = "oauthSecret", default, skip_serializing_if = "Option::is_none")]
    pub shared_secret: Option<SharedSecret>,

    /// Host API root.
    pub base_url: String,

    /// Host public key, checked against the host's consumer info on install.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    /// Group the installation belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Value>,

    /// Display name of the group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,

    /// Room the add-on was installed into, for room-scoped installs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<Value>,

    /// URL of the host's capabilities document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities_url: Option<String>,

    /// Capabilities document fetched during installation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities_doc: Option<Value>,

    /// Remaining host metadata (`productType`, `serverVersion`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TenantCredential {
    /// The tenant secret, if the host supplied one.
    #[must_use]
    pub fn secret(&self) -> Option<&str> {
        self.shared_secret.as_ref().map(SharedSecret::expose).filter(|s| !s.is_empty())
    }

    /// Token endpoint advertised in the capabilities document.
    #[must_use]
    pub fn token_url(&self) -> Option<&str> {
        self.capabilities_doc
            .as_ref()?
            .pointer("/capabilities/oauth2Provider/tokenUrl")?
            .as_str()
    }
}

/// Loads the credential stored for `tenant`.
///
/// # Errors
///
/// Fails if the store fails or the stored record is not a credential.
pub async fn load_credential(
    store: &dyn CredentialStore,
    tenant: &str,
) -> StoreResult<Option<TenantCredential>> {
    match store.get(CLIENT_INFO_KEY, tenant).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Stores `credential` under its own client key.
///
/// # Errors
///
/// Fails if the credential cannot be serialized or the store fails.
pub async fn save_credential(
    store: &dyn CredentialStore,
    credential: &TenantCredential,
) -> StoreResult<()> {
    let value = serde_json::to_value(credential)?;
    store.set(CLIENT_INFO_KEY, value, &credential.client_key).await?;
    Ok(())
}

/// Removes the credential stored for `tenant`.
///
/// # Errors
///
/// Fails if the store fails.
pub async fn delete_credential(store: &dyn CredentialStore, tenant: &str) -> StoreResult<()> {
    store.delete(CLIENT_INFO_KEY, tenant).await
}
