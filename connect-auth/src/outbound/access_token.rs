//! Cached client-credentials access tokens.
//!
//! Some hosts authorize API calls with short-lived bearer tokens instead of
//! per-request JWTs. A token is requested from the host's token endpoint with
//! the tenant's key and secret, then cached in the credential store under the
//! `|`-joined scope list until `created + expires_in` has passed.

use std::{fmt, sync::Arc};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::{
    error::{AuthError, Result},
    store::{CredentialStore, TenantCredential},
    token::now_unix,
};

/// Access token as returned by the host, plus the time it was received.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    /// Bearer token value.
    pub access_token: String,
    /// Lifetime in seconds from [`created`](Self::created).
    pub expires_in: i64,
    /// Group the token is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Value>,
    /// Name of that group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    /// Granted scopes, space separated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Token type, normally `bearer`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Unix time the token was received.
    #[serde(default)]
    pub created: i64,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("expires_in", &self.expires_in)
            .field("group_id", &self.group_id)
            .field("scope", &self.scope)
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

impl AccessToken {
    /// Whether the token has expired at `now` (Unix seconds).
    #[must_use]
    pub const fn is_expired_at(&self, now: i64) -> bool {
        self.created.saturating_add(self.expires_in) < now
    }
}

/// Store key under which tokens for `scopes` are cached.
#[must_use]
pub fn scope_key(scopes: &[String]) -> String {
    scopes.join("|")
}

/// Obtains and caches access tokens per tenant and scope set.
#[derive(Clone)]
pub struct AccessTokenProvider {
    client: Client,
    store: Arc<dyn CredentialStore>,
}

impl fmt::Debug for AccessTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTokenProvider").finish_non_exhaustive()
    }
}

impl AccessTokenProvider {
    /// Creates a provider caching into `store`.
    #[must_use]
    pub fn new(client: Client, store: Arc<dyn CredentialStore>) -> Self {
        Self { client, store }
    }

    /// Returns a valid token for `scopes`, requesting a new one if the cached
    /// token is missing or expired.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Config`] if the credential has no token endpoint
    /// - [`AuthError::Unauthenticated`] if the credential has no secret
    /// - [`AuthError::HttpError`] if the token endpoint fails
    /// - [`AuthError::Store`] if the cache cannot be read or written
    #[instrument(skip(self, credential), fields(tenant = %credential.client_key))]
    pub async fn access_token(
        &self,
        credential: &TenantCredential,
        scopes: &[String],
    ) -> Result<AccessToken> {
        let key = scope_key(scopes);
        let tenant = credential.client_key.as_str();

        if let Some(cached) = self.store.get(&key, tenant).await? {
            match serde_json::from_value::<AccessToken>(cached) {
                Ok(token) if !token.is_expired_at(now_unix()) => {
                    tracing::debug!("using cached access token");
                    return Ok(token);
                }
                Ok(_) => tracing::debug!("cached access token expired"),
                Err(e) => tracing::warn!(error = %e, "discarding unreadable cached access token"),
            }
        }

        let token = self.request_token(credential, scopes).await?;
        self.store.set(&key, serde_json::to_value(&token)?, tenant).await?;
        Ok(token)
    }

    async fn request_token(
        &self,
        credential: &TenantCredential,
        scopes: &[String],
    ) -> Result<AccessToken> {
        let token_url = credential.token_url().ok_or_else(|| {
            AuthError::Config(format!(
                "no token endpoint in capabilities of {}",
                credential.client_key
            ))
        })?;
        let secret = credential.secret().ok_or_else(|| {
            AuthError::Unauthenticated(format!(
                "Could not find sharedSecret in stored client data for {}",
                credential.client_key
            ))
        })?;

        let scope = scopes.join(" ");
        let response = self
            .client
            .post(token_url)
            .basic_auth(&credential.client_key, Some(secret))
            .form(&[("grant_type", "client_credentials"), ("scope", scope.as_str())])
            .send()
            .await?
            .error_for_status()?;

        let mut token: AccessToken = response.json().await?;
        token.created = now_unix();
        tracing::info!(expires_in = token.expires_in, "obtained access token");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_key() {
        let scopes = vec!["send_notification".to_owned(), "view_group".to_owned()];
        assert_eq!(scope_key(&scopes), "send_notification|view_group");
    }

    #[test]
    fn test_expiry() {
        let token: AccessToken = serde_json::from_value(serde_json::json!({
            "access_token": "abc",
            "expires_in": 3600,
            "created": 1_000
        }))
        .unwrap();
        assert!(!token.is_expired_at(4_600));
        assert!(token.is_expired_at(4_601));
    }

    #[test]
    fn test_huge_lifetime_never_expires() {
        let token: AccessToken = serde_json::from_value(serde_json::json!({
            "access_token": "abc",
            "expires_in": i64::MAX,
            "created": 1_000
        }))
        .unwrap();
        assert!(!token.is_expired_at(i64::MAX));
    }

    #[test]
    fn test_debug_hides_token() {
        let token: AccessToken = serde_json::from_value(serde_json::json!({
            "access_token": "very-secret",
            "expires_in": 1
        }))
        .unwrap();
        assert!(!format!("{token:?}").contains("very-secret"));
    }
}
