//! Installation handshake.
//!
//! A host installs the add-on by posting a JSON payload carrying its base URL,
//! the tenant key (`clientKey`) and the shared secret both sides will sign with.
//! [`Installer::install`] runs the handshake in a fixed order:
//!
//! 1. **received**: the payload must name `baseUrl` and `clientKey` (400)
//! 2. **whitelist**: the base URL's host must match a configured glob (401)
//! 3. **verification**: the configured [`VerificationStrategy`] confirms the
//!    host is who it claims to be (401)
//! 4. **persist**: the credential is stored, then `Installed` and
//!    `HostSettingsSaved` are emitted
//!
//! Nothing is persisted unless every earlier step succeeds. The boundary
//! answers `204 No Content` on success and [`AuthError::status_code`] otherwise.
//!
//! [`AuthError::status_code`]: crate::error::AuthError::status_code

use std::{sync::Arc, time::Duration};

use regex::Regex;
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::instrument;
use url::Url;

use crate::{
    config::{AddonConfig, VerificationStrategy},
    error::{AuthError, Result},
    events::{EventBus, LifecycleEvent},
    outbound::AccessTokenProvider,
    reliability::{RetryPolicy, retry_with_backoff},
    store::{CredentialStore, TenantCredential, save_credential},
};

pub mod host_info;

pub use host_info::{HostInfo, fetch_capabilities, fetch_host_info};

/// Runs installation and uninstallation callbacks.
pub struct Installer {
    client: Client,
    store: Arc<dyn CredentialStore>,
    events: EventBus,
    tokens: AccessTokenProvider,
    whitelist: Vec<String>,
    patterns: Vec<Regex>,
    verification: VerificationStrategy,
    key_fetch_policy: RetryPolicy,
    key_fetch_timeout: Duration,
    access_token_scopes: Vec<String>,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("whitelist", &self.whitelist)
            .field("verification", &self.verification)
            .finish_non_exhaustive()
    }
}

impl Installer {
    /// Creates an installer from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if a whitelist glob does not compile.
    pub fn new(
        config: &AddonConfig,
        client: Client,
        store: Arc<dyn CredentialStore>,
        events: EventBus,
    ) -> Result<Self> {
        let installation = &config.installation;
        Ok(Self {
            tokens: AccessTokenProvider::new(client.clone(), Arc::clone(&store)),
            client,
            store,
            events,
            whitelist: config.whitelist(),
            patterns: config.whitelist_patterns()?,
            verification: installation.verification,
            key_fetch_policy: RetryPolicy::fixed(
                installation.key_fetch_attempts,
                installation.key_fetch_interval(),
            ),
            key_fetch_timeout: installation.key_fetch_timeout(),
            access_token_scopes: installation.access_token_scopes.clone(),
        })
    }

    /// Handles an installation callback.
    ///
    /// Returns the stored credential.
    ///
    /// # Errors
    ///
    /// - [`AuthError::BadRequest`] if `baseUrl` or `clientKey` is missing
    /// - [`AuthError::Forbidden`] if the host is not whitelisted or fails verification
    /// - [`AuthError::Store`] if the credential cannot be persisted
    #[instrument(skip_all, fields(client_key = tracing::field::Empty))]
    pub async fn install(&self, payload: &Value) -> Result<TenantCredential> {
        let received = Self::received(payload, self.verification)?;
        tracing::Span::current().record("client_key", received.client_key.as_str());

        self.check_whitelist(&received.base_url)?;

        let mut credential = Self::credential_from(payload, &received)?;
        match self.verification {
            VerificationStrategy::PublicKey => self.verify_public_key(&credential).await?,
            VerificationStrategy::Capabilities => self.verify_capabilities(&mut credential).await?,
            VerificationStrategy::Disabled => {
                tracing::warn!(host = %received.base_url, "Skipped host verification");
            }
        }

        save_credential(self.store.as_ref(), &credential).await?;
        tracing::info!(host = %credential.base_url, "Saved tenant details");

        self.events.emit(LifecycleEvent::Installed {
            client_key: credential.client_key.clone(),
            base_url: credential.base_url.clone(),
        });
        self.events.emit(LifecycleEvent::HostSettingsSaved {
            client_key: credential.client_key.clone(),
        });
        Ok(credential)
    }

    /// Handles an uninstallation callback for `client_key`.
    ///
    /// Only notifies observers; removing stored data is up to them.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::BadRequest`] if `client_key` is empty.
    pub fn uninstall(&self, client_key: &str) -> Result<()> {
        if client_key.is_empty() {
            return Err(AuthError::BadRequest("No client key provided.".to_owned()));
        }
        self.events.emit(LifecycleEvent::Uninstalled { client_key: client_key.to_owned() });
        Ok(())
    }

    /// Checks that the host of `base_url` matches the whitelist.
    ///
    /// An empty whitelist accepts every host.
    ///
    /// # Errors
    ///
    /// - [`AuthError::BadRequest`] if `base_url` has no host
    /// - [`AuthError::Forbidden`] if no pattern matches
    pub fn check_whitelist(&self, base_url: &str) -> Result<()> {
        if self.patterns.is_empty() {
            return Ok(());
        }
        let host = Url::parse(base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_owned))
            .ok_or_else(|| AuthError::BadRequest(format!("Invalid baseUrl {base_url}.")))?;

        if self.patterns.iter().any(|pattern| pattern.is_match(&host)) {
            return Ok(());
        }
        Err(AuthError::Forbidden(format!(
            "Host at {base_url} is not authorized to register as the host does not match the \
             registration whitelist ({}).",
            self.whitelist.join(",")
        )))
    }

    fn received(payload: &Value, verification: VerificationStrategy) -> Result<Received> {
        let Some(object) = payload.as_object() else {
            return Err(AuthError::BadRequest("No registration info provided.".to_owned()));
        };
        let text = |name: &str| {
            object.get(name).and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_owned)
        };

        // Capabilities-based hosts identify themselves by their capabilities URL.
        let base_url = text("baseUrl").or_else(|| {
            (verification == VerificationStrategy::Capabilities)
                .then(|| text("capabilitiesUrl"))
                .flatten()
        });
        let Some(base_url) = base_url else {
            return Err(AuthError::BadRequest(
                "No baseUrl provided in registration info.".to_owned(),
            ));
        };
        let Some(client_key) = text("clientKey").or_else(|| text("oauthId")) else {
            return Err(AuthError::BadRequest(format!(
                "No client key provided for host at {base_url}."
            )));
        };
        Ok(Received { base_url, client_key })
    }

    fn credential_from(payload: &Value, received: &Received) -> Result<TenantCredential> {
        let mut object: Map<String, Value> = payload.as_object().cloned().unwrap_or_default();
        object.remove("oauthId");
        object.insert("clientKey".to_owned(), Value::String(received.client_key.clone()));
        object.insert("baseUrl".to_owned(), Value::String(received.base_url.clone()));
        serde_json::from_value(Value::Object(object))
            .map_err(|e| AuthError::BadRequest(format!("Invalid registration info: {e}")))
    }

    async fn verify_public_key(&self, credential: &TenantCredential) -> Result<()> {
        let base_url = credential.base_url.as_str();
        let Some(expected) = credential.public_key.as_deref().filter(|k| !k.is_empty()) else {
            return Err(AuthError::Forbidden(format!(
                "No public key provided for host at {base_url}."
            )));
        };

        let info = retry_with_backoff(
            &self.key_fetch_policy,
            || fetch_host_info(&self.client, base_url, self.key_fetch_timeout),
            |_| true,
        )
        .await
        .map_err(|e| {
            AuthError::Forbidden(format!("Unable to verify public key for host {base_url}: {e}"))
        })?;

        if info.public_key != expected {
            tracing::error!(host = %base_url, "Host public key mismatch, rejecting installation");
            return Err(AuthError::Forbidden(format!(
                "The public key for {base_url} did not match the initially provided public key."
            )));
        }
        Ok(())
    }

    async fn verify_capabilities(&self, credential: &mut TenantCredential) -> Result<()> {
        let Some(url) = credential.capabilities_url.clone() else {
            return Err(AuthError::Forbidden(format!(
                "No capabilities URL provided for host at {}.",
                credential.base_url
            )));
        };

        let document = fetch_capabilities(&self.client, &url).await.map_err(|e| match e {
            AuthError::Forbidden(_) => e,
            other => {
                AuthError::Forbidden(format!("Unable to verify capabilities at {url}: {other}"))
            }
        })?;
        if let Some(api) = document.pointer("/links/api").and_then(Value::as_str) {
            api.clone_into(&mut credential.base_url);
        }
        credential.capabilities_doc = Some(document);

        let token = self.tokens.access_token(credential, &self.access_token_scopes).await?;
        credential.group_id = token.group_id;
        credential.group_name = token.group_name;
        Ok(())
    }
}

struct Received {
    base_url: String,
    client_key: String,
}
