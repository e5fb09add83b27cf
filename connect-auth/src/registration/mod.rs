//! Self-registration with development hosts.
//!
//! At startup the add-on asks every configured host to install it by posting
//! its descriptor URL to the host's plugin manager (UPM). The hosts that
//! accepted are remembered so the add-on can remove itself again at shutdown.
//!
//! ```text
//! HEAD  <host>/rest/plugins/1.0/              -> upm-token header
//! GET   <host>/rest/plugins/1.0/              -> already installed? (unless forced)
//! POST  <host>/rest/plugins/1.0/?token=<t>    -> 202
//! DELETE <host>/rest/plugins/1.0/<key>-key    (deregistration)
//! ```

pub mod tunnel;

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use reqwest::{Client, StatusCode, header::CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinSet;
use tracing::instrument;
use url::{Host, Url};

pub use tunnel::{LocalTunnel, TunnelProvider};

use crate::{
    config::AddonConfig,
    error::{AuthError, Result},
    events::{EventBus, LifecycleEvent},
    install::fetch_host_info,
    store::{CredentialStore, delete_credential},
    transport::{BasicAuth, redact_url, split_credentials},
};

/// Plugin manager REST root, relative to a host URL.
pub const UPM_PATH: &str = "/rest/plugins/1.0/";

const UPM_TOKEN_HEADER: &str = "upm-token";
const REMOTE_INSTALL_CONTENT_TYPE: &str = "application/vnd.atl.plugins.remote.install+json";
const HOST_INFO_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct InstalledPlugins {
    #[serde(default)]
    plugins: Vec<InstalledPlugin>,
}

#[derive(Debug, Deserialize)]
struct InstalledPlugin {
    key: String,
}

/// Talks to one host's plugin manager.
#[derive(Clone)]
struct Upm {
    client: Client,
    base: String,
    auth: Option<BasicAuth>,
}

impl Upm {
    fn new(client: Client, host: &str) -> Result<Self> {
        let url = Url::parse(host)
            .map_err(|e| AuthError::Config(format!("invalid host URL {}: {e}", redact_url(host))))?;
        let (base, auth) = split_credentials(&url);
        Ok(Self { client, base, auth })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}{path}", self.base));
        match &self.auth {
            Some(auth) => auth.apply(builder),
            None => builder,
        }
    }

    async fn token(&self) -> Result<String> {
        let response = self.request(reqwest::Method::HEAD, UPM_PATH).send().await?;
        check_success(response.status())?;
        Ok(response
            .headers()
            .get(UPM_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned())
    }

    async fn is_installed(&self, addon_key: &str) -> Result<bool> {
        let response = self.request(reqwest::Method::GET, UPM_PATH).send().await?;
        check_success(response.status())?;
        let installed: InstalledPlugins = response.json().await?;
        Ok(installed.plugins.iter().any(|plugin| plugin.key == addon_key))
    }

    async fn install(&self, token: &str, descriptor_url: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, UPM_PATH)
            .query(&[("token", token)])
            .header(CONTENT_TYPE, REMOTE_INSTALL_CONTENT_TYPE)
            .body(json!({ "pluginUri": descriptor_url }).to_string())
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::ACCEPTED {
            return Ok(());
        }
        Err(AuthError::HostResponse {
            status: status.as_u16(),
            message: host_message(response).await,
        })
    }

    async fn uninstall(&self, addon_key: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("{UPM_PATH}{addon_key}-key"))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(AuthError::HostResponse {
            status: status.as_u16(),
            message: host_message(response).await,
        })
    }
}

fn check_success(status: StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(AuthError::HostResponse {
            status: status.as_u16(),
            message: "plugin manager request failed".to_owned(),
        })
    }
}

/// Response body for the log, unless it is an HTML error page.
async fn host_message(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    let trimmed = body.trim_start().to_ascii_lowercase();
    if trimmed.starts_with("<html") || trimmed.starts_with("<!doctype html") {
        String::new()
    } else {
        body
    }
}

/// What the per-host tasks need, detached from the registrar.
#[derive(Clone)]
struct RegistrationJob {
    client: Client,
    addon_key: String,
    descriptor_url: String,
    force: bool,
}

impl RegistrationJob {
    /// Registers with `host`, returning the host's tenant key on success.
    #[instrument(skip_all, fields(host = %redact_url(&host)))]
    async fn run(self, host: String) -> Option<(String, String)> {
        let info = match fetch_host_info(&self.client, &host, HOST_INFO_TIMEOUT).await {
            Ok(info) => info,
            Err(e) => {
                tracing::debug!(error = %e, "no compatible host, skipping");
                return None;
            }
        };

        match self.install(&host).await {
            Ok(()) => {
                tracing::info!(tenant = %info.key, "Registered with host");
                Some((host, info.key))
            }
            Err(e) => {
                tracing::error!(tenant = %info.key, error = %e, "Failed to register with host");
                None
            }
        }
    }

    async fn install(&self, host: &str) -> Result<()> {
        let upm = Upm::new(self.client.clone(), host)?;
        let token = upm.token().await?;
        if !self.force && upm.is_installed(&self.addon_key).await? {
            tracing::debug!("add-on already installed");
            return Ok(());
        }
        upm.install(&token, &self.descriptor_url).await
    }
}

/// Registers the add-on with its configured hosts and removes it again.
pub struct Registrar {
    addon_key: String,
    hosts: Vec<String>,
    port: u16,
    local_base_url: Mutex<Url>,
    base_url_overridden: bool,
    enabled: bool,
    force_register: bool,
    force_deregister: bool,
    client: Client,
    store: Arc<dyn CredentialStore>,
    events: EventBus,
    tunnel: Option<Arc<dyn TunnelProvider>>,
    registrations: Mutex<HashMap<String, String>>,
}

impl fmt::Debug for Registrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hosts: Vec<String> = self.hosts.iter().map(|h| redact_url(h)).collect();
        f.debug_struct("Registrar")
            .field("addon_key", &self.addon_key)
            .field("hosts", &hosts)
            .field("local_base_url", &self.local_base_url.lock().as_str())
            .finish_non_exhaustive()
    }
}

impl Registrar {
    /// Creates a registrar for the hosts listed in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the local base URL is invalid.
    pub fn new(
        config: &AddonConfig,
        client: Client,
        store: Arc<dyn CredentialStore>,
        events: EventBus,
    ) -> Result<Self> {
        Ok(Self {
            addon_key: config.key.clone(),
            hosts: config.hosts.clone(),
            port: config.port,
            local_base_url: Mutex::new(config.base_url()?),
            base_url_overridden: config.base_url_overridden,
            enabled: config.registration.enabled,
            force_register: config.registration.force_register,
            force_deregister: config.registration.force_deregister,
            client,
            store,
            events,
            tunnel: None,
            registrations: Mutex::new(HashMap::new()),
        })
    }

    /// Uses `provider` to expose the local port to remote hosts.
    #[must_use]
    pub fn with_tunnel(mut self, provider: Arc<dyn TunnelProvider>) -> Self {
        self.tunnel = Some(provider);
        self
    }

    /// The add-on's base URL, rewritten if a tunnel was opened.
    #[must_use]
    pub fn local_base_url(&self) -> Url {
        self.local_base_url.lock().clone()
    }

    /// URL of the add-on descriptor the hosts are asked to install.
    #[must_use]
    pub fn descriptor_url(&self) -> String {
        let base = self.local_base_url.lock();
        format!("{}/atlassian-connect.json", base.as_str().trim_end_matches('/'))
    }

    /// Hosts the add-on is currently registered with, mapped to their tenant keys.
    #[must_use]
    pub fn registrations(&self) -> HashMap<String, String> {
        self.registrations.lock().clone()
    }

    /// Registers with every configured host concurrently.
    ///
    /// A host that cannot be reached or refuses the install is logged and
    /// skipped. Returns the number of hosts the add-on is registered with.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Tunnel`] if a required tunnel cannot be opened.
    pub async fn register(&self, re_registration: bool) -> Result<usize> {
        if !self.enabled {
            tracing::warn!("Auto-registration disabled");
            return Ok(0);
        }
        self.registrations.lock().clear();
        if self.hosts.is_empty() {
            return Ok(0);
        }

        self.open_tunnel().await?;

        if !re_registration {
            tracing::info!("Registering add-on...");
        }
        let job = RegistrationJob {
            client: self.client.clone(),
            addon_key: self.addon_key.clone(),
            descriptor_url: self.descriptor_url(),
            force: self.force_register || self.store.is_ephemeral() || re_registration,
        };

        let mut tasks = JoinSet::new();
        for host in &self.hosts {
            tasks.spawn(job.clone().run(host.clone()));
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some((host, tenant))) => {
                    self.registrations.lock().insert(host, tenant);
                }
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "registration task failed"),
            }
        }

        let hosts: Vec<String> = self.registrations.lock().keys().map(|h| redact_url(h)).collect();
        if hosts.is_empty() {
            tracing::warn!("Add-on not registered; no compatible hosts detected");
        }
        let count = hosts.len();
        self.events.emit(LifecycleEvent::AddonRegistered { hosts });
        Ok(count)
    }

    /// Removes the add-on from every host it registered with.
    ///
    /// Runs only when the store is ephemeral or forced by configuration.
    /// Failures are logged; this never fails.
    pub async fn deregister(&self) {
        let registrations = self.registrations();
        if registrations.is_empty() || !(self.force_deregister || self.store.is_ephemeral()) {
            return;
        }
        tracing::info!("Deregistering add-on...");

        let mut removed = Vec::new();
        for (host, tenant) in registrations {
            if self.deregister_host(&host, &tenant).await {
                removed.push(redact_url(&host));
            }
            self.registrations.lock().remove(&host);
        }
        self.events.emit(LifecycleEvent::AddonDeregistered { hosts: removed });
    }

    #[instrument(skip(self, host), fields(host = %redact_url(host)))]
    async fn deregister_host(&self, host: &str, tenant: &str) -> bool {
        let result = match Upm::new(self.client.clone(), host) {
            Ok(upm) => upm.uninstall(&self.addon_key).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "Failed to deregister with host");
            return false;
        }
        tracing::info!("Unregistered on host");
        if let Err(e) = delete_credential(self.store.as_ref(), tenant).await {
            tracing::error!(error = %e, "failed to delete tenant credential");
        }
        true
    }

    fn needs_tunnel(&self) -> bool {
        !self.base_url_overridden && self.hosts.iter().any(|host| !is_local(host))
    }

    async fn open_tunnel(&self) -> Result<()> {
        let Some(provider) = self.tunnel.as_ref().filter(|_| self.needs_tunnel()) else {
            return Ok(());
        };
        let public = provider.open(self.port).await.inspect_err(|e| {
            tracing::error!(error = %e, "Failed to establish local tunnel");
        })?;

        let rewritten = {
            let mut local = self.local_base_url.lock();
            rewrite_origin(&mut local, &public)?;
            local.to_string()
        };
        tracing::info!(url = %public, base_url = %rewritten, "Local tunnel established");
        self.events.emit(LifecycleEvent::TunnelStarted { url: public.to_string() });
        Ok(())
    }
}

/// Whether `host` points at this machine.
fn is_local(host: &str) -> bool {
    match Url::parse(host).ok().as_ref().and_then(Url::host) {
        Some(Host::Domain(domain)) => domain == "localhost" || domain.ends_with(".localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => host.contains("localhost"),
    }
}

/// Replaces scheme, host and port of `target` with those of `origin`.
fn rewrite_origin(target: &mut Url, origin: &Url) -> Result<()> {
    let invalid = || AuthError::Tunnel(format!("cannot use tunnel URL {origin}"));
    target.set_scheme(origin.scheme()).map_err(|()| invalid())?;
    target.set_host(origin.host_str()).map_err(|_| invalid())?;
    target.set_port(origin.port()).map_err(|()| invalid())?;
    Ok(())
}
