//! One add-on, wired together.

use std::{fmt, sync::Arc};

use reqwest::Client;

use crate::{
    config::AddonConfig,
    error::Result,
    events::EventBus,
    inbound::Authenticator,
    install::Installer,
    outbound::{AccessTokenProvider, HostClient},
    registration::{LocalTunnel, Registrar},
    store::CredentialStore,
    transport::build_client,
};

/// Shares one configuration, store, HTTP client and event bus between the
/// installer, the authenticator, the host client and the registrar.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use connect_auth::{Addon, config::AddonConfig, events::EventBus, store::MemoryStore};
///
/// # fn example() -> connect_auth::Result<()> {
/// let config = AddonConfig::new("my-addon", "https://addon.example.com");
/// let addon = Addon::new(config, Arc::new(MemoryStore::new()), EventBus::new())?;
/// assert_eq!(addon.config().key, "my-addon");
/// # Ok(())
/// # }
/// ```
pub struct Addon {
    config: AddonConfig,
    store: Arc<dyn CredentialStore>,
    events: EventBus,
    installer: Installer,
    authenticator: Authenticator,
    host_client: HostClient,
    access_tokens: AccessTokenProvider,
    registrar: Registrar,
}

impl fmt::Debug for Addon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Addon")
            .field("key", &self.config.key)
            .field("store_ephemeral", &self.store.is_ephemeral())
            .field("registrar", &self.registrar)
            .finish_non_exhaustive()
    }
}

impl Addon {
    /// Builds every component from `config`.
    ///
    /// A [`LocalTunnel`] is attached to the registrar when tunnelling is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`](crate::error::AuthError::Config) for an
    /// invalid configuration and
    /// [`AuthError::HttpError`](crate::error::AuthError::HttpError) if the HTTP
    /// client cannot be built.
    pub fn new(
        config: AddonConfig,
        store: Arc<dyn CredentialStore>,
        events: EventBus,
    ) -> Result<Self> {
        config.validate()?;
        let client = build_client(&config.http)?;
        Self::with_client(config, store, events, client)
    }

    /// Like [`new`](Self::new), with a caller-supplied HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`](crate::error::AuthError::Config) for an
    /// invalid configuration.
    pub fn with_client(
        config: AddonConfig,
        store: Arc<dyn CredentialStore>,
        events: EventBus,
        client: Client,
    ) -> Result<Self> {
        let installer =
            Installer::new(&config, client.clone(), Arc::clone(&store), events.clone())?;
        let authenticator = Authenticator::new(&config, Arc::clone(&store), events.clone())?;
        let host_client = HostClient::new(&config, client.clone(), Arc::clone(&store));
        let access_tokens = AccessTokenProvider::new(client.clone(), Arc::clone(&store));

        let mut registrar =
            Registrar::new(&config, client.clone(), Arc::clone(&store), events.clone())?;
        if config.registration.tunnel {
            registrar = registrar
                .with_tunnel(Arc::new(LocalTunnel::new(
                    client,
                    config.registration.tunnel_server.clone(),
                )));
        }

        Ok(Self {
            config,
            store,
            events,
            installer,
            authenticator,
            host_client,
            access_tokens,
            registrar,
        })
    }

    /// The configuration the add-on was built from.
    #[must_use]
    pub const fn config(&self) -> &AddonConfig {
        &self.config
    }

    /// The credential store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// The lifecycle event bus.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Installation and uninstallation callbacks.
    #[must_use]
    pub const fn installer(&self) -> &Installer {
        &self.installer
    }

    /// Inbound request verification.
    #[must_use]
    pub const fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    /// Signed calls to tenant hosts.
    #[must_use]
    pub const fn host_client(&self) -> &HostClient {
        &self.host_client
    }

    /// Client-credentials tokens for tenant hosts.
    #[must_use]
    pub const fn access_tokens(&self) -> &AccessTokenProvider {
        &self.access_tokens
    }

    /// Host self-registration.
    #[must_use]
    pub const fn registrar(&self) -> &Registrar {
        &self.registrar
    }
}
