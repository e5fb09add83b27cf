//! Connect-Auth: Trust Protocol for Multi-Tenant Host Add-ons
//!
//! A Rust library implementing the trust protocol between a multi-tenant
//! add-on and the hosts (Jira, Confluence and friends) that install it. Each
//! host installation is a tenant with its own shared secret; every request in
//! either direction is a JWT signed with that secret and bound to the request
//! by a query string hash (`qsh`).
//!
//! # Architecture
//!
//! ```text
//!                  install (POST JSON)
//!  ┌──────────┐ ─────────────────────────▶ ┌───────────┐     ┌──────────────────┐
//!  │          │                            │ Installer │────▶│                  │
//!  │          │  request + JWT(qsh)        ├───────────┤     │ CredentialStore  │
//!  │   Host   │ ─────────────────────────▶ │ Authent-  │◀────│  (clientInfo per │
//!  │ (tenant) │                            │ icator    │     │     tenant)      │
//!  │          │  Authorization: JWT ...    ├───────────┤     │                  │
//!  │          │ ◀───────────────────────── │ HostClient│◀────│                  │
//!  └──────────┘                            └───────────┘     └──────────────────┘
//!        ▲        UPM install / uninstall   ┌───────────┐
//!        └───────────────────────────────── │ Registrar │
//!                                           └───────────┘
//! ```
//!
//! # Quick Start
//!
//! ## 1. Handle an installation
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use connect_auth::{Addon, config::AddonConfig, events::EventBus, store::MemoryStore};
//! use serde_json::json;
//!
//! # async fn example() -> connect_auth::Result<()> {
//! let config = AddonConfig::from_toml(
//!     r#"
//!     key = "my-addon"
//!     local_base_url = "https://addon.example.com"
//!     whitelist = ["*.atlassian.net"]
//!     "#,
//! )?;
//! let addon = Addon::new(config, Arc::new(MemoryStore::new()), EventBus::new())?;
//!
//! let credential = addon
//!     .installer()
//!     .install(&json!({
//!         "baseUrl": "https://example.atlassian.net",
//!         "clientKey": "jira:15489595",
//!         "sharedSecret": "s3cr3t",
//!         "publicKey": "MIGf..."
//!     }))
//!     .await?;
//! println!("installed {}", credential.client_key);
//! # Ok(())
//! # }
//! ```
//!
//! ## 2. Authenticate an inbound request
//!
//! ```rust,no_run
//! use connect_auth::{
//!     Addon,
//!     inbound::{AuthMode, InboundRequest, RejectionAction},
//! };
//!
//! # async fn example(addon: &Addon) {
//! let request = InboundRequest::new("GET", "/panel?lic=none&jwt=eyJ...")
//!     .with_header("Accept", "text/html");
//!
//! match addon.authenticator().authenticate(&request, AuthMode::Standard).await {
//!     Ok(outcome) => {
//!         for (name, value) in outcome.response_headers() {
//!             println!("{name}: {value}");
//!         }
//!     }
//!     Err(error) => match addon.authenticator().reject(&error) {
//!         RejectionAction::Respond { status, body } => println!("{status}: {body}"),
//!         RejectionAction::Forward(rejection) => println!("forward {rejection:?}"),
//!     },
//! }
//! # }
//! ```
//!
//! ## 3. Call back into the host
//!
//! ```rust,no_run
//! use connect_auth::{Addon, outbound::HostRequest};
//!
//! # async fn example(addon: &Addon) -> connect_auth::Result<()> {
//! let response = addon
//!     .host_client()
//!     .send("jira:15489595", &HostRequest::get("/rest/api/2/myself").as_user("admin"))
//!     .await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```
//!
//! ## 4. Compute a query string hash
//!
//! ```rust
//! use connect_auth::canonical::CanonicalRequest;
//!
//! let request = CanonicalRequest::new("GET", "/path");
//! assert_eq!(request.canonical_string(), "GET&/path&");
//! assert_eq!(
//!     request.query_string_hash(),
//!     "799be84a7fa35570087163c0cd9af3abff7ac05c2c12ba0bb1d7eebc984b3ac2"
//! );
//! ```
//!
//! # Module Organization
//!
//! - [`canonical`]: canonical request strings and query string hashes
//! - [`token`]: HS256 JWT encoding and verification
//! - [`store`]: credential store trait, tenant credentials, in-memory store
//! - [`install`]: installation handshake and host identity checks
//! - [`inbound`]: inbound request authentication and session tokens
//! - [`outbound`]: signed host requests and client-credentials tokens
//! - [`registration`]: self-registration with development hosts, tunnels
//! - [`events`]: lifecycle events and observers
//! - [`config`]: TOML configuration with environment overrides
//! - [`error`]: error taxonomy and HTTP status mapping
//! - [`reliability`]: retry with backoff
//! - [`transport`]: HTTP client construction and URL helpers
//!
//! # Security Considerations
//!
//! - **Shared secrets** are wrapped in [`store::SharedSecret`]: redacted in
//!   `Debug`, zeroized on drop, readable only through `expose()`
//! - **Signatures** are compared in constant time; only `HS256` is accepted
//! - **Rejections** never carry hashes, secrets or store errors; computed and
//!   expected hashes go to the server log only
//! - **Host URLs** may embed basic-auth credentials; they are stripped before
//!   any URL is logged

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from reqwest and axum"
)]

mod addon;

pub mod canonical;
pub mod config;
pub mod error;
pub mod events;
pub mod inbound;
pub mod install;
pub mod outbound;
pub mod registration;
pub mod reliability;
pub mod store;
pub mod token;
pub mod transport;

pub use addon::Addon;
pub use error::{AuthError, Result};
