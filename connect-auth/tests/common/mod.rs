//! Mock hosts for integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use axum::Router;
use connect_auth::config::{AddonConfig, VerificationStrategy};
use tokio::net::TcpListener;

pub const ADDON_KEY: &str = "my-addon";

/// Serves `router` on an ephemeral port and returns its base URL.
pub async fn spawn_host(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{addr}")
}

/// A `<consumer>` document as served by the host's consumer info servlet.
pub fn consumer_info(key: &str, public_key: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<consumer>
  <key>{key}</key>
  <name>JIRA</name>
  <publicKey>{public_key}</publicKey>
  <description>Atlassian JIRA</description>
</consumer>"#
    )
}

/// Configuration accepting any host, without tunnelling and with fast retries.
pub fn config(verification: VerificationStrategy) -> AddonConfig {
    let mut config = AddonConfig::new(ADDON_KEY, "http://localhost:3000");
    config.whitelist = Some(Vec::new());
    config.installation.verification = verification;
    config.installation.key_fetch_interval_ms = 10;
    config.installation.key_fetch_timeout_secs = 2;
    config.registration.tunnel = false;
    config.retry.initial_delay_ms = 10;
    config.retry.max_delay_ms = 20;
    config
}

/// Shared request counter for mock handlers.
#[derive(Debug, Clone, Default)]
pub struct Hits(Arc<AtomicUsize>);

impl Hits {
    /// Records a hit and returns how many came before it.
    pub fn record(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
