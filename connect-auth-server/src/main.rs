//! Connect-Auth Server - registers an add-on with its development hosts
//!
//! Reads the add-on configuration, applies environment overrides, registers
//! the add-on with every configured host (opening a tunnel first when a host
//! is remote) and waits for Ctrl-C. On shutdown the add-on is removed from the
//! hosts again when the credential store is ephemeral or deregistration is
//! forced.
//!
//! # Environment Variables
//!
//! - `CONNECT_AUTH_CONFIG`: configuration file (default `connect-auth.toml`)
//! - `LOG_FORMAT`: `pretty` or `json`
//! - `RUST_LOG`: log filter (default `info`)
//! - `PORT`, `AC_LOCAL_BASE_URL`, `AC_HOST_WHITELIST`, `AC_VALIDATE_PUBLIC_KEY`,
//!   `AC_OPTS`: configuration overrides

#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from reqwest"
)]

mod observability;

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use connect_auth::{
    Addon, AuthError,
    config::AddonConfig,
    events::EventBus,
    store::MemoryStore,
};
use observability::{LogFormat, init_observability};

const DEREGISTER_TIMEOUT: Duration = Duration::from_secs(30);

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "connect-auth-server", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "CONNECT_AUTH_CONFIG", default_value = "connect-auth.toml")]
    config: PathBuf,

    /// Log output format.
    #[arg(
        long,
        env = "LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Pretty,
        ignore_case = true
    )]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_observability(cli.log_format);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "connect-auth-server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<(), AuthError> {
    let config = load_config(cli).await?;
    tracing::info!(
        key = %config.key,
        hosts = config.hosts.len(),
        environment = ?config.environment,
        "Starting connect-auth-server"
    );

    let addon = Addon::new(config, Arc::new(MemoryStore::new()), EventBus::new())?;
    let registrar = addon.registrar();

    let registered = registrar.register(false).await?;
    tracing::info!(
        registered,
        base_url = %registrar.local_base_url(),
        "Add-on ready, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AuthError::Config(format!("cannot listen for shutdown signal: {e}")))?;

    if tokio::time::timeout(DEREGISTER_TIMEOUT, registrar.deregister()).await.is_err() {
        tracing::warn!(timeout_secs = DEREGISTER_TIMEOUT.as_secs(), "Deregistration timed out");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn load_config(cli: &Cli) -> Result<AddonConfig, AuthError> {
    let raw = tokio::fs::read_to_string(&cli.config).await.map_err(|e| {
        AuthError::Config(format!("cannot read {}: {e}", cli.config.display()))
    })?;
    let mut config = AddonConfig::from_toml(&raw)?;
    config.apply_env_overrides(|name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}
