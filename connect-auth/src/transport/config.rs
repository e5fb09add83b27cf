//! Settings for the client that talks to tenant hosts.

use std::time::Duration;

use reqwest::header::HeaderValue;
use serde::Deserialize;

use crate::error::{AuthError, Result};

/// The `[http]` section.
///
/// One client serves every host-facing call: consumer info and capabilities
/// fetches during installation, plugin manager requests during registration,
/// token endpoint requests and signed calls back into a tenant.
///
/// ```toml
/// [http]
/// timeout_secs = 30
/// connect_timeout_secs = 5
/// idle_connections_per_host = 16
/// user_agent = "my-addon/1.0"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HttpConfig {
    /// Upper bound for one host request, body included.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Upper bound for establishing a connection; at most `timeout_secs`.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Idle keep-alive connections kept per host.
    #[serde(default = "default_idle_connections")]
    pub idle_connections_per_host: usize,

    /// `User-Agent` sent to hosts.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_connections_per_host: default_idle_connections(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    /// Checks the timeouts and the user agent.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if a timeout is zero, the connect timeout
    /// exceeds the request timeout, or the user agent is not a valid header value.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(AuthError::Config("http.timeout_secs must be positive".to_owned()));
        }
        if self.connect_timeout_secs == 0 || self.connect_timeout_secs > self.timeout_secs {
            return Err(AuthError::Config(
                "http.connect_timeout_secs must be between 1 and http.timeout_secs".to_owned(),
            ));
        }
        HeaderValue::from_str(&self.user_agent)
            .map_err(|e| AuthError::Config(format!("http.user_agent: {e}")))?;
        Ok(())
    }

    /// Request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_idle_connections() -> usize {
    16
}

fn default_user_agent() -> String {
    concat!("connect-auth/", env!("CARGO_PKG_VERSION")).to_owned()
}
