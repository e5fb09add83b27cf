//! Error types for add-on authentication and host communication.
//!
//! Every fallible operation in this crate returns [`AuthError`]. Each variant
//! maps to the HTTP status the add-on boundary answers with (see
//! [`AuthError::status_code`]), and [`Rejection`] turns an error into the
//! client-safe payload that is either written to the response or forwarded to
//! an upstream error hook.
//!
//! # Error Categories
//!
//! - **Request errors** ([`AuthError::BadRequest`]): malformed install payloads
//! - **Authentication errors** ([`AuthError::Unauthenticated`],
//!   [`AuthError::Forbidden`], [`AuthError::UnknownTenant`]): the caller is not trusted
//! - **Token errors** ([`AuthError::MalformedToken`], [`AuthError::InvalidSignature`],
//!   [`AuthError::UnsupportedAlgorithm`]): the JWT cannot be decoded or verified
//! - **Infrastructure errors** ([`AuthError::Store`], [`AuthError::HttpError`],
//!   [`AuthError::HostResponse`]): storage or network failures
//!
//! # Examples
//!
//! ```
//! use connect_auth::error::{AuthError, Rejection};
//!
//! let err = AuthError::Unauthenticated("Authentication request has expired.".to_owned());
//! let rejection = Rejection::from(&err);
//! assert_eq!(rejection.status, 401);
//! assert_eq!(rejection.message, "Authentication request has expired.");
//! ```

use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Result type alias for add-on operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors raised while installing, authenticating, registering or calling hosts.
///
/// Messages are written to be safe for the calling host: none of them carry a
/// shared secret, a signature, or a computed query string hash.
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum AuthError {
    /// The request is missing required data (400).
    #[error("{0}")]
    BadRequest(String),

    /// The caller could not be authenticated (401).
    #[error("{0}")]
    Unauthenticated(String),

    /// The caller is authenticated as a host that is not allowed (401).
    ///
    /// Raised when an installing host falls outside the configured whitelist or
    /// fails key verification.
    #[error("{0}")]
    Forbidden(String),

    /// No credential is stored for the tenant named by the token (401).
    #[error("Could not find stored client data for {0}. Is this client registered?")]
    UnknownTenant(String),

    /// The token is not a well formed JWS compact serialization (400).
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// The token signature does not match the tenant secret (400).
    #[error("Token signature verification failed")]
    InvalidSignature,

    /// The token header names an algorithm other than HS256 (400).
    #[error("Unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The credential store failed (500).
    #[error("Credential store failure: {0}")]
    Store(#[from] StoreError),

    /// HTTP communication with a host failed.
    ///
    /// Timeouts, connection failures and 5xx statuses are retryable, see
    /// [`is_retryable`](crate::reliability::is_retryable).
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// A host answered with an unexpected status.
    #[error("Host responded with {status}: {message}")]
    HostResponse {
        /// HTTP status returned by the host.
        status: u16,
        /// Response body or a short description of it.
        message: String,
    },

    /// Configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A JSON document could not be read or written.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The development tunnel could not be established.
    #[error("Tunnel failed: {0}")]
    Tunnel(String),
}

impl AuthError {
    /// HTTP status the add-on boundary answers with for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use connect_auth::error::AuthError;
    ///
    /// assert_eq!(AuthError::BadRequest("missing baseUrl".to_owned()).status_code(), 400);
    /// assert_eq!(AuthError::UnknownTenant("jira:1".to_owned()).status_code(), 401);
    /// assert_eq!(AuthError::InvalidSignature.status_code(), 400);
    /// ```
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_)
            | Self::MalformedToken(_)
            | Self::InvalidSignature
            | Self::UnsupportedAlgorithm(_) => 400,
            Self::Unauthenticated(_) | Self::Forbidden(_) | Self::UnknownTenant(_) => 401,
            Self::HostResponse { .. } | Self::HttpError(_) => 502,
            Self::Store(_)
            | Self::Config(_)
            | Self::Serialization(_)
            | Self::Tunnel(_) => 500,
        }
    }
}

/// A client-facing rejection derived from an [`AuthError`].
///
/// Infrastructure failures are reported with a generic message so storage or
/// network details stay in the server logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// HTTP status code.
    #[serde(rename = "code")]
    pub status: u16,
    /// Human readable reason, safe to show to the caller.
    pub message: String,
}

impl Rejection {
    /// Message escaped for direct inclusion in an HTML response body.
    ///
    /// # Examples
    ///
    /// ```
    /// use connect_auth::error::Rejection;
    ///
    /// let rejection = Rejection { status: 401, message: "<b>bad</b> & worse".to_owned() };
    /// assert_eq!(rejection.escaped_message(), "&lt;b&gt;bad&lt;/b&gt; &amp; worse");
    /// ```
    #[must_use]
    pub fn escaped_message(&self) -> String {
        escape_html(&self.message)
    }
}

impl From<&AuthError> for Rejection {
    fn from(error: &AuthError) -> Self {
        let status = error.status_code();
        let message = match error {
            AuthError::Store(_) | AuthError::Serialization(_) | AuthError::Config(_) => {
                "Internal server error".to_owned()
            }
            other => other.to_string(),
        };
        Self { status, message }
    }
}

/// Escapes the five HTML-significant characters.
#[must_use]
pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tenant_message() {
        let error = AuthError::UnknownTenant("jira:15489595".to_owned());
        assert_eq!(
            error.to_string(),
            "Could not find stored client data for jira:15489595. Is this client registered?"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::Forbidden("not whitelisted".to_owned()).status_code(), 401);
        assert_eq!(AuthError::MalformedToken("two segments".to_owned()).status_code(), 400);
        assert_eq!(AuthError::UnsupportedAlgorithm("none".to_owned()).status_code(), 400);
        assert_eq!(AuthError::Store(StoreError::Internal("down".to_owned())).status_code(), 500);
        assert_eq!(
            AuthError::HostResponse { status: 404, message: "gone".to_owned() }.status_code(),
            502
        );
    }

    #[test]
    fn test_rejection_hides_store_details() {
        let error = AuthError::Store(StoreError::Connection("postgres://user:pw@db".to_owned()));
        let rejection = Rejection::from(&error);
        assert_eq!(rejection.status, 500);
        assert!(!rejection.message.contains("postgres"));
    }

    #[test]
    fn test_rejection_serializes_code_and_message() {
        let rejection = Rejection::from(&AuthError::Unauthenticated("nope".to_owned()));
        let json = serde_json::to_value(&rejection).unwrap();
        assert_eq!(json, serde_json::json!({"code": 401, "message": "nope"}));
    }

    #[test]
    fn test_escape_html_quotes() {
        assert_eq!(escape_html(r#"a"b'c"#), "a&quot;b&#39;c");
        assert_eq!(escape_html("plain"), "plain");
    }
}
