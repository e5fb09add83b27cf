//! Claim set carried by request and session tokens.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Token audience.
///
/// Hosts send either a single string or an array; the add-on always emits an
/// array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Audience(pub Vec<String>);

impl Audience {
    /// Audience naming a single tenant.
    #[must_use]
    pub fn single(tenant: impl Into<String>) -> Self {
        Self(vec![tenant.into()])
    }

    /// First audience entry, if any.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }
}

impl<'de> Deserialize<'de> for Audience {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            One(String),
            Many(Vec<String>),
        }
        Ok(match Wire::deserialize(deserializer)? {
            Wire::One(aud) => Self(vec![aud]),
            Wire::Many(aud) => Self(aud),
        })
    }
}

/// Claims of a signed token.
///
/// `exp` is the only required claim; a missing issuer decodes as an empty
/// string so the authenticator can reject it with a precise message.
/// Claims this crate does not interpret (for example a `context` object) are
/// preserved in [`extra`](Self::extra).
///
/// # Examples
///
/// ```
/// use connect_auth::token::Claims;
///
/// let claims = Claims::new("my-addon", 1_700_000_000, 1_700_000_180)
///     .with_audience("jira:15489595")
///     .with_qsh("c88caad15a1c1a900b8ac08aa9686f4e8184539bea1deda36e2f649430df3239");
/// assert_eq!(claims.tenant_key(), Some("jira:15489595"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer: the host's client key, or the add-on key for tokens we mint.
    #[serde(default)]
    pub iss: String,

    /// Audience.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,

    /// Subject, usually the acting user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Issued-at (Unix seconds).
    #[serde(default)]
    pub iat: i64,

    /// Expiry (Unix seconds).
    pub exp: i64,

    /// Query string hash binding the token to one request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qsh: Option<String>,

    /// Claims not interpreted by this crate.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Claims with issuer and validity window, nothing else.
    #[must_use]
    pub fn new(iss: impl Into<String>, iat: i64, exp: i64) -> Self {
        Self { iss: iss.into(), aud: None, sub: None, iat, exp, qsh: None, extra: Map::new() }
    }

    /// Sets a single-entry audience.
    #[must_use]
    pub fn with_audience(mut self, tenant: impl Into<String>) -> Self {
        self.aud = Some(Audience::single(tenant));
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn with_subject(mut self, sub: impl Into<String>) -> Self {
        self.sub = Some(sub.into());
        self
    }

    /// Sets the query string hash.
    #[must_use]
    pub fn with_qsh(mut self, qsh: impl Into<String>) -> Self {
        self.qsh = Some(qsh.into());
        self
    }

    /// Tenant the token speaks for: the first audience entry, else the issuer.
    ///
    /// Returns `None` when both are empty.
    #[must_use]
    pub fn tenant_key(&self) -> Option<&str> {
        self.aud
            .as_ref()
            .and_then(Audience::first)
            .or(Some(self.iss.as_str()))
            .filter(|key| !key.is_empty())
    }

    /// Whether the token has expired at `now` (Unix seconds).
    #[must_use]
    pub const fn is_expired_at(&self, now: i64) -> bool {
        now >= self.exp
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_audience_accepts_string_and_array() {
        let one: Claims =
            serde_json::from_value(json!({"iss": "a", "exp": 1, "aud": "t1"})).unwrap();
        let many: Claims =
            serde_json::from_value(json!({"iss": "a", "exp": 1, "aud": ["t1", "t2"]})).unwrap();
        assert_eq!(one.aud, Some(Audience::single("t1")));
        assert_eq!(many.tenant_key(), Some("t1"));
    }

    #[test]
    fn test_audience_serialized_as_array() {
        let claims = Claims::new("addon", 0, 10).with_audience("t1");
        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["aud"], json!(["t1"]));
        assert!(value.get("qsh").is_none());
    }

    #[test]
    fn test_tenant_key_falls_back_to_issuer() {
        let claims = Claims::new("jira:1", 0, 10);
        assert_eq!(claims.tenant_key(), Some("jira:1"));

        let mut empty_aud = Claims::new("jira:1", 0, 10);
        empty_aud.aud = Some(Audience(Vec::new()));
        assert_eq!(empty_aud.tenant_key(), Some("jira:1"));
    }

    #[test]
    fn test_tenant_key_missing() {
        assert_eq!(Claims::new("", 0, 10).tenant_key(), None);
    }

    #[test]
    fn test_extra_claims_preserved() {
        let claims: Claims = serde_json::from_value(
            json!({"iss": "a", "exp": 5, "context": {"user": {"userKey": "admin"}}}),
        )
        .unwrap();
        assert_eq!(claims.extra["context"]["user"]["userKey"], "admin");
        let back = serde_json::to_value(&claims).unwrap();
        assert_eq!(back["context"]["user"]["userKey"], "admin");
    }

    #[test]
    fn test_missing_exp_rejected() {
        let result: Result<Claims, _> = serde_json::from_value(json!({"iss": "a"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_expiry_boundary() {
        let claims = Claims::new("a", 0, 100);
        assert!(!claims.is_expired_at(99));
        assert!(claims.is_expired_at(100));
    }
}
