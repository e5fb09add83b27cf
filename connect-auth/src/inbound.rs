//! Inbound request authentication.
//!
//! Every request a host sends to the add-on carries a JWT signed with the
//! tenant's shared secret. [`Authenticator::authenticate`] walks it through:
//!
//! | Step | Failure |
//! |---|---|
//! | find the token (`jwt` param, `Authorization: JWT`, `acpt`, `X-acpt`) | 401 |
//! | decode without verifying, read `iss`, `aud` and `qsh` | 401 |
//! | look up the tenant credential (`aud[0]`, else `iss`) | 401, 500 on store failure |
//! | verify the signature with the tenant secret | 400 |
//! | check `exp` | 401 |
//! | compare `qsh` with the request's canonical hash, then with body params | 401 |
//!
//! On success a session token is minted so follow-up requests from the same
//! page can authenticate without a host-signed token. It is returned in the
//! context and as an `X-acpt` response header.
//!
//! The authenticator is framework neutral: callers translate their request type
//! into an [`InboundRequest`] and turn a failure into a response with
//! [`Authenticator::reject`].

use std::{fmt, sync::Arc};

use tracing::instrument;

use crate::{
    canonical::{CanonicalRequest, JWT_PARAM, ParamMap, SESSION_TOKEN_PARAM, parse_query},
    config::{AddonConfig, ErrorHandling},
    error::{AuthError, Rejection, Result},
    events::{EventBus, LifecycleEvent},
    store::{CredentialStore, load_credential},
    token::{self, Claims},
};

/// Response header carrying the session token.
pub const SESSION_TOKEN_HEADER: &str = "X-acpt";

const AUTHORIZATION_HEADER: &str = "authorization";
const JWT_SCHEME: &str = "JWT ";

/// The parts of an HTTP request that take part in authentication.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    /// HTTP method.
    pub method: String,
    /// Request path, without query.
    pub path: String,
    /// Decoded query parameters.
    pub query: ParamMap,
    /// Request headers; names compare case-insensitively.
    pub headers: Vec<(String, String)>,
    /// Decoded `application/x-www-form-urlencoded` body, if any.
    pub body: Option<ParamMap>,
}

impl InboundRequest {
    /// Builds a request from a method and a path with optional query string.
    ///
    /// # Examples
    ///
    /// ```
    /// use connect_auth::inbound::InboundRequest;
    ///
    /// let request = InboundRequest::new("GET", "/hello?user_id=admin&jwt=abc")
    ///     .with_header("Accept", "text/html");
    /// assert_eq!(request.path, "/hello");
    /// assert_eq!(request.query["user_id"], vec!["admin".to_owned()]);
    /// assert_eq!(request.header("accept"), Some("text/html"));
    /// ```
    #[must_use]
    pub fn new(method: &str, uri: &str) -> Self {
        let (path, query) = uri.split_once('?').unwrap_or((uri, ""));
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_owned(),
            query: parse_query(query),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Sets the form body from its encoded form.
    #[must_use]
    pub fn with_form_body(mut self, body: &str) -> Self {
        self.body = Some(parse_query(body));
        self
    }

    /// First value of header `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).and_then(|values| values.first()).map(String::as_str)
    }
}

/// Which tokens a route accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    /// Host-signed request tokens; a `qsh` claim is required.
    #[default]
    Standard,
    /// Session tokens only, taken from `acpt` or `X-acpt`; `qsh` is optional.
    SessionToken,
}

/// Trusted facts about an authenticated request.
#[derive(Clone)]
pub struct VerifiedContext {
    /// Tenant the request belongs to.
    pub tenant_key: String,
    /// Acting user, from the `sub` claim.
    pub user_id: Option<String>,
    /// Host base URL from the stored credential.
    pub host_base_url: String,
    /// Session token for follow-up requests.
    pub token: String,
    /// Verified claims of the inbound token.
    pub claims: Claims,
}

impl fmt::Debug for VerifiedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedContext")
            .field("tenant_key", &self.tenant_key)
            .field("user_id", &self.user_id)
            .field("host_base_url", &self.host_base_url)
            .finish_non_exhaustive()
    }
}

/// Result of a successful authentication.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    /// The request was verified.
    Verified(Box<VerifiedContext>),
    /// Verification is disabled by configuration; nothing is trusted.
    Skipped,
}

impl AuthOutcome {
    /// The verified context, if verification ran.
    #[must_use]
    pub fn context(&self) -> Option<&VerifiedContext> {
        match self {
            Self::Verified(context) => Some(context),
            Self::Skipped => None,
        }
    }

    /// Headers to add to the response.
    #[must_use]
    pub fn response_headers(&self) -> Vec<(&'static str, String)> {
        self.context()
            .map(|context| vec![(SESSION_TOKEN_HEADER, context.token.clone())])
            .unwrap_or_default()
    }
}

/// What the boundary should do with a rejected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionAction {
    /// Write this status and HTML-escaped body.
    Respond {
        /// HTTP status.
        status: u16,
        /// Escaped message.
        body: String,
    },
    /// Hand the structured error to the next error handler.
    Forward(Rejection),
}

/// Verifies inbound requests and mints session tokens.
pub struct Authenticator {
    addon_key: String,
    base_url: String,
    max_token_age_secs: i64,
    skip_verification: bool,
    skip_token_verification: bool,
    error_handling: ErrorHandling,
    store: Arc<dyn CredentialStore>,
    events: EventBus,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("addon_key", &self.addon_key)
            .field("base_url", &self.base_url)
            .field("max_token_age_secs", &self.max_token_age_secs)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Creates an authenticator from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the base URL is invalid.
    pub fn new(
        config: &AddonConfig,
        store: Arc<dyn CredentialStore>,
        events: EventBus,
    ) -> Result<Self> {
        Ok(Self {
            addon_key: config.key.clone(),
            base_url: config.base_url()?.to_string(),
            max_token_age_secs: i64::try_from(config.max_token_age_secs).unwrap_or(i64::MAX),
            skip_verification: config.auth.skip_verification,
            skip_token_verification: config.auth.skip_token_verification,
            error_handling: config.auth.error_handling,
            store,
            events,
        })
    }

    /// Authenticates `request` under `mode`.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] whose [`status_code`](AuthError::status_code)
    /// is the response status; see the module documentation for the mapping.
    #[instrument(skip_all, fields(method = %request.method, path = %request.path, ?mode))]
    pub async fn authenticate(
        &self,
        request: &InboundRequest,
        mode: AuthMode,
    ) -> Result<AuthOutcome> {
        if self.skip_verification
            || (mode == AuthMode::SessionToken && self.skip_token_verification)
        {
            tracing::warn!("Auth verification is disabled, skipping validation of request");
            return Ok(AuthOutcome::Skipped);
        }

        let token = Self::extract_token(request, mode).ok_or_else(|| {
            AuthError::Unauthenticated("Could not find authentication data on request".to_owned())
        })?;

        let unverified = token::decode_unverified(&token)
            .map_err(|e| AuthError::Unauthenticated(format!("Invalid JWT: {e}")))?;
        if unverified.iss.is_empty() {
            return Err(AuthError::Unauthenticated(
                "JWT claim did not contain the issuer (iss) claim".to_owned(),
            ));
        }
        if unverified.qsh.is_none() && mode == AuthMode::Standard {
            return Err(AuthError::Unauthenticated(
                "JWT claim did not contain the query string hash (qsh) claim".to_owned(),
            ));
        }
        let tenant_key = unverified.tenant_key().unwrap_or(&unverified.iss).to_owned();

        let credential = load_credential(self.store.as_ref(), &tenant_key)
            .await?
            .ok_or_else(|| AuthError::UnknownTenant(tenant_key.clone()))?;
        let secret = credential.secret().ok_or_else(|| {
            AuthError::Unauthenticated(format!(
                "Could not find JWT sharedSecret in stored client data for {tenant_key}"
            ))
        })?;

        let claims = token::decode_verified(&token, secret)
            .map_err(|e| AuthError::BadRequest(format!("Unable to decode JWT token: {e}")))?;

        let now = token::now_unix();
        if claims.is_expired_at(now) {
            return Err(AuthError::Unauthenticated(
                "Authentication request has expired.".to_owned(),
            ));
        }

        if let Some(qsh) = &claims.qsh {
            self.verify_query_hash(request, qsh)?;
        }

        let session = Claims {
            sub: claims.sub.clone(),
            ..Claims::new(self.addon_key.clone(), now, now.saturating_add(self.max_token_age_secs))
        }
        .with_audience(tenant_key.clone());
        let session_token = token::encode(&session, secret)?;

        tracing::debug!(tenant = %tenant_key, "request authenticated");
        Ok(AuthOutcome::Verified(Box::new(VerifiedContext {
            tenant_key,
            user_id: claims.sub.clone(),
            host_base_url: credential.base_url.clone(),
            token: session_token,
            claims,
        })))
    }

    /// Authenticates a webhook delivery, emitting verification events around it.
    ///
    /// # Errors
    ///
    /// As [`authenticate`](Self::authenticate) in [`AuthMode::Standard`].
    pub async fn authenticate_webhook(&self, request: &InboundRequest) -> Result<AuthOutcome> {
        self.events.emit(LifecycleEvent::WebhookAuthVerificationTriggered);
        let outcome = self.authenticate(request, AuthMode::Standard).await?;
        let client_key = outcome.context().map(|c| c.tenant_key.clone()).unwrap_or_default();
        self.events.emit(LifecycleEvent::WebhookAuthVerificationSuccessful { client_key });
        Ok(outcome)
    }

    /// Logs `error` and decides how the boundary reports it.
    #[must_use]
    pub fn reject(&self, error: &AuthError) -> RejectionAction {
        let rejection = Rejection::from(error);
        if rejection.status >= 500 {
            tracing::error!(
                status = rejection.status,
                error = %error,
                "Authentication verification error"
            );
        } else {
            tracing::warn!(
                status = rejection.status,
                error = %error,
                "Authentication verification error"
            );
        }
        match self.error_handling {
            ErrorHandling::Respond => RejectionAction::Respond {
                status: rejection.status,
                body: rejection.escaped_message(),
            },
            ErrorHandling::Forward => RejectionAction::Forward(rejection),
        }
    }

    fn extract_token(request: &InboundRequest, mode: AuthMode) -> Option<String> {
        let session_token = || {
            request
                .query_param(SESSION_TOKEN_PARAM)
                .or_else(|| request.header(SESSION_TOKEN_HEADER))
                .filter(|t| !t.is_empty())
                .map(str::to_owned)
        };
        if mode == AuthMode::SessionToken {
            return session_token();
        }

        let query_token = request.query_param(JWT_PARAM).filter(|t| !t.is_empty());
        let header_token = request
            .header(AUTHORIZATION_HEADER)
            .and_then(|value| value.strip_prefix(JWT_SCHEME))
            .filter(|t| !t.is_empty());

        match (query_token, header_token) {
            (Some(query), Some(_)) => {
                tracing::warn!("JWT token found in query and in header: using query value");
                Some(query.to_owned())
            }
            (Some(token), None) | (None, Some(token)) => Some(token.to_owned()),
            (None, None) => session_token(),
        }
    }

    fn verify_query_hash(&self, request: &InboundRequest, qsh: &str) -> Result<()> {
        let canonical = CanonicalRequest::new(&request.method, &request.path)
            .with_query(request.query.clone())
            .relative_to(&self.base_url);
        let expected = canonical.query_string_hash();
        if expected == qsh {
            return Ok(());
        }

        // Hosts sign form fields of POST/PUT requests along with the query.
        if let Some(body) = request.body.as_ref().filter(|b| !b.is_empty()) {
            let with_body = canonical.clone().with_body(body.clone());
            if with_body.query_string_hash() == qsh {
                return Ok(());
            }
        }

        tracing::error!(
            received = %qsh,
            calculated = %expected,
            canonical = %canonical.canonical_string(),
            "Auth failure: query hash mismatch"
        );
        Err(AuthError::Unauthenticated(
            "Authentication failed: query hash does not match.".to_owned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        events::ChannelObserver,
        store::{CLIENT_INFO_KEY, MemoryStore},
    };

    const TENANT: &str = "jira:15489595";
    const SECRET: &str = "s3cr3t";

    async fn setup(config: AddonConfig) -> (Authenticator, MemoryStore) {
        let store = MemoryStore::new();
        store
            .set(
                CLIENT_INFO_KEY,
                json!({
                    "clientKey": TENANT,
                    "sharedSecret": SECRET,
                    "baseUrl": "https://example.atlassian.net"
                }),
                TENANT,
            )
            .await
            .unwrap();
        let auth = Authenticator::new(&config, Arc::new(store.clone()), EventBus::new()).unwrap();
        (auth, store)
    }

    fn config() -> AddonConfig {
        AddonConfig::new("my-addon", "https://addon.example.com")
    }

    fn host_token(method: &str, uri: &str, exp_offset: i64) -> String {
        let now = token::now_unix();
        let qsh = CanonicalRequest::from_relative_uri(method, uri).unwrap().query_string_hash();
        let claims = Claims::new(TENANT, now, now + exp_offset).with_qsh(qsh).with_subject("admin");
        token::encode(&claims, SECRET).unwrap()
    }

    #[tokio::test]
    async fn test_valid_query_token() {
        let (auth, _) = setup(config()).await;
        let jwt = host_token("GET", "/hello?lic=none", 180);
        let request = InboundRequest::new("GET", &format!("/hello?lic=none&jwt={jwt}"));

        let outcome = auth.authenticate(&request, AuthMode::Standard).await.unwrap();
        let context = outcome.context().unwrap();
        assert_eq!(context.tenant_key, TENANT);
        assert_eq!(context.user_id.as_deref(), Some("admin"));
        assert_eq!(context.host_base_url, "https://example.atlassian.net");

        let session = token::decode_verified(&context.token, SECRET).unwrap();
        assert_eq!(session.iss, "my-addon");
        assert_eq!(session.tenant_key(), Some(TENANT));
        assert_eq!(session.sub.as_deref(), Some("admin"));
        assert_eq!(session.exp - session.iat, 900);
        assert!(session.qsh.is_none());
        assert_eq!(outcome.response_headers()[0].0, "X-acpt");
    }

    #[tokio::test]
    async fn test_authorization_header_token() {
        let (auth, _) = setup(config()).await;
        let jwt = host_token("POST", "/webhook", 180);
        let request = InboundRequest::new("POST", "/webhook")
            .with_header("Authorization", &format!("JWT {jwt}"));
        assert!(auth.authenticate(&request, AuthMode::Standard).await.is_ok());
    }

    #[tokio::test]
    async fn test_query_token_wins_over_header() {
        let (auth, _) = setup(config()).await;
        let good = host_token("GET", "/p", 180);
        let request = InboundRequest::new("GET", &format!("/p?jwt={good}"))
            .with_header("Authorization", "JWT garbage");
        assert!(auth.authenticate(&request, AuthMode::Standard).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_token() {
        let (auth, _) = setup(config()).await;
        let err = auth.authenticate(&InboundRequest::new("GET", "/p"), AuthMode::Standard).await;
        assert!(matches!(
            err,
            Err(AuthError::Unauthenticated(msg)) if msg.contains("Could not find")
        ));
    }

    #[tokio::test]
    async fn test_garbage_token_is_401() {
        let (auth, _) = setup(config()).await;
        let request = InboundRequest::new("GET", "/p?jwt=not-a-token");
        let err = auth.authenticate(&request, AuthMode::Standard).await.unwrap_err();
        assert_eq!(err.status_code(), 401);
        assert!(err.to_string().starts_with("Invalid JWT"));
    }

    #[tokio::test]
    async fn test_missing_qsh_rejected_in_standard_mode() {
        let (auth, _) = setup(config()).await;
        let now = token::now_unix();
        let jwt = token::encode(&Claims::new(TENANT, now, now + 60), SECRET).unwrap();
        let request = InboundRequest::new("GET", &format!("/p?jwt={jwt}"));
        let err = auth.authenticate(&request, AuthMode::Standard).await.unwrap_err();
        assert!(err.to_string().contains("(qsh)"));
    }

    #[tokio::test]
    async fn test_unknown_tenant() {
        let (auth, _) = setup(config()).await;
        let now = token::now_unix();
        let claims = Claims::new("jira:other", now, now + 60).with_qsh("x");
        let jwt = token::encode(&claims, SECRET).unwrap();
        let request = InboundRequest::new("GET", &format!("/p?jwt={jwt}"));
        let err = auth.authenticate(&request, AuthMode::Standard).await.unwrap_err();
        assert!(matches!(&err, AuthError::UnknownTenant(t) if t == "jira:other"));
        assert!(err.to_string().contains("Is this client registered?"));
    }

    #[tokio::test]
    async fn test_wrong_secret_is_400() {
        let (auth, _) = setup(config()).await;
        let now = token::now_unix();
        let qsh = CanonicalRequest::new("GET", "/p").query_string_hash();
        let claims = Claims::new(TENANT, now, now + 60).with_qsh(qsh);
        let jwt = token::encode(&claims, "other").unwrap();
        let request = InboundRequest::new("GET", &format!("/p?jwt={jwt}"));
        let err = auth.authenticate(&request, AuthMode::Standard).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_expired_token() {
        let (auth, _) = setup(config()).await;
        let jwt = host_token("GET", "/p", -1);
        let request = InboundRequest::new("GET", &format!("/p?jwt={jwt}"));
        let err = auth.authenticate(&request, AuthMode::Standard).await.unwrap_err();
        assert_eq!(err.to_string(), "Authentication request has expired.");
    }

    #[tokio::test]
    async fn test_qsh_mismatch() {
        let (auth, _) = setup(config()).await;
        let jwt = host_token("GET", "/p?a=1", 60);
        let request = InboundRequest::new("GET", &format!("/p?a=2&jwt={jwt}"));
        let err = auth.authenticate(&request, AuthMode::Standard).await.unwrap_err();
        assert_eq!(err.to_string(), "Authentication failed: query hash does not match.");
    }

    #[tokio::test]
    async fn test_body_params_fallback() {
        let (auth, _) = setup(config()).await;
        let now = token::now_unix();
        let qsh = CanonicalRequest::new("POST", "/submit")
            .with_body(parse_query("field=value"))
            .query_string_hash();
        let jwt = token::encode(&Claims::new(TENANT, now, now + 60).with_qsh(qsh), SECRET).unwrap();
        let request = InboundRequest::new("POST", &format!("/submit?jwt={jwt}"))
            .with_form_body("field=value");
        assert!(auth.authenticate(&request, AuthMode::Standard).await.is_ok());
    }

    fn body_signed_token(method: &str, path: &str, query: &str, body: &str) -> String {
        let now = token::now_unix();
        let qsh = CanonicalRequest::new(method, path)
            .with_query(parse_query(query))
            .with_body(parse_query(body))
            .query_string_hash();
        token::encode(&Claims::new(TENANT, now, now + 60).with_qsh(qsh), SECRET).unwrap()
    }

    #[tokio::test]
    async fn test_body_hash_without_body_rejected() {
        let (auth, _) = setup(config()).await;
        let jwt = body_signed_token("GET", "/submit", "", "field=value");
        let request = InboundRequest::new("GET", &format!("/submit?jwt={jwt}"));
        let err = auth.authenticate(&request, AuthMode::Standard).await.unwrap_err();
        assert_eq!(err.to_string(), "Authentication failed: query hash does not match.");
    }

    #[tokio::test]
    async fn test_body_fallback_applies_to_any_method() {
        let (auth, _) = setup(config()).await;
        let jwt = body_signed_token("GET", "/search", "page=2", "term=rust");
        let request = InboundRequest::new("GET", &format!("/search?page=2&jwt={jwt}"))
            .with_form_body("term=rust");
        assert!(auth.authenticate(&request, AuthMode::Standard).await.is_ok());
    }

    #[tokio::test]
    async fn test_form_body_does_not_rescue_query_mismatch() {
        let (auth, _) = setup(config()).await;
        let jwt = host_token("POST", "/submit?a=1", 60);
        let request = InboundRequest::new("POST", &format!("/submit?a=2&jwt={jwt}"))
            .with_form_body("a=1");
        let err = auth.authenticate(&request, AuthMode::Standard).await.unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn test_base_path_stripped_before_hashing() {
        let (auth, _) = setup(AddonConfig::new("my-addon", "https://addon.example.com/base")).await;
        let jwt = host_token("GET", "/panel?x=1", 60);
        let request = InboundRequest::new("GET", &format!("/base/panel?x=1&jwt={jwt}"));
        assert!(auth.authenticate(&request, AuthMode::Standard).await.is_ok());
    }

    #[tokio::test]
    async fn test_session_token_round_trip() {
        let (auth, _) = setup(config()).await;
        let jwt = host_token("GET", "/p", 60);
        let first = auth
            .authenticate(&InboundRequest::new("GET", &format!("/p?jwt={jwt}")), AuthMode::Standard)
            .await
            .unwrap();
        let session = first.context().unwrap().token.clone();

        let follow_up = InboundRequest::new("POST", "/api/data").with_header("X-acpt", &session);
        let outcome = auth.authenticate(&follow_up, AuthMode::SessionToken).await.unwrap();
        assert_eq!(outcome.context().unwrap().tenant_key, TENANT);

        let via_param = InboundRequest::new("GET", &format!("/api/data?acpt={session}"));
        assert!(auth.authenticate(&via_param, AuthMode::Standard).await.is_err());
        assert!(auth.authenticate(&via_param, AuthMode::SessionToken).await.is_ok());
    }

    #[tokio::test]
    async fn test_session_mode_ignores_jwt_param() {
        let (auth, _) = setup(config()).await;
        let jwt = host_token("GET", "/p", 60);
        let request = InboundRequest::new("GET", &format!("/p?jwt={jwt}"));
        let err = auth.authenticate(&request, AuthMode::SessionToken).await.unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn test_store_failure_is_500() {
        let (auth, store) = setup(config()).await;
        store.set(CLIENT_INFO_KEY, json!(42), TENANT).await.unwrap();
        let jwt = host_token("GET", "/p", 60);
        let request = InboundRequest::new("GET", &format!("/p?jwt={jwt}"));
        let err = auth.authenticate(&request, AuthMode::Standard).await.unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_missing_secret() {
        let (auth, store) = setup(config()).await;
        store
            .set(CLIENT_INFO_KEY, json!({"clientKey": TENANT, "baseUrl": "https://h"}), TENANT)
            .await
            .unwrap();
        let jwt = host_token("GET", "/p", 60);
        let request = InboundRequest::new("GET", &format!("/p?jwt={jwt}"));
        let err = auth.authenticate(&request, AuthMode::Standard).await.unwrap_err();
        assert!(err.to_string().contains("sharedSecret"));
    }

    #[tokio::test]
    async fn test_skip_verification() {
        let mut config = config();
        config.auth.skip_verification = true;
        let (auth, _) = setup(config).await;
        let outcome =
            auth.authenticate(&InboundRequest::new("GET", "/p"), AuthMode::Standard).await.unwrap();
        assert!(matches!(outcome, AuthOutcome::Skipped));
        assert!(outcome.response_headers().is_empty());
    }

    #[tokio::test]
    async fn test_skip_token_verification_only_affects_session_mode() {
        let mut config = config();
        config.auth.skip_token_verification = true;
        let (auth, _) = setup(config).await;
        let request = InboundRequest::new("GET", "/p");
        assert!(auth.authenticate(&request, AuthMode::SessionToken).await.is_ok());
        assert!(auth.authenticate(&request, AuthMode::Standard).await.is_err());
    }

    #[tokio::test]
    async fn test_webhook_events() {
        let store = MemoryStore::new();
        store
            .set(
                CLIENT_INFO_KEY,
                json!({"clientKey": TENANT, "sharedSecret": SECRET, "baseUrl": "https://h"}),
                TENANT,
            )
            .await
            .unwrap();
        let (observer, mut rx) = ChannelObserver::new();
        let auth = Authenticator::new(
            &config(),
            Arc::new(store),
            EventBus::new().with_observer(observer),
        )
        .unwrap();

        let jwt = host_token("POST", "/issue-created", 60);
        let request = InboundRequest::new("POST", "/issue-created")
            .with_header("authorization", &format!("JWT {jwt}"));
        auth.authenticate_webhook(&request).await.unwrap();

        assert_eq!(rx.try_recv().unwrap(), LifecycleEvent::WebhookAuthVerificationTriggered);
        assert_eq!(
            rx.try_recv().unwrap(),
            LifecycleEvent::WebhookAuthVerificationSuccessful { client_key: TENANT.to_owned() }
        );
    }

    #[tokio::test]
    async fn test_reject_escapes_or_forwards() {
        let (auth, _) = setup(config()).await;
        let error = AuthError::UnknownTenant("<script>".to_owned());
        match auth.reject(&error) {
            RejectionAction::Respond { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("&lt;script&gt;"));
            }
            RejectionAction::Forward(_) => unreachable!("default mode responds"),
        }

        let mut forwarding = config();
        forwarding.auth.error_handling = ErrorHandling::Forward;
        let (auth, _) = setup(forwarding).await;
        assert_eq!(
            auth.reject(&error),
            RejectionAction::Forward(Rejection { status: 401, message: error.to_string() })
        );
    }
}
