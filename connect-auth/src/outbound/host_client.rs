//! Signed requests from the add-on back to a tenant's host.

use std::{fmt, sync::Arc};

use reqwest::{
    Client, Method, RequestBuilder, Response,
    header::AUTHORIZATION,
    multipart::{Form, Part},
};
use serde_json::Value;
use tracing::instrument;
use url::Url;

use crate::{
    canonical::CanonicalRequest,
    config::AddonConfig,
    error::{AuthError, Result},
    reliability::{RetryPolicy, is_retryable, retry_with_backoff},
    store::{CredentialStore, TenantCredential, load_credential},
    token::{self, Claims},
};

/// One field of a multipart body.
///
/// Kept as owned bytes so the form can be rebuilt for every retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartField {
    /// Field name.
    pub name: String,
    /// Field content.
    pub data: Vec<u8>,
    /// File name, for file uploads.
    pub file_name: Option<String>,
    /// MIME type of the content.
    pub content_type: Option<String>,
}

impl MultipartField {
    /// A plain text field.
    #[must_use]
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: value.into().into_bytes(),
            file_name: None,
            content_type: None,
        }
    }

    /// A file field.
    #[must_use]
    pub fn file(name: impl Into<String>, file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self { name: name.into(), data, file_name: Some(file_name.into()), content_type: None }
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    fn to_part(&self) -> Result<Part> {
        let mut part = Part::bytes(self.data.clone());
        if let Some(file_name) = &self.file_name {
            part = part.file_name(file_name.clone());
        }
        if let Some(content_type) = &self.content_type {
            part = part.mime_str(content_type)?;
        }
        Ok(part)
    }
}

/// Request body. The modes are mutually exclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum HostBody {
    /// No body.
    #[default]
    Empty,
    /// `application/json`.
    Json(Value),
    /// `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
    /// `multipart/form-data`.
    Multipart(Vec<MultipartField>),
}

/// A request to send to a tenant's host.
///
/// # Examples
///
/// ```
/// use connect_auth::outbound::{HostBody, HostRequest};
/// use serde_json::json;
///
/// let request = HostRequest::post("/rest/api/2/issue")
///     .with_json(json!({"fields": {"summary": "Hello"}}))
///     .as_user("admin");
/// assert_eq!(request.uri(), "/rest/api/2/issue");
/// assert!(matches!(request.body(), HostBody::Json(_)));
/// ```
#[derive(Debug, Clone)]
pub struct HostRequest {
    method: Method,
    uri: String,
    body: HostBody,
    user: Option<String>,
    headers: Vec<(String, String)>,
    retry: bool,
}

impl HostRequest {
    /// Creates a request without body.
    ///
    /// Transient failures are retried only for idempotent methods; see
    /// [`with_retry`](Self::with_retry).
    #[must_use]
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            retry: method.is_idempotent(),
            method,
            uri: uri.into(),
            body: HostBody::Empty,
            user: None,
            headers: Vec::new(),
        }
    }

    /// `GET uri`.
    #[must_use]
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    /// `POST uri`.
    #[must_use]
    pub fn post(uri: impl Into<String>) -> Self {
        Self::new(Method::POST, uri)
    }

    /// `PUT uri`.
    #[must_use]
    pub fn put(uri: impl Into<String>) -> Self {
        Self::new(Method::PUT, uri)
    }

    /// `PATCH uri`.
    #[must_use]
    pub fn patch(uri: impl Into<String>) -> Self {
        Self::new(Method::PATCH, uri)
    }

    /// `DELETE uri`.
    #[must_use]
    pub fn delete(uri: impl Into<String>) -> Self {
        Self::new(Method::DELETE, uri)
    }

    /// `HEAD uri`.
    #[must_use]
    pub fn head(uri: impl Into<String>) -> Self {
        Self::new(Method::HEAD, uri)
    }

    /// Sends `value` as JSON.
    #[must_use]
    pub fn with_json(mut self, value: Value) -> Self {
        self.body = HostBody::Json(value);
        self
    }

    /// Sends `fields` URL-encoded.
    #[must_use]
    pub fn with_form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = HostBody::Form(fields);
        self
    }

    /// Sends `fields` as multipart form data.
    #[must_use]
    pub fn with_multipart(mut self, fields: Vec<MultipartField>) -> Self {
        self.body = HostBody::Multipart(fields);
        self
    }

    /// Acts on behalf of `user`; becomes the token's `sub`.
    #[must_use]
    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Overrides whether transient failures are retried.
    ///
    /// A retried `POST` or `PATCH` may be applied twice by the host, so only
    /// enable this for endpoints that tolerate duplicates.
    #[must_use]
    pub fn with_retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }

    /// Whether transient failures are retried.
    #[must_use]
    pub const fn retries(&self) -> bool {
        self.retry
    }

    /// The request URI as given.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The request body.
    #[must_use]
    pub const fn body(&self) -> &HostBody {
        &self.body
    }
}

/// HTTP client that signs every relative request with the tenant's secret.
///
/// Relative URIs are resolved against the tenant's stored base URL and carry an
/// `Authorization: JWT <token>` header bound to the request by its `qsh`.
/// Absolute URIs are sent as they are, unsigned.
#[derive(Clone)]
pub struct HostClient {
    addon_key: String,
    validity_secs: i64,
    client: Client,
    store: Arc<dyn CredentialStore>,
    retry: RetryPolicy,
}

impl fmt::Debug for HostClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostClient")
            .field("addon_key", &self.addon_key)
            .field("validity_secs", &self.validity_secs)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl HostClient {
    /// Creates a client for the add-on described by `config`.
    #[must_use]
    pub fn new(config: &AddonConfig, client: Client, store: Arc<dyn CredentialStore>) -> Self {
        let validity_secs = config.jwt.validity_minutes.saturating_mul(60);
        Self {
            addon_key: config.key.clone(),
            validity_secs: i64::try_from(validity_secs).unwrap_or(i64::MAX),
            client,
            store,
            retry: RetryPolicy::from(&config.retry),
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sends `request` to the host of `tenant`.
    ///
    /// For requests that [retry](HostRequest::retries), timeouts, connection
    /// failures and 5xx responses are retried and each attempt carries a
    /// freshly minted token. Other requests are sent once. Statuses below 500
    /// are returned to the caller.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UnknownTenant`] if no credential is stored for `tenant`
    /// - [`AuthError::Unauthenticated`] if the credential has no shared secret
    /// - [`AuthError::BadRequest`] if the URI cannot be resolved
    /// - [`AuthError::HostResponse`] if the host kept answering with 5xx
    /// - [`AuthError::HttpError`] on transport failure
    #[instrument(skip(self, request), fields(method = %request.method, uri = %request.uri))]
    pub async fn send(&self, tenant: &str, request: &HostRequest) -> Result<Response> {
        let credential = load_credential(self.store.as_ref(), tenant)
            .await?
            .ok_or_else(|| AuthError::UnknownTenant(tenant.to_owned()))?;

        if !request.retry {
            return self.attempt(&credential, request).await;
        }
        retry_with_backoff(&self.retry, || self.attempt(&credential, request), is_retryable).await
    }

    /// Mints the token that authorizes `method uri` for `credential`'s tenant.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::BadRequest`] if `uri` is not relative and
    /// [`AuthError::Unauthenticated`] if the credential has no secret.
    pub fn sign(
        &self,
        credential: &TenantCredential,
        method: &Method,
        uri: &str,
        user: Option<&str>,
    ) -> Result<String> {
        let secret = credential.secret().ok_or_else(|| {
            AuthError::Unauthenticated(format!(
                "Could not find JWT sharedSecret in stored client data for {}",
                credential.client_key
            ))
        })?;
        let qsh = CanonicalRequest::from_relative_uri(method.as_str(), uri)?.query_string_hash();

        let now = token::now_unix();
        let exp = now.saturating_add(self.validity_secs);
        let mut claims = Claims::new(self.addon_key.clone(), now, exp)
            .with_audience(credential.client_key.clone())
            .with_qsh(qsh);
        if let Some(user) = user {
            claims = claims.with_subject(user);
        }
        token::encode(&claims, secret)
    }

    async fn attempt(
        &self,
        credential: &TenantCredential,
        request: &HostRequest,
    ) -> Result<Response> {
        let builder = if is_absolute(&request.uri) {
            self.client.request(request.method.clone(), &request.uri)
        } else {
            let url = resolve(&credential.base_url, &request.uri);
            let token =
                self.sign(credential, &request.method, &request.uri, request.user.as_deref())?;
            self.client
                .request(request.method.clone(), url)
                .header(AUTHORIZATION, format!("JWT {token}"))
        };

        let response = with_body(with_headers(builder, &request.headers), &request.body)?
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AuthError::HostResponse {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("server error").to_owned(),
            });
        }
        Ok(response)
    }
}

fn is_absolute(uri: &str) -> bool {
    Url::parse(uri).is_ok()
}

/// Appends `uri` to `base_url`, keeping any context path the base carries.
fn resolve(base_url: &str, uri: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if uri.starts_with('/') {
        format!("{base}{uri}")
    } else {
        format!("{base}/{uri}")
    }
}

fn with_headers(mut builder: RequestBuilder, headers: &[(String, String)]) -> RequestBuilder {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn with_body(builder: RequestBuilder, body: &HostBody) -> Result<RequestBuilder> {
    Ok(match body {
        HostBody::Empty => builder,
        HostBody::Json(value) => builder.json(value),
        HostBody::Form(fields) => builder.form(fields),
        HostBody::Multipart(fields) => {
            let mut form = Form::new();
            for field in fields {
                form = form.part(field.name.clone(), field.to_part()?);
            }
            builder.multipart(form)
        }
    })
}
