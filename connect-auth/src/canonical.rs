//! Canonical request encoding and query string hashes.
//!
//! Every signed request carries a `qsh` claim: the lowercase hex SHA-256 of the
//! request's canonical form `METHOD&PATH&PARAMS`. Host and add-on must produce
//! byte-identical canonical strings, so the rules here are fixed:
//!
//! - the method is uppercased
//! - an empty path becomes `/`, the add-on's own base path is stripped, and
//!   every `&` in the path is encoded as `%26`
//! - token-carrying parameters (`jwt`, `acpt`) are dropped
//! - names are sorted; each name's values are sorted, RFC 3986 encoded and
//!   comma-joined
//! - the separator after the path is always present, even with no parameters
//!
//! # Examples
//!
//! ```
//! use connect_auth::canonical::{CanonicalRequest, parse_query};
//!
//! let request = CanonicalRequest::new("get", "/path/to/service")
//!     .with_query(parse_query("zee_last=param&first=param"));
//! assert_eq!(request.canonical_string(), "GET&/path/to/service&first=param&zee_last=param");
//! assert_eq!(request.query_string_hash().len(), 64);
//! ```

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{AuthError, Result};

/// Parameter names mapped to every value supplied for them.
pub type ParamMap = BTreeMap<String, Vec<String>>;

/// Query parameter carrying the request token.
pub const JWT_PARAM: &str = "jwt";

/// Query parameter carrying a session token.
pub const SESSION_TOKEN_PARAM: &str = "acpt";

const EXCLUDED_PARAMS: [&str; 2] = [JWT_PARAM, SESSION_TOKEN_PARAM];

// RFC 3986 unreserved characters pass through, everything else is escaped.
const RFC3986: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Percent-encodes `input` per RFC 3986 with uppercase hex digits.
///
/// Spaces become `%20`, never `+`.
///
/// # Examples
///
/// ```
/// use connect_auth::canonical::encode_rfc3986;
///
/// assert_eq!(encode_rfc3986("Australia/Sydney"), "Australia%2FSydney");
/// assert_eq!(encode_rfc3986("a b~c"), "a%20b~c");
/// ```
#[must_use]
pub fn encode_rfc3986(input: &str) -> String {
    utf8_percent_encode(input, RFC3986).to_string()
}

/// Decodes an `application/x-www-form-urlencoded` string into a [`ParamMap`].
///
/// Repeated names accumulate values in the order they appear.
#[must_use]
pub fn parse_query(query: &str) -> ParamMap {
    let mut params = ParamMap::new();
    for (name, value) in url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
        params.entry(name.into_owned()).or_default().push(value.into_owned());
    }
    params
}

/// The canonical form of one HTTP request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalRequest {
    method: String,
    path: String,
    params: ParamMap,
}

impl CanonicalRequest {
    /// Starts a canonical request for `method` and `path` with no parameters.
    #[must_use]
    pub fn new(method: &str, path: &str) -> Self {
        Self { method: method.to_ascii_uppercase(), path: path.to_owned(), params: ParamMap::new() }
    }

    /// Builds a canonical request from a relative URI such as `/rest/api?x=y`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::BadRequest`] if `uri` is absolute or cannot be parsed.
    pub fn from_relative_uri(method: &str, uri: &str) -> Result<Self> {
        if Url::parse(uri).is_ok() {
            return Err(AuthError::BadRequest(format!("expected a relative URI, got {uri}")));
        }
        let resolved = Url::parse("http://relative.invalid")
            .and_then(|base| base.join(uri))
            .map_err(|e| AuthError::BadRequest(format!("invalid request URI {uri}: {e}")))?;
        let request = Self::new(method, resolved.path());
        Ok(match resolved.query() {
            Some(query) => request.with_query(parse_query(query)),
            None => request,
        })
    }

    /// Merges query parameters into the request.
    #[must_use]
    pub fn with_query(mut self, params: ParamMap) -> Self {
        self.merge(params);
        self
    }

    /// Merges decoded form body parameters into the request.
    ///
    /// Used for the body-inclusive fallback when a host signed its form fields.
    #[must_use]
    pub fn with_body(mut self, params: ParamMap) -> Self {
        self.merge(params);
        self
    }

    /// Strips the add-on's base path from the front of the request path.
    ///
    /// `base_url` is the add-on's configured base URL; only its path component
    /// matters. A base path of `/` leaves the request untouched.
    ///
    /// # Examples
    ///
    /// ```
    /// use connect_auth::canonical::CanonicalRequest;
    ///
    /// let request = CanonicalRequest::new("GET", "/base/path/to/service")
    ///     .relative_to("https://bitbucket.org/base");
    /// assert_eq!(request.canonical_string(), "GET&/path/to/service&");
    /// ```
    #[must_use]
    pub fn relative_to(mut self, base_url: &str) -> Self {
        let Ok(base) = Url::parse(base_url) else {
            return self;
        };
        let base_path = base.path().trim_end_matches('/');
        if !base_path.is_empty()
            && let Some(rest) = self.path.strip_prefix(base_path)
            && (rest.is_empty() || rest.starts_with('/'))
        {
            self.path = rest.to_owned();
        }
        self
    }

    fn merge(&mut self, params: ParamMap) {
        for (name, values) in params {
            self.params.entry(name).or_default().extend(values);
        }
    }

    /// Renders `METHOD&PATH&PARAMS`.
    #[must_use]
    pub fn canonical_string(&self) -> String {
        let path = if self.path.is_empty() { "/" } else { self.path.as_str() };
        format!("{}&{}&{}", self.method, path.replace('&', "%26"), self.canonical_params())
    }

    fn canonical_params(&self) -> String {
        self.params
            .iter()
            .filter(|(name, _)| !EXCLUDED_PARAMS.contains(&name.as_str()))
            .map(|(name, values)| {
                let mut sorted: Vec<&String> = values.iter().collect();
                sorted.sort();
                let joined =
                    sorted.into_iter().map(|v| encode_rfc3986(v)).collect::<Vec<_>>().join(",");
                format!("{}={joined}", encode_rfc3986(name))
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Lowercase hex SHA-256 of [`canonical_string`](Self::canonical_string).
    #[must_use]
    pub fn query_string_hash(&self) -> String {
        hex::encode(Sha256::digest(self.canonical_string().as_bytes()))
    }
}
