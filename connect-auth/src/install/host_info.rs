//! Fetches what a host says about itself.
//!
//! Two documents are used to check an installing host's identity:
//!
//! - the consumer info (`<baseUrl>/plugins/servlet/oauth/consumer-info`), an
//!   XML `<consumer>` element carrying the host's application key and public key
//! - the capabilities document, JSON whose `links.self` must point back to the
//!   URL it was fetched from

use std::time::Duration;

use reqwest::{Client, StatusCode, header::CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;
use url::Url;

use crate::{
    error::{AuthError, Result},
    transport::{redact_url, split_credentials},
};

/// Path of the consumer info servlet, relative to a host base URL.
pub const CONSUMER_INFO_PATH: &str = "/plugins/servlet/oauth/consumer-info";

/// A host's consumer info.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostInfo {
    /// Application key; becomes the tenant key when the add-on registers itself.
    pub key: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Public key, compared verbatim with the one in the install payload.
    #[serde(rename = "publicKey", default)]
    pub public_key: String,
}

impl HostInfo {
    /// Parses a `<consumer>` XML document.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::HostResponse`] if the document is not consumer info.
    pub fn from_xml(xml: &str) -> Result<Self> {
        quick_xml::de::from_str(xml).map_err(|e| AuthError::HostResponse {
            status: 200,
            message: format!("unexpected host info document: {e}"),
        })
    }
}

/// Fetches consumer info for the host at `base_url`.
///
/// Credentials embedded in `base_url` are sent as basic auth.
///
/// # Errors
///
/// - [`AuthError::HttpError`] if the host cannot be reached
/// - [`AuthError::HostResponse`] for a non-200 status, a non-XML content type
///   or an unparseable body
#[instrument(skip(client, base_url), fields(host = %redact_url(base_url)))]
pub async fn fetch_host_info(
    client: &Client,
    base_url: &str,
    timeout: Duration,
) -> Result<HostInfo> {
    let parsed = Url::parse(base_url)
        .map_err(|e| AuthError::BadRequest(format!("invalid host base URL: {e}")))?;
    let (base, auth) = split_credentials(&parsed);

    let mut request = client.get(format!("{base}{CONSUMER_INFO_PATH}")).timeout(timeout);
    if let Some(auth) = &auth {
        request = auth.apply(request);
    }
    let response = request.send().await?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(AuthError::HostResponse {
            status: status.as_u16(),
            message: "unexpected host info response".to_owned(),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    if !content_type.starts_with("application/xml") && !content_type.starts_with("text/xml") {
        return Err(AuthError::HostResponse {
            status: status.as_u16(),
            message: format!("unexpected host info response format {content_type}"),
        });
    }

    let body = response.text().await?;
    if body.trim().is_empty() {
        return Err(AuthError::HostResponse {
            status: status.as_u16(),
            message: "no host info response body".to_owned(),
        });
    }
    HostInfo::from_xml(&body)
}

/// Fetches a capabilities document and checks it names itself.
///
/// # Errors
///
/// - [`AuthError::HttpError`] if the document cannot be fetched or is not JSON
/// - [`AuthError::Forbidden`] if `links.self` differs from `url`
#[instrument(skip(client))]
pub async fn fetch_capabilities(client: &Client, url: &str) -> Result<Value> {
    let response = client.get(url).send().await?.error_for_status()?;
    let document: Value = response.json().await?;

    let self_link = document.pointer("/links/self").and_then(Value::as_str);
    if self_link != Some(url) {
        return Err(AuthError::Forbidden(format!(
            "The capabilities URL {url} doesn't match the resource's self link {}",
            self_link.unwrap_or("(none)")
        )));
    }
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONSUMER_INFO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<consumer>
  <key>jira:15489595</key>
  <name>JIRA</name>
  <publicKey>MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQCtKOu</publicKey>
  <description>Atlassian JIRA at http://localhost:2990/jira</description>
</consumer>"#;

    #[test]
    fn test_parse_consumer_info() {
        let info = HostInfo::from_xml(CONSUMER_INFO).unwrap();
        assert_eq!(info.key, "jira:15489595");
        assert_eq!(info.name.as_deref(), Some("JIRA"));
        assert_eq!(info.public_key, "MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQCtKOu");
    }

    #[test]
    fn test_parse_rejects_non_consumer() {
        assert!(matches!(HostInfo::from_xml("<html></html>"), Err(AuthError::HostResponse { .. })));
    }
}
