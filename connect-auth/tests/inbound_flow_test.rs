//! Install, authenticate and uninstall through the `Addon` facade.

mod common;

use std::sync::Arc;

use common::{ADDON_KEY, config};
use connect_auth::{
    Addon, AuthError,
    canonical::CanonicalRequest,
    config::{ErrorHandling, VerificationStrategy},
    events::{ChannelObserver, EventBus, LifecycleEvent},
    inbound::{AuthMode, InboundRequest, RejectionAction, SESSION_TOKEN_HEADER},
    store::{MemoryStore, load_credential},
    token::{self, Claims},
};
use serde_json::json;

const TENANT: &str = "jira:15489595";
const SECRET: &str = "s3cr3t";

async fn installed_addon() -> (Addon, tokio::sync::mpsc::UnboundedReceiver<LifecycleEvent>) {
    let mut config = config(VerificationStrategy::Disabled);
    config.local_base_url = "https://addon.example.com/my-addon".to_owned();
    config.whitelist = Some(vec!["*.atlassian.net".to_owned()]);

    let (observer, mut rx) = ChannelObserver::new();
    let events = EventBus::new().with_observer(observer);
    let addon = Addon::new(config, Arc::new(MemoryStore::new()), events).unwrap();
    addon
        .installer()
        .install(&json!({
            "key": ADDON_KEY,
            "clientKey": TENANT,
            "sharedSecret": SECRET,
            "baseUrl": "https://example.atlassian.net"
        }))
        .await
        .unwrap();
    while rx.try_recv().is_ok() {}
    (addon, rx)
}

/// A token as the host would mint it for `method uri`.
fn host_token(method: &str, uri: &str) -> String {
    let now = token::now_unix();
    let qsh = CanonicalRequest::from_relative_uri(method, uri).unwrap().query_string_hash();
    let claims = Claims::new(TENANT, now, now + 180).with_qsh(qsh).with_subject("admin");
    token::encode(&claims, SECRET).unwrap()
}

#[tokio::test]
async fn test_page_load_then_session_requests() {
    let (addon, _rx) = installed_addon().await;
    let auth = addon.authenticator();

    // The host loads a page under the add-on's base path.
    let jwt = host_token("GET", "/issue-panel?issueKey=ABC-1&lic=none");
    let page = InboundRequest::new(
        "GET",
        &format!("/my-addon/issue-panel?issueKey=ABC-1&lic=none&jwt={jwt}"),
    );
    let outcome = auth.authenticate(&page, AuthMode::Standard).await.unwrap();
    let context = outcome.context().unwrap();
    assert_eq!(context.tenant_key, TENANT);
    assert_eq!(context.user_id.as_deref(), Some("admin"));
    assert_eq!(context.host_base_url, "https://example.atlassian.net");

    let headers = outcome.response_headers();
    assert_eq!(headers[0].0, SESSION_TOKEN_HEADER);

    // The page calls back with the session token.
    let ajax = InboundRequest::new("POST", "/my-addon/api/comments")
        .with_header("x-acpt", &headers[0].1)
        .with_form_body("text=hello");
    let follow_up = auth.authenticate(&ajax, AuthMode::SessionToken).await.unwrap();
    assert_eq!(follow_up.context().unwrap().tenant_key, TENANT);
    assert_eq!(follow_up.context().unwrap().user_id.as_deref(), Some("admin"));
}

#[tokio::test]
async fn test_tampered_query_rejected() {
    let (addon, _rx) = installed_addon().await;
    let jwt = host_token("GET", "/issue-panel?issueKey=ABC-1");
    let tampered =
        InboundRequest::new("GET", &format!("/my-addon/issue-panel?issueKey=ABC-2&jwt={jwt}"));

    let err = addon.authenticator().authenticate(&tampered, AuthMode::Standard).await.unwrap_err();
    assert_eq!(err.status_code(), 401);
    match addon.authenticator().reject(&err) {
        RejectionAction::Respond { status, body } => {
            assert_eq!(status, 401);
            let expected_qsh = CanonicalRequest::new("GET", "/issue-panel").query_string_hash();
            assert!(!body.contains(&expected_qsh));
        }
        RejectionAction::Forward(_) => panic!("default error handling responds"),
    }
}

#[tokio::test]
async fn test_token_signed_with_other_secret_rejected() {
    let (addon, _rx) = installed_addon().await;
    let now = token::now_unix();
    let qsh = CanonicalRequest::new("GET", "/hook").query_string_hash();
    let forged = token::encode(&Claims::new(TENANT, now, now + 60).with_qsh(qsh), "guess").unwrap();
    let request = InboundRequest::new("GET", "/my-addon/hook")
        .with_header("Authorization", &format!("JWT {forged}"));

    let err = addon.authenticator().authenticate(&request, AuthMode::Standard).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_webhook_emits_verification_events() {
    let (addon, mut rx) = installed_addon().await;
    let jwt = host_token("POST", "/webhooks/issue-created");
    let request = InboundRequest::new("POST", "/my-addon/webhooks/issue-created")
        .with_header("Authorization", &format!("JWT {jwt}"));

    addon.authenticator().authenticate_webhook(&request).await.unwrap();
    assert_eq!(rx.try_recv().unwrap(), LifecycleEvent::WebhookAuthVerificationTriggered);
    assert_eq!(
        rx.try_recv().unwrap(),
        LifecycleEvent::WebhookAuthVerificationSuccessful { client_key: TENANT.to_owned() }
    );
}

#[tokio::test]
async fn test_non_whitelisted_install_leaves_store_untouched() {
    let (addon, _rx) = installed_addon().await;
    let err = addon
        .installer()
        .install(&json!({
            "clientKey": "jira:evil",
            "sharedSecret": "x",
            "baseUrl": "https://evil.example.com"
        }))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Forbidden(_)));
    assert!(load_credential(addon.store().as_ref(), "jira:evil").await.unwrap().is_none());
}

#[tokio::test]
async fn test_uninstall_notifies() {
    let (addon, mut rx) = installed_addon().await;
    addon.installer().uninstall(TENANT).unwrap();
    assert_eq!(
        rx.try_recv().unwrap(),
        LifecycleEvent::Uninstalled { client_key: TENANT.to_owned() }
    );
}

#[tokio::test]
async fn test_forwarded_rejection() {
    let mut config = config(VerificationStrategy::Disabled);
    config.auth.error_handling = ErrorHandling::Forward;
    let addon = Addon::new(config, Arc::new(MemoryStore::new()), EventBus::new()).unwrap();

    let err = addon
        .authenticator()
        .authenticate(&InboundRequest::new("GET", "/page"), AuthMode::Standard)
        .await
        .unwrap_err();
    let RejectionAction::Forward(rejection) = addon.authenticator().reject(&err) else {
        panic!("forwarding configured");
    };
    assert_eq!(rejection.status, 401);
    assert_eq!(
        serde_json::to_value(&rejection).unwrap(),
        json!({ "code": 401, "message": "Could not find authentication data on request" })
    );
}
