//! End-to-end OAuth flow tests: the webhook router in front of an
//! in-process gRPC server, with a mock provider standing in for the 3P.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use httpmock::prelude::*;
use thrippy::http::{router, WebhookState};
use thrippy::links::LinkStore;
use thrippy::rpc::client::{self, ThrippyClient};
use thrippy::rpc::proto;
use thrippy::secrets::SecretsManager;
use tower::ServiceExt;

struct Harness {
    app: Router,
    client: ThrippyClient,
}

async fn harness(fallback_url: Option<&str>) -> anyhow::Result<Harness> {
    let links = LinkStore::new(SecretsManager::for_testing());
    let grpc_addr = thrippy::rpc::start_server("127.0.0.1:0", links, None)
        .await?
        .to_string();

    let app = router(Arc::new(WebhookState {
        grpc_addr: grpc_addr.clone(),
        grpc_tls: None,
        redirect_url: "https://hooks.example.com/callback".to_string(),
        fallback_url: fallback_url.map(str::to_string),
    }));
    let client = client::connect(&grpc_addr, None).await?;

    Ok(Harness { app, client })
}

async fn create_oauth_link(
    client: &mut ThrippyClient,
    auth_url: &str,
    token_url: &str,
) -> anyhow::Result<String> {
    let resp = client
        .create_link(proto::CreateLinkRequest {
            template: "generic-oauth".to_string(),
            oauth_config: Some(proto::OAuthConfig {
                auth_url: auth_url.to_string(),
                token_url: token_url.to_string(),
                client_id: "client-id".to_string(),
                client_secret: "client-secret".to_string(),
                scopes: vec!["read".to_string()],
                ..Default::default()
            }),
        })
        .await?;
    Ok(resp.into_inner().link_id)
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn location(resp: &axum::response::Response) -> String {
    resp.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Extracts the state parameter from a consent-page redirect URL.
fn state_from_redirect(url: &str) -> String {
    let (_, query) = url.split_once('?').unwrap();
    serde_urlencoded::from_str::<HashMap<String, String>>(query).unwrap()["state"].clone()
}

#[tokio::test]
async fn start_redirects_to_consent_page() -> anyhow::Result<()> {
    let mut h = harness(None).await?;
    let link_id = create_oauth_link(
        &mut h.client,
        "https://provider.example.com/authorize",
        "https://provider.example.com/token",
    )
    .await?;

    let resp = get(&h.app, &format!("/start?id={link_id}&memo=my_memo")).await;
    assert_eq!(resp.status(), StatusCode::FOUND);

    let url = location(&resp);
    assert!(url.starts_with("https://provider.example.com/authorize?"));
    assert!(url.contains("client_id=client-id"));
    assert!(url.contains("redirect_uri=https%3A%2F%2Fhooks.example.com%2Fcallback"));
    assert!(url.contains("scope=read"));

    // state = "<id>_<nonce>_<memo>".
    let state = state_from_redirect(&url);
    let (id, nonce, memo) = thrippy::http::parse_state_param(&state)?;
    assert_eq!(id, link_id);
    assert_eq!(nonce.len(), 22);
    assert_eq!(memo, "my_memo");

    Ok(())
}

#[tokio::test]
async fn start_rejects_bad_requests() -> anyhow::Result<()> {
    let h = harness(None).await?;

    let resp = get(&h.app, "/start").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = get(&h.app, "/start?id=111").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Well-formed but unknown link ID.
    let resp = get(&h.app, "/start?id=AQYywDkK3hiH9FEERA3aU5").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(resp).await.contains("Link not found"));

    Ok(())
}

#[tokio::test]
async fn callback_exchanges_code_and_stores_token() -> anyhow::Result<()> {
    let provider = MockServer::start_async().await;
    provider.mock_async(|when, then| {
        when.method(POST)
            .path("/token")
            .body_contains("grant_type=authorization_code")
            .body_contains("code=the-code");
        then.status(200).json_body(serde_json::json!({
            "access_token": "fresh-token",
            "refresh_token": "refresh-me",
            "token_type": "Bearer",
            "expires_in": 3600,
        }));
    }).await;

    let mut h = harness(None).await?;
    let link_id = create_oauth_link(
        &mut h.client,
        "https://provider.example.com/authorize",
        &provider.url("/token"),
    )
    .await?;

    // Leg 1: /start captures the state embedded in the redirect.
    let resp = get(&h.app, &format!("/start?id={link_id}")).await;
    let state = state_from_redirect(&location(&resp));

    // Legs 2+3: the provider redirects back, and the code is exchanged.
    let resp = get(&h.app, &format!("/callback?code=the-code&state={state}")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_string(resp).await.contains("You may now close this browser tab"));

    let creds = h
        .client
        .get_credentials(proto::GetCredentialsRequest {
            link_id: link_id.clone(),
        })
        .await?
        .into_inner()
        .credentials;
    assert_eq!(creds["access_token"], "fresh-token");
    assert_eq!(creds["refresh_token"], "refresh-me");
    assert_eq!(creds["token_type"], "Bearer");

    // A successful credential write rotates the nonce, so replaying
    // the captured state is rejected.
    let resp = get(&h.app, &format!("/callback?code=the-code&state={state}")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn callback_rejects_provider_errors() -> anyhow::Result<()> {
    let h = harness(None).await?;

    let resp = get(
        &h.app,
        "/callback?error=access_denied&error_description=User+cancelled",
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(resp).await.contains("User cancelled"));

    Ok(())
}

#[tokio::test]
async fn callback_without_state() -> anyhow::Result<()> {
    // Without a fallback URL: forbidden.
    let h = harness(None).await?;
    let resp = get(&h.app, "/callback?code=x").await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // With one: redirect.
    let h = harness(Some("https://fallback.example.com/")).await?;
    let resp = get(&h.app, "/callback?code=x").await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), "https://fallback.example.com/");

    Ok(())
}

#[tokio::test]
async fn callback_rejects_invalid_state() -> anyhow::Result<()> {
    let h = harness(None).await?;

    let resp = get(&h.app, "/callback?state=garbage").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(resp).await.contains("Invalid state parameter"));

    Ok(())
}

#[tokio::test]
async fn callback_rejects_wrong_nonce() -> anyhow::Result<()> {
    let mut h = harness(None).await?;
    let link_id = create_oauth_link(
        &mut h.client,
        "https://provider.example.com/authorize",
        "https://provider.example.com/token",
    )
    .await?;

    let forged = format!("{link_id}_X8cbAvTF2M2crW9YrfVMoB");
    let resp = get(&h.app, &format!("/callback?code=c&state={forged}")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(body_string(resp).await.contains("Invalid or expired OAuth state"));

    Ok(())
}

#[tokio::test]
async fn callback_rejects_unapproved_github_install() -> anyhow::Result<()> {
    let mut h = harness(None).await?;
    let link_id = create_oauth_link(
        &mut h.client,
        "https://provider.example.com/authorize",
        "https://provider.example.com/token",
    )
    .await?;

    let resp = get(&h.app, &format!("/start?id={link_id}")).await;
    let state = state_from_redirect(&location(&resp));

    let resp = get(
        &h.app,
        &format!("/callback?state={state}&setup_action=request"),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(body_string(resp)
        .await
        .contains("approved by an organization owner"));

    Ok(())
}

#[tokio::test]
async fn callback_records_github_install_without_exchange() -> anyhow::Result<()> {
    let mut h = harness(None).await?;
    let link_id = create_oauth_link(
        &mut h.client,
        "https://provider.example.com/authorize",
        "https://provider.example.com/token",
    )
    .await?;

    let resp = get(&h.app, &format!("/start?id={link_id}")).await;
    let state = state_from_redirect(&location(&resp));

    // No `code` at all: the install is recorded without an exchange.
    let resp = get(
        &h.app,
        &format!("/callback?state={state}&setup_action=install&installation_id=12345"),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn callback_requires_code() -> anyhow::Result<()> {
    let mut h = harness(None).await?;
    let link_id = create_oauth_link(
        &mut h.client,
        "https://provider.example.com/authorize",
        "https://provider.example.com/token",
    )
    .await?;

    let resp = get(&h.app, &format!("/start?id={link_id}")).await;
    let state = state_from_redirect(&location(&resp));

    let resp = get(&h.app, &format!("/callback?state={state}")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(body_string(resp).await.contains("Missing OAuth code parameter"));

    Ok(())
}

#[tokio::test]
async fn callback_rejects_failed_exchange() -> anyhow::Result<()> {
    let provider = MockServer::start_async().await;
    provider.mock_async(|when, then| {
        when.method(POST).path("/token");
        then.status(401).body("bad_verification_code");
    }).await;

    let mut h = harness(None).await?;
    let link_id = create_oauth_link(
        &mut h.client,
        "https://provider.example.com/authorize",
        &provider.url("/token"),
    )
    .await?;

    let resp = get(&h.app, &format!("/start?id={link_id}")).await;
    let state = state_from_redirect(&location(&resp));

    let resp = get(&h.app, &format!("/callback?code=wrong&state={state}")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(body_string(resp).await.contains("OAuth code exchange error"));

    Ok(())
}
