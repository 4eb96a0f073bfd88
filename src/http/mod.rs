//! OAuth 2.0 webhook server.
//!
//! Drives the three-legged authorization code flow:
//! 1. User opens `/start?id=<link>` (directly or via the CLI)
//! 2. `/start` redirects to the provider's consent page, embedding the
//!    link ID, its current nonce, and an optional memo in `state`
//! 3. User authorizes on the provider's site
//! 4. Provider redirects back to `/callback?code=...&state=...`
//! 5. `/callback` verifies the state against the stored nonce,
//!    exchanges the code, and persists the token over gRPC (which
//!    validates it against the 3P and rotates the nonce)

mod state;

pub use state::{construct_state_param, parse_state_param};

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Form, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tonic::transport::ClientTlsConfig;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::rpc::client;
use crate::templates::github;
use crate::{id, oauth};

const TIMEOUT: Duration = Duration::from_secs(3);

/// Shared state for the webhook handlers.
pub struct WebhookState {
    /// Address of our own gRPC server (the link registry).
    pub grpc_addr: String,
    pub grpc_tls: Option<ClientTlsConfig>,

    /// The server's OAuth callback URL, as registered with 3Ps.
    pub redirect_url: String,

    /// Optional destination for OAuth callbacks without a state.
    pub fallback_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StartParams {
    #[serde(default)]
    id: String,
    #[serde(default)]
    memo: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
    #[serde(default)]
    setup_action: String,
    #[serde(default)]
    installation_id: String,
}

/// Creates the webhook router.
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/start", get(start_get).post(start_post))
        .route("/callback", get(callback_handler))
        .layer(TimeoutLayer::new(TIMEOUT))
        .with_state(state)
}

/// Starts the webhook HTTP server. This is blocking, to keep the
/// process running.
pub async fn run(config: &Config, grpc_tls: Option<ClientTlsConfig>) -> Result<()> {
    let state = Arc::new(WebhookState {
        grpc_addr: config.grpc_addr.clone(),
        grpc_tls,
        redirect_url: config.redirect_url(),
        fallback_url: config.fallback_url.clone(),
    });

    let addr = format!("0.0.0.0:{}", config.webhook_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to listen on HTTP address {addr}"))?;

    info!(address = %addr, "HTTP server listening");
    info!(url = %state.redirect_url, "OAuth callback URL");

    axum::serve(listener, router(state))
        .await
        .context("HTTP serving error")
}

async fn start_get(
    State(state): State<Arc<WebhookState>>,
    Query(params): Query<StartParams>,
) -> Response {
    start_flow(state, params).await
}

async fn start_post(
    State(state): State<Arc<WebhookState>>,
    Form(params): Form<StartParams>,
) -> Response {
    start_flow(state, params).await
}

/// Begins a three-legged OAuth 2.0 flow by redirecting the client to
/// the authorization endpoint of a third-party service. The incoming
/// request may be GET or POST, but the redirect is always GET.
async fn start_flow(state: Arc<WebhookState>, params: StartParams) -> Response {
    info!(url_path = "/start", "received HTTP request");

    if params.id.is_empty() {
        warn!("bad request: missing ID parameter");
        return html_response(StatusCode::BAD_REQUEST, "Missing ID parameter");
    }
    if id::validate(&params.id).is_err() {
        warn!(id = %params.id, "bad request: invalid ID parameter");
        return html_response(StatusCode::BAD_REQUEST, "Invalid ID parameter");
    }

    let mut config = match fetch_oauth_config(&state, &params.id).await {
        Ok(Some(config)) => config,
        Ok(None) => {
            warn!(id = %params.id, "bad request: link not found");
            return html_response(StatusCode::BAD_REQUEST, "Link not found");
        }
        Err(resp) => return resp,
    };

    // The stored nonce binds the consent redirect to a single
    // callback; a link without one cannot start a flow.
    if config.nonce.is_empty() {
        warn!(id = %params.id, "forbidden: link has no OAuth nonce");
        return html_response(StatusCode::FORBIDDEN, "Missing OAuth nonce");
    }

    config.redirect_url = state.redirect_url.clone();
    let oauth_state = construct_state_param(&params.id, &config.nonce, &params.memo);
    let url = config.auth_code_url(&oauth_state);

    debug!(id = %params.id, url = %config.auth_url, "redirected HTTP request");
    redirect(&url)
}

/// Receives the redirect back from a third-party service's
/// authorization endpoint (the second leg of the OAuth 2.0 flow), and
/// exchanges the received authorization code for an access token (the
/// third leg).
async fn callback_handler(
    State(state): State<Arc<WebhookState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    info!(url_path = "/callback", "received HTTP request");

    // First, check for errors reported by the third party, e.g. the
    // user failed or refused to authorize us.
    let provider_error = if params.error_description.is_empty() {
        &params.error
    } else {
        &params.error_description
    };
    if !provider_error.is_empty() {
        warn!(error = %provider_error, "OAuth error");
        return html_response(StatusCode::BAD_REQUEST, &escape_html(provider_error));
    }

    // A missing state parameter means the flow was not initiated by
    // us, so there is nothing to do with the results.
    if params.state.is_empty() {
        warn!("forbidden: missing OAuth state parameter");
        if let Some(fallback) = &state.fallback_url {
            debug!(url = %fallback, "redirected HTTP request");
            return redirect(fallback);
        }
        return html_response(StatusCode::FORBIDDEN, "Missing OAuth state parameter");
    }

    let Ok((link_id, nonce, memo)) = parse_state_param(&params.state) else {
        warn!(state = %params.state, "bad request: invalid state parameter");
        return html_response(StatusCode::BAD_REQUEST, "Invalid state parameter");
    };
    if !memo.is_empty() {
        debug!(id = %link_id, memo = %memo, "OAuth callback memo");
    }

    let mut config = match fetch_oauth_config(&state, &link_id).await {
        Ok(Some(config)) => config,
        Ok(None) => {
            warn!(id = %link_id, "bad request: link not found");
            return html_response(StatusCode::BAD_REQUEST, "Link not found");
        }
        Err(resp) => return resp,
    };

    // The nonce in the state must match the currently-stored one; any
    // successful credential write rotates it, so a mismatch means a
    // replayed or superseded flow.
    if nonce != config.nonce {
        warn!(id = %link_id, "forbidden: OAuth state nonce mismatch");
        return html_response(StatusCode::FORBIDDEN, "Invalid or expired OAuth state");
    }

    // Special case: requests to install GitHub apps by users who are
    // not authorized to approve them can't continue. See:
    // https://docs.github.com/en/apps/using-github-apps/installing-a-github-app-from-a-third-party#requirements-to-install-a-github-app
    if params.setup_action == "request" {
        warn!(id = %link_id, "GitHub app installation requested by user who can't approve it");
        return html_response(
            StatusCode::FORBIDDEN,
            "Installation must be approved by an organization owner",
        );
    }

    // Special case: GitHub apps that use generated JWTs don't require
    // a user or app-installation token (the third leg of the flow).
    if matches!(params.setup_action.as_str(), "install" | "update")
        && !params.installation_id.is_empty()
    {
        debug!(id = %link_id, install_id = %params.installation_id, "successful GitHub app installation");

        let api_url = github::api_base_url(&github::auth_base_url(&config));
        let mut client = match connect(&state).await {
            Ok(client) => client,
            Err(resp) => return resp,
        };
        if let Err(e) =
            client::add_github_creds(&mut client, &link_id, &params.installation_id, &api_url).await
        {
            warn!(error = %e, id = %link_id, "failed to save GitHub installation");
            return html_response(StatusCode::INTERNAL_SERVER_ERROR, "&nbsp;");
        }

        debug!(id = %link_id, "checked and saved the GitHub installation");
        return html_response(StatusCode::OK, "You may now close this browser tab");
    }

    if params.code.is_empty() {
        warn!(id = %link_id, "forbidden: missing OAuth code parameter");
        return html_response(StatusCode::FORBIDDEN, "Missing OAuth code parameter");
    }

    config.redirect_url = state.redirect_url.clone();
    let token = match config.exchange(&params.code).await {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %e, id = %link_id, "OAuth code exchange error");
            return html_response(StatusCode::FORBIDDEN, "OAuth code exchange error");
        }
    };
    debug!(id = %link_id, "successful OAuth token exchange");

    // Check the token, extract metadata about it, and save both.
    let mut client = match connect(&state).await {
        Ok(client) => client,
        Err(resp) => return resp,
    };
    if let Err(e) = client::set_oauth_creds(&mut client, &link_id, &token).await {
        warn!(error = %e, id = %link_id, "failed to save OAuth token");
        return html_response(StatusCode::INTERNAL_SERVER_ERROR, "&nbsp;");
    }

    debug!(id = %link_id, "checked and saved OAuth token");
    html_response(StatusCode::OK, "You may now close this browser tab")
}

async fn connect(state: &WebhookState) -> Result<client::ThrippyClient, Response> {
    client::connect(&state.grpc_addr, state.grpc_tls.clone())
        .await
        .map_err(|e| {
            warn!(error = %e, "failed to connect to gRPC server");
            html_response(StatusCode::INTERNAL_SERVER_ERROR, "&nbsp;")
        })
}

/// Fetches a link's OAuth config over gRPC. `Ok(None)` means the link
/// (or its OAuth config) does not exist; `Err` is a ready-to-return
/// 500 page.
async fn fetch_oauth_config(
    state: &WebhookState,
    link_id: &str,
) -> Result<Option<oauth::OAuthConfig>, Response> {
    let mut client = connect(state).await?;
    client::link_oauth_config(&mut client, link_id)
        .await
        .map_err(|e| {
            warn!(error = %e, id = %link_id, "failed to fetch link OAuth config");
            html_response(StatusCode::INTERNAL_SERVER_ERROR, "&nbsp;")
        })
}

fn redirect(url: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response()
}

/// Renders a minimal HTML page with a status-appropriate title. No
/// stack traces or internal details ever reach the user.
fn html_response(status: StatusCode, msg: &str) -> Response {
    let (title, header) = if status.is_success() {
        ("Success".to_string(), "Success!".to_string())
    } else {
        let reason = status.canonical_reason().unwrap_or("Error");
        ("Error".to_string(), format!("{} {}", status.as_u16(), reason))
    };

    let mut msg = msg.to_string();
    if !msg.ends_with('.') {
        msg.push('.');
    }

    let body = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n\t<title>{title}</title>\n</head>\n<body>\n\t<h1>{header}</h1>\n\t<p>{msg}</p>\n</body>\n</html>"
    );

    (
        status,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        body,
    )
        .into_response()
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_params_deserialization() {
        let params: CallbackParams =
            serde_urlencoded::from_str("code=auth_code_123&state=abc_def").unwrap();
        assert_eq!(params.code, "auth_code_123");
        assert_eq!(params.state, "abc_def");
        assert_eq!(params.error, "");

        let params: CallbackParams =
            serde_urlencoded::from_str("error=access_denied&error_description=User+cancelled")
                .unwrap();
        assert_eq!(params.error, "access_denied");
        assert_eq!(params.error_description, "User cancelled");
        assert_eq!(params.code, "");
    }

    #[test]
    fn test_html_response_shapes() {
        let resp = html_response(StatusCode::OK, "You may now close this browser tab");
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = html_response(StatusCode::FORBIDDEN, "Missing OAuth state parameter");
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<script>"x"&'y'</script>"#),
            "&lt;script&gt;&quot;x&quot;&amp;'y'&lt;/script&gt;"
        );
    }
}
