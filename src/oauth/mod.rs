//! OAuth 2.0 configuration and flows for links.
//!
//! [`OAuthConfig`] carries one OAuth app's endpoints and client
//! credentials, plus runtime extras: `auth_codes` (extra URL parameters
//! sent on both consent and exchange requests), `params`
//! (template-only endpoint overrides, consumed at link creation and
//! never persisted), and the single-use `nonce` that binds a `/start`
//! redirect to one `/callback`.

mod token;

pub use token::{format_expiry, strip_subseconds, OAuthToken};

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::id;

/// Probe the token endpoint's preferred client-authentication style.
pub const AUTH_STYLE_AUTO_DETECT: i64 = 0;
/// Client ID and secret in the POST body.
pub const AUTH_STYLE_IN_PARAMS: i64 = 1;
/// Client ID and secret in the HTTP Basic Authorization header.
pub const AUTH_STYLE_IN_HEADER: i64 = 2;

/// Outbound requests to token endpoints are capped end-to-end.
const TIMEOUT: Duration = Duration::from_secs(3);

fn is_zero(n: &i64) -> bool {
    *n == 0
}

/// The complete OAuth 2.0 configuration of a link.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token_url: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub auth_style: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_secret: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub auth_codes: BTreeMap<String, String>,

    /// Build-time only: injected into endpoint URLs by template
    /// modifiers at link creation, then discarded.
    #[serde(skip)]
    pub params: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nonce: String,

    /// Set by the OAuth webhook server before redirect/exchange,
    /// never persisted.
    #[serde(skip)]
    pub redirect_url: String,
}

/// Token endpoint response, per RFC 6749 §5.1.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl OAuthConfig {
    /// Whether this configuration has any usable field values.
    pub fn is_usable(&self) -> bool {
        !self.auth_url.is_empty()
            || !self.token_url.is_empty()
            || !self.client_id.is_empty()
            || !self.client_secret.is_empty()
    }

    /// Sorts and deduplicates the scopes.
    pub fn normalize_scopes(&mut self) {
        self.scopes.sort();
        self.scopes.dedup();
    }

    /// Replaces the nonce with a fresh random value, invalidating any
    /// in-flight consent redirect that embedded the old one.
    pub fn rotate_nonce(&mut self) {
        self.nonce = id::new_id();
    }

    /// Serializes for storage in the secrets manager. `params` and the
    /// redirect URL are runtime-only and not included.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize OAuth config")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("failed to parse stored OAuth config")
    }

    /// Builds the URL of the provider's consent page, asking for the
    /// configured scopes explicitly.
    ///
    /// `state` is an opaque value that the provider echoes back on the
    /// callback redirect; it carries the link ID, nonce, and memo.
    pub fn auth_code_url(&self, state: &str) -> String {
        let mut query = vec![
            ("response_type".to_string(), "code".to_string()),
            ("client_id".to_string(), self.client_id.clone()),
        ];
        if !self.redirect_url.is_empty() {
            query.push(("redirect_uri".to_string(), self.redirect_url.clone()));
        }
        if !self.scopes.is_empty() {
            query.push(("scope".to_string(), self.scopes.join(" ")));
        }
        query.push(("state".to_string(), state.to_string()));
        for (k, v) in &self.auth_codes {
            query.push((k.clone(), v.clone()));
        }

        let query = query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        format!("{}?{}", self.auth_url, query)
    }

    /// Exchanges a temporary authorization code for an access token
    /// (the third leg of the OAuth 2.0 flow).
    ///
    /// The caller must have validated the callback's `state` parameter
    /// before invoking this.
    pub async fn exchange(&self, code: &str) -> Result<OAuthToken> {
        let mut form: Vec<(String, String)> = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
        ];
        if !self.redirect_url.is_empty() {
            form.push(("redirect_uri".to_string(), self.redirect_url.clone()));
        }
        for (k, v) in &self.auth_codes {
            form.push((k.clone(), v.clone()));
        }

        self.token_request(form).await
    }

    /// Returns a refreshed version of the given token. With
    /// `force`, the access token is blanked first so that the refresh
    /// path is always taken; otherwise a still-valid token is returned
    /// as-is.
    pub async fn refresh_token(&self, token: &OAuthToken, force: bool) -> Result<OAuthToken> {
        let mut token = token.clone();
        if force {
            token.access_token.clear();
        }
        if token.is_valid() {
            return Ok(token);
        }
        if token.refresh_token.is_empty() {
            return Err(anyhow!("OAuth token expired and has no refresh token"));
        }

        let form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), token.refresh_token.clone()),
        ];
        let mut refreshed = self.token_request(form).await?;

        // Providers may omit the refresh token on renewal; keep the old one.
        if refreshed.refresh_token.is_empty() {
            refreshed.refresh_token = token.refresh_token.clone();
        }
        Ok(refreshed)
    }

    /// POSTs the token endpoint with the given form, placing the client
    /// credentials according to the configured auth style.
    async fn token_request(&self, mut form: Vec<(String, String)>) -> Result<OAuthToken> {
        if self.token_url.is_empty() {
            return Err(anyhow!("missing OAuth token URL"));
        }

        let client = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        let mut req = client
            .post(&self.token_url)
            .header("Accept", "application/json");

        // Auto-detect resolves to the header style, which is what the
        // majority of providers accept.
        if self.auth_style == AUTH_STYLE_IN_PARAMS {
            form.push(("client_id".to_string(), self.client_id.clone()));
            form.push(("client_secret".to_string(), self.client_secret.clone()));
        } else {
            req = req.basic_auth(&self.client_id, Some(&self.client_secret));
        }

        let resp = req
            .form(&form)
            .send()
            .await
            .context("failed to send token request")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("token endpoint returned {status}: {body}"));
        }

        let parsed: TokenResponse = resp
            .json()
            .await
            .context("failed to parse token response")?;

        let mut token = OAuthToken {
            access_token: parsed.access_token,
            token_type: parsed.token_type.unwrap_or_default(),
            refresh_token: parsed.refresh_token.unwrap_or_default(),
            ..Default::default()
        };
        if let Some(expires_in) = parsed.expires_in {
            token.set_expiry_from_relative(expires_in);
        }
        Ok(token)
    }
}
