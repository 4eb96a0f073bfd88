//! Google templates: user OAuth 2.0 and static GCP service-account keys.

use anyhow::{anyhow, Context, Result};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use super::http::{get_json, Auth};
use super::{encode_metadata, Template, ValidatorContext, ValidatorFuture, OAUTH_CRED_FIELDS};
use crate::oauth::{OAuthConfig, AUTH_STYLE_AUTO_DETECT, AUTH_STYLE_IN_PARAMS};

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const TOKENINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/tokeninfo";

pub fn user_oauth_template() -> Template {
    Template::new(
        "Google APIs using OAuth 2.0 to act on behalf of a user",
        &[
            "https://developers.google.com/workspace/guides/get-started",
            "https://console.cloud.google.com/auth/overview",
        ],
        OAUTH_CRED_FIELDS,
        Some(oauth_modifier),
        Some(user_token_checker),
    )
}

pub fn service_account_template() -> Template {
    Template::new(
        "Google APIs using a static GCP service account key",
        &[
            "https://cloud.google.com/iam/docs/service-account-overview",
            "https://developers.google.com/identity/protocols/oauth2/service-account",
        ],
        &["key"],
        None,
        Some(service_key_checker),
    )
}

/// Adjusts an OAuth config for Google authorizations, to act on behalf
/// of a user. Defaults to offline access so a refresh token is issued.
fn oauth_modifier(o: &mut OAuthConfig) {
    if o.auth_url.is_empty() {
        o.auth_url = AUTH_URL.to_string();
    }
    if o.token_url.is_empty() {
        o.token_url = TOKEN_URL.to_string();
    }
    if o.auth_style == AUTH_STYLE_AUTO_DETECT {
        o.auth_style = AUTH_STYLE_IN_PARAMS;
    }

    // https://developers.google.com/identity/protocols/oauth2/scopes#oauth2
    for scope in [
        "https://www.googleapis.com/auth/userinfo.email",
        "https://www.googleapis.com/auth/userinfo.profile",
        "openid",
    ] {
        if !o.scopes.iter().any(|s| s == scope) {
            o.scopes.push(scope.to_string());
        }
    }

    o.auth_codes
        .entry("access_type".to_string())
        .or_insert_with(|| "offline".to_string());
}

#[derive(Serialize)]
struct OAuthMetadata {
    email: String,
    id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    family_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    given_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    picture: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    scopes: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    verified_email: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    project: String,
}

/// Checks an OAuth token and returns metadata about its owner, based on
/// https://developers.google.com/identity/openid-connect/openid-connect#obtainuserinfo
fn user_token_checker(ctx: ValidatorContext) -> ValidatorFuture {
    Box::pin(async move {
        let access_token = ctx
            .token
            .as_ref()
            .map(|t| t.access_token.clone())
            .unwrap_or_default();

        let user = get_json(USERINFO_URL, Auth::Bearer(&access_token), &[])
            .await
            .map_err(|e| anyhow!("user info: {e}"))?;
        let tokeninfo_url = format!("{TOKENINFO_URL}?access_token={access_token}");
        let token_info = get_json(&tokeninfo_url, Auth::None, &[])
            .await
            .map_err(|e| anyhow!("token info: {e}"))?;

        let s = |v: &serde_json::Value, key: &str| v[key].as_str().unwrap_or_default().to_string();
        encode_metadata(&OAuthMetadata {
            email: s(&user, "email"),
            id: s(&user, "id"),
            family_name: s(&user, "family_name"),
            given_name: s(&user, "given_name"),
            name: s(&user, "name"),
            picture: s(&user, "picture"),
            scopes: s(&token_info, "scope"),
            verified_email: user["verified_email"]
                .as_bool()
                .map(|b| b.to_string())
                .unwrap_or_default(),
            project: String::new(),
        })
    })
}

/// The subset of a GCP service-account key file needed to mint tokens:
/// https://cloud.google.com/iam/docs/keys-create-delete
#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    project_id: String,
    #[serde(default)]
    token_uri: String,
}

#[derive(Serialize)]
struct JwtBearerClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

/// Checks a GCP service-account key by exercising the full JWT-bearer
/// grant: sign an assertion with the key, exchange it for an access
/// token, and fetch the account's user info. Based on:
/// https://developers.google.com/identity/protocols/oauth2/service-account
fn service_key_checker(ctx: ValidatorContext) -> ValidatorFuture {
    Box::pin(async move {
        let raw_key = ctx.creds.get("key").cloned().unwrap_or_default();
        if raw_key.is_empty() {
            return Err(anyhow!("missing service account key"));
        }
        let key: ServiceAccountKey =
            serde_json::from_str(&raw_key).context("invalid service account key")?;

        let token_uri = if key.token_uri.is_empty() {
            TOKEN_URL.to_string()
        } else {
            key.token_uri.clone()
        };

        let now = chrono::Utc::now();
        let claims = JwtBearerClaims {
            iss: key.client_email.clone(),
            scope: "https://www.googleapis.com/auth/userinfo.email".to_string(),
            aud: token_uri.clone(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::minutes(10)).timestamp(),
        };
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("invalid service account private key")?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .context("failed to sign service account assertion")?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(3))
            .build()
            .context("failed to build HTTP client")?;
        let resp = client
            .post(&token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &assertion),
            ])
            .send()
            .await
            .context("failed to send token request")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("service account token exchange: {status}: {body}"));
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }
        let token: TokenResponse = resp.json().await.context("invalid token response")?;

        let user = get_json(USERINFO_URL, Auth::Bearer(&token.access_token), &[])
            .await
            .map_err(|e| anyhow!("user info: {e}"))?;

        let s = |key: &str| user[key].as_str().unwrap_or_default().to_string();
        encode_metadata(&OAuthMetadata {
            email: s("email"),
            id: s("id"),
            family_name: String::new(),
            given_name: String::new(),
            name: String::new(),
            picture: String::new(),
            scopes: String::new(),
            verified_email: String::new(),
            project: key.project_id,
        })
    })
}
