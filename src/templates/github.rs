//! GitHub templates: app installations (JWT), app user authorization,
//! personal access tokens, and webhook shared secrets.

use anyhow::{anyhow, Context, Result};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use tracing::debug;
use url::Url;

use super::http::{get_json, Auth};
use super::{encode_metadata, Template, ValidatorContext, ValidatorFuture};
use crate::oauth::{strip_subseconds, OAuthConfig, AUTH_STYLE_AUTO_DETECT, AUTH_STYLE_IN_HEADER};

pub const DEFAULT_BASE_URL: &str = "https://github.com";
const BAD_BASE_URL: &str = "https://bad-base-url";

const MIME_TYPE: &str = "application/vnd.github+json";

pub fn app_jwt_template() -> Template {
    Template::new(
        "GitHub app installation using JWTs based on static credentials",
        &["https://docs.github.com/en/apps/using-github-apps/about-using-github-apps"],
        &[
            // Entered manually by the user.
            "client_id_manual",
            "private_key_manual",
            // Added automatically after the app is installed.
            "api_base_url",
            "install_id",
        ],
        Some(app_install_modifier),
        Some(jwt_checker),
    )
}

pub fn app_user_template() -> Template {
    Template::new(
        "GitHub app authorization to act on behalf of a user",
        &["https://docs.github.com/en/apps/using-github-apps/authorizing-github-apps"],
        &[
            "base_url_optional",
            "access_token",
            "expiry",
            "refresh_token",
            "token_type",
        ],
        Some(app_authz_modifier),
        Some(user_checker),
    )
}

pub fn user_pat_template() -> Template {
    Template::new(
        "GitHub with a user's static Personal Access Token (PAT)",
        &[
            "https://docs.github.com/en/rest/authentication/authenticating-to-the-rest-api",
            "https://docs.github.com/en/authentication/keeping-your-account-and-data-secure/managing-your-personal-access-tokens",
        ],
        &["base_url_optional", "pat"],
        None,
        Some(user_checker),
    )
}

pub fn webhook_template() -> Template {
    Template::new(
        "GitHub webhook with a shared secret",
        &["https://docs.github.com/en/webhooks/using-webhooks/validating-webhook-deliveries"],
        &["webhook_secret_manual"],
        None,
        None,
    )
}

/// Adjusts the given OAuth config for GitHub app
/// authorizations, to act on behalf of a user.
fn app_authz_modifier(o: &mut OAuthConfig) {
    let base_url = auth_base_url(o);

    // https://docs.github.com/en/apps/creating-github-apps/authenticating-with-a-github-app/generating-a-user-access-token-for-a-github-app
    if o.auth_url.is_empty() {
        o.auth_url = format!("{base_url}/login/oauth/authorize");
    }
    if o.token_url.is_empty() {
        o.token_url = format!("{base_url}/login/oauth/access_token");
    }

    // https://docs.github.com/en/apps/oauth-apps/building-oauth-apps/authorizing-oauth-apps#3-use-the-access-token-to-access-the-api
    if o.auth_style == AUTH_STYLE_AUTO_DETECT {
        o.auth_style = AUTH_STYLE_IN_HEADER;
    }
}

/// Adjusts the given OAuth config for GitHub app installations:
/// the "auth URL" becomes the human-facing install page, and the token
/// URL is blanked because there is no code exchange (tokens are minted
/// from JWTs instead).
fn app_install_modifier(o: &mut OAuthConfig) {
    let base_url = auth_base_url(o);

    let apps_dir = if base_url == DEFAULT_BASE_URL {
        "apps"
    } else {
        "github-apps" // GitHub Enterprise Server (GHES).
    };

    let app_name = match o.params.get("app_name") {
        Some(name) if !name.is_empty() => name.as_str(),
        _ => "unknown-app-name",
    };

    // https://docs.github.com/en/apps/using-github-apps/installing-a-github-app-from-a-third-party#installing-a-github-app
    if o.auth_url.is_empty() {
        o.auth_url = format!("{base_url}/{apps_dir}/{app_name}/installations/new");
    }

    o.token_url = String::new();

    if o.auth_style == AUTH_STYLE_AUTO_DETECT {
        o.auth_style = AUTH_STYLE_IN_HEADER;
    }
}

/// Returns the base URL for GitHub: either [`DEFAULT_BASE_URL`] or a
/// link-specific URL for GitHub Enterprise Server (GHES).
pub fn auth_base_url(o: &OAuthConfig) -> String {
    let base_url = match o.params.get("base_url") {
        Some(url) => url.clone(),        // Link creation.
        None => o.auth_url.clone(),      // Anytime afterwards.
    };

    if base_url.is_empty() {
        return DEFAULT_BASE_URL.to_string();
    }

    // Custom GHES base URL: normalize the scheme and strip the rest.
    let base_url = if let Some(rest) = base_url.strip_prefix("http://") {
        format!("https://{rest}")
    } else if base_url.starts_with("https://") {
        base_url
    } else {
        format!("https://{base_url}")
    };

    let Ok(mut u) = Url::parse(&base_url) else {
        return BAD_BASE_URL.to_string();
    };
    if u.host_str().map_or(true, str::is_empty) {
        return BAD_BASE_URL.to_string();
    }
    u.set_path("");
    u.set_query(None);
    u.set_fragment(None);

    u.to_string().trim_end_matches('/').to_string()
}

/// Transforms a GitHub base URL into the matching API endpoint URL:
/// https://docs.github.com/en/enterprise-server/apps/sharing-github-apps/making-your-github-app-available-for-github-enterprise-server#the-app-code-must-use-the-correct-urls
pub fn api_base_url(base_url: &str) -> String {
    if base_url == DEFAULT_BASE_URL {
        "https://api.github.com".to_string()
    } else {
        format!("{base_url}/api/v3")
    }
}

#[derive(Serialize)]
struct Claims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// Generates a short-lived RS256 JWT for a GitHub app. Based on:
/// https://docs.github.com/en/apps/creating-github-apps/authenticating-with-a-github-app/generating-a-json-web-token-jwt-for-a-github-app
fn generate_jwt(client_id: &str, private_key: &str) -> Result<String> {
    if client_id.is_empty() {
        return Err(anyhow!("missing credential: client_id"));
    }
    if private_key.is_empty() {
        return Err(anyhow!("missing credential: private_key"));
    }

    let private_key = private_key.replace("\\n", "\n");
    let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
        .context("failed to parse PEM private key")?;

    let now = chrono::Utc::now();
    let claims = Claims {
        iat: now.timestamp(),
        exp: (now + chrono::Duration::minutes(10)).timestamp(),
        iss: client_id.to_string(),
    };

    encode(&Header::new(Algorithm::RS256), &claims, &key).context("failed to sign JWT")
}

#[derive(Default, Serialize)]
struct AppMetadata {
    // Before installation.
    app_name: String,
    app_slug: String,
    app_owner_login: String,
    app_owner_type: String,
    app_updated_at: String,

    // After installation.
    #[serde(skip_serializing_if = "String::is_empty")]
    install_events: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    install_permissions: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    install_target_login: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    install_target_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    install_updated_at: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    install_url: String,
}

/// Generates and checks a JWT based on the given static credentials for
/// a GitHub app, and returns metadata about the app and (if an install
/// ID is already known) its installation.
fn jwt_checker(ctx: ValidatorContext) -> ValidatorFuture {
    Box::pin(async move {
        let client_id = ctx.creds.get("client_id").cloned().unwrap_or_default();
        let private_key = ctx.creds.get("private_key").cloned().unwrap_or_default();
        let jwt = generate_jwt(&client_id, &private_key)?;

        // https://docs.github.com/en/rest/apps/apps#get-the-authenticated-app
        let app_url = format!(
            "{}/app",
            api_base_url(&auth_base_url(&ctx.oauth.clone().unwrap_or_default()))
        );
        let resp = get_json(&app_url, Auth::Bearer(&jwt), &[("Accept", MIME_TYPE)])
            .await
            .map_err(|e| anyhow!("app details: {e}"))?;

        let mut meta = AppMetadata {
            app_name: str_field(&resp, "name"),
            app_slug: str_field(&resp, "slug"),
            app_owner_login: str_field(&resp["owner"], "login"),
            app_owner_type: str_field(&resp["owner"], "type").to_lowercase(),
            app_updated_at: strip_subseconds(&str_field(&resp, "updated_at")),
            ..Default::default()
        };

        // The credentials above are entered manually by the user, but
        // the install ID arrives later via the OAuth callback.
        let install_id = ctx.creds.get("install_id").cloned().unwrap_or_default();
        if install_id.is_empty() {
            return encode_metadata(&meta);
        }

        // https://docs.github.com/en/rest/apps/apps#get-an-installation-for-the-authenticated-app
        let install_url = format!("{app_url}/installations/{install_id}");
        let resp = get_json(&install_url, Auth::Bearer(&jwt), &[("Accept", MIME_TYPE)])
            .await
            .map_err(|e| anyhow!("app installation details: {e}"))?;

        meta.install_events = compact_json(&resp["events"]);
        meta.install_permissions = compact_json(&resp["permissions"]);
        meta.install_target_login = str_field(&resp["account"], "login");
        meta.install_target_type = str_field(&resp["account"], "type").to_lowercase();
        meta.install_updated_at = strip_subseconds(&str_field(&resp, "updated_at"));
        meta.install_url = str_field(&resp, "html_url");

        debug!(slug = %meta.app_slug, "checked GitHub app installation");
        encode_metadata(&meta)
    })
}

#[derive(Serialize)]
struct UserMetadata {
    #[serde(skip_serializing_if = "String::is_empty")]
    company: String,
    email: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    location: String,
    login: String,
    name: String,
    url: String,
    user_id: String,
}

/// Checks the given OAuth token or static Personal Access Token (PAT)
/// against https://docs.github.com/en/rest/users/users#get-the-authenticated-user
fn user_checker(ctx: ValidatorContext) -> ValidatorFuture {
    Box::pin(async move {
        let mut oauth = ctx.oauth.clone().unwrap_or_default();
        if oauth.auth_url.is_empty() {
            if let Some(base_url) = ctx.creds.get("base_url") {
                oauth.auth_url = base_url.clone();
            }
        }

        let url = format!("{}/user", api_base_url(&auth_base_url(&oauth)));
        let token = match ctx.creds.get("pat") {
            Some(pat) => pat.clone(),
            None => ctx
                .token
                .as_ref()
                .map(|t| t.access_token.clone())
                .unwrap_or_default(),
        };

        let resp = get_json(&url, Auth::Bearer(&token), &[("Accept", MIME_TYPE)])
            .await
            .map_err(|e| anyhow!("user details: {e}"))?;

        let user_id = resp["id"].as_i64().unwrap_or_default().to_string();
        encode_metadata(&UserMetadata {
            company: str_field(&resp, "company"),
            email: str_field(&resp, "email"),
            location: str_field(&resp, "location"),
            login: str_field(&resp, "login"),
            name: str_field(&resp, "name"),
            url: str_field(&resp, "html_url"),
            user_id,
        })
    })
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v[key].as_str().unwrap_or_default().to_string()
}

/// Renders a JSON subtree as a single compact line for metadata.
fn compact_json(v: &serde_json::Value) -> String {
    if v.is_null() {
        return String::new();
    }
    serde_json::to_string(v).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_base_url_param(url: &str) -> OAuthConfig {
        let mut o = OAuthConfig::default();
        o.params.insert("base_url".into(), url.into());
        o
    }

    #[test]
    fn test_auth_base_url_default() {
        assert_eq!(auth_base_url(&OAuthConfig::default()), DEFAULT_BASE_URL);
    }

    #[test]
    fn test_auth_base_url_param_without_scheme() {
        let o = config_with_base_url_param("foo.bar");
        assert_eq!(auth_base_url(&o), "https://foo.bar");
    }

    #[test]
    fn test_auth_base_url_param_with_http_scheme() {
        let o = config_with_base_url_param("http://foo.bar");
        assert_eq!(auth_base_url(&o), "https://foo.bar");
    }

    #[test]
    fn test_auth_base_url_param_with_path() {
        let o = config_with_base_url_param("https://foo.bar/baz/qux");
        assert_eq!(auth_base_url(&o), "https://foo.bar");
    }

    #[test]
    fn test_auth_base_url_from_auth_url() {
        let o = OAuthConfig {
            auth_url: "https://ghes.corp.example".into(),
            ..Default::default()
        };
        assert_eq!(auth_base_url(&o), "https://ghes.corp.example");
    }

    #[test]
    fn test_api_base_url() {
        assert_eq!(api_base_url(DEFAULT_BASE_URL), "https://api.github.com");
        assert_eq!(api_base_url("https://ghes"), "https://ghes/api/v3");
    }

    #[test]
    fn test_app_authz_modifier_fills_defaults() {
        let mut o = OAuthConfig::default();
        app_authz_modifier(&mut o);
        assert_eq!(o.auth_url, "https://github.com/login/oauth/authorize");
        assert_eq!(o.token_url, "https://github.com/login/oauth/access_token");
        assert_eq!(o.auth_style, AUTH_STYLE_IN_HEADER);
    }

    #[test]
    fn test_app_authz_modifier_keeps_explicit_urls() {
        let mut o = OAuthConfig {
            auth_url: "https://ghes/login/oauth/authorize".into(),
            token_url: "https://ghes/login/oauth/access_token".into(),
            ..Default::default()
        };
        app_authz_modifier(&mut o);
        assert_eq!(o.auth_url, "https://ghes/login/oauth/authorize");
        assert_eq!(o.token_url, "https://ghes/login/oauth/access_token");
    }

    #[test]
    fn test_app_install_modifier_builds_install_url() {
        let mut o = OAuthConfig::default();
        o.params.insert("app_name".into(), "my-app".into());
        app_install_modifier(&mut o);
        assert_eq!(o.auth_url, "https://github.com/apps/my-app/installations/new");
        assert_eq!(o.token_url, "");
    }

    #[test]
    fn test_app_install_modifier_ghes_uses_github_apps_dir() {
        let mut o = OAuthConfig::default();
        o.params.insert("base_url".into(), "ghes.corp".into());
        o.params.insert("app_name".into(), "my-app".into());
        app_install_modifier(&mut o);
        assert_eq!(
            o.auth_url,
            "https://ghes.corp/github-apps/my-app/installations/new"
        );
    }

    #[test]
    fn test_generate_jwt_requires_credentials() {
        assert!(generate_jwt("", "key").is_err());
        assert!(generate_jwt("Iv1.abc", "").is_err());
        assert!(generate_jwt("Iv1.abc", "not a PEM key").is_err());
    }
}
