//! Slack templates: static bot tokens, OAuth v2 (commercial and
//! GovSlack), and Socket Mode apps.

use anyhow::{anyhow, Result};
use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::http::{get_json, post_json, Auth};
use super::{encode_metadata, Template, ValidatorContext, ValidatorFuture, OAUTH_CRED_FIELDS};
use crate::oauth::{OAuthConfig, AUTH_STYLE_AUTO_DETECT, AUTH_STYLE_IN_HEADER};

const DEFAULT_BASE_URL: &str = "https://slack.com";
const GOV_BASE_URL: &str = "https://slack-gov.com"; // https://docs.slack.dev/govslack

pub fn bot_token_template() -> Template {
    Template::new(
        "Slack app using a static bot token",
        &[
            "https://docs.slack.dev/authentication/tokens#bot",
            "https://api.slack.com/apps",
        ],
        &["bot_token", "app_token_optional"],
        None,
        Some(bot_token_checker),
    )
}

pub fn oauth_template() -> Template {
    Template::new(
        "Slack app using OAuth v2",
        &[
            "https://docs.slack.dev/authentication/installing-with-oauth",
            "https://api.slack.com/apps",
        ],
        OAUTH_CRED_FIELDS,
        Some(oauth_modifier),
        Some(oauth_checker),
    )
}

pub fn oauth_gov_template() -> Template {
    Template::new(
        "GovSlack app using OAuth v2",
        &[
            "https://docs.slack.dev/authentication/installing-with-oauth",
            "https://docs.slack.dev/govslack",
        ],
        OAUTH_CRED_FIELDS,
        Some(gov_oauth_modifier),
        Some(gov_oauth_checker),
    )
}

pub fn socket_mode_template() -> Template {
    Template::new(
        "Slack app using Socket Mode",
        &[
            "https://docs.slack.dev/apis/events-api/using-socket-mode",
            "https://docs.slack.dev/reference/methods/apps.connections.open",
        ],
        &["bot_token", "app_token"],
        None,
        Some(socket_mode_checker),
    )
}

/// Adjusts an OAuth config for Slack apps:
/// https://docs.slack.dev/authentication/installing-with-oauth
fn modifier_for(o: &mut OAuthConfig, base_url: &str) {
    if o.auth_url.is_empty() {
        o.auth_url = format!("{base_url}/oauth/v2/authorize");
    }
    // https://docs.slack.dev/reference/methods/oauth.v2.access
    if o.token_url.is_empty() {
        o.token_url = format!("{base_url}/api/oauth.v2.access");
    }
    if o.auth_style == AUTH_STYLE_AUTO_DETECT {
        o.auth_style = AUTH_STYLE_IN_HEADER;
    }

    // https://docs.slack.dev/reference/scopes/users.read
    // (required by https://docs.slack.dev/reference/methods/bots.info).
    if !o.scopes.iter().any(|s| s == "users:read") {
        o.scopes.push("users:read".to_string());
    }
}

fn oauth_modifier(o: &mut OAuthConfig) {
    modifier_for(o, DEFAULT_BASE_URL);
}

fn gov_oauth_modifier(o: &mut OAuthConfig) {
    modifier_for(o, GOV_BASE_URL);
}

// https://docs.slack.dev/reference/methods/auth.test
#[derive(Debug, Default, Deserialize)]
struct AuthTestResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    error: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    team: String,
    #[serde(default)]
    user: String,
    #[serde(default)]
    team_id: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    bot_id: String,
    #[serde(default)]
    enterprise_id: String,
    #[serde(default)]
    is_enterprise_install: bool,
}

// https://docs.slack.dev/reference/methods/bots.info
#[derive(Debug, Default, Deserialize)]
struct Bot {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    updated: i64,
    #[serde(default)]
    app_id: String,
}

#[derive(Serialize)]
struct Metadata {
    app_id: String,
    bot_id: String,
    bot_name: String,
    bot_updated: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    enterprise_id: String,
    team_id: String,
    team_name: String,
    url: String,
    user_id: String,
    user_name: String,
}

fn bot_token_checker(ctx: ValidatorContext) -> ValidatorFuture {
    Box::pin(async move {
        let token = ctx.creds.get("bot_token").cloned().unwrap_or_default();
        generic_checker(&token, DEFAULT_BASE_URL).await
    })
}

fn oauth_checker(ctx: ValidatorContext) -> ValidatorFuture {
    Box::pin(async move {
        let token = access_token(&ctx);
        generic_checker(&token, DEFAULT_BASE_URL).await
    })
}

fn gov_oauth_checker(ctx: ValidatorContext) -> ValidatorFuture {
    Box::pin(async move {
        let token = access_token(&ctx);
        generic_checker(&token, GOV_BASE_URL).await
    })
}

/// Validates both halves of a Socket Mode app: the bot token for Web
/// API calls, and the app-level token for opening event connections.
fn socket_mode_checker(ctx: ValidatorContext) -> ValidatorFuture {
    Box::pin(async move {
        let bot_token = ctx.creds.get("bot_token").cloned().unwrap_or_default();
        let metadata = generic_checker(&bot_token, DEFAULT_BASE_URL).await?;

        let app_token = ctx.creds.get("app_token").cloned().unwrap_or_default();
        if app_token.is_empty() {
            return Err(anyhow!("missing app-level token"));
        }
        open_connection(DEFAULT_BASE_URL, &app_token).await?;

        Ok(metadata)
    })
}

fn access_token(ctx: &ValidatorContext) -> String {
    ctx.token
        .as_ref()
        .map(|t| t.access_token.clone())
        .unwrap_or_default()
}

/// Checks a bot token with `auth.test` and `bots.info`, and returns
/// metadata about the Slack workspace and app in JSON format.
async fn generic_checker(bot_token: &str, base_url: &str) -> Result<String> {
    if bot_token.is_empty() {
        return Err(anyhow!("missing bot token"));
    }

    let auth = auth_test(base_url, bot_token)
        .await
        .map_err(|e| anyhow!("auth test error: {e}"))?;
    let bot = bots_info(base_url, bot_token, &auth)
        .await
        .map_err(|e| anyhow!("bot info error: {e}"))?;

    encode_metadata(&Metadata {
        app_id: bot.app_id,
        bot_id: bot.id,
        bot_name: bot.name,
        bot_updated: Utc
            .timestamp_opt(bot.updated, 0)
            .single()
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default(),
        enterprise_id: auth.enterprise_id,
        team_id: auth.team_id,
        team_name: auth.team,
        url: auth.url,
        user_id: auth.user_id,
        user_name: auth.user,
    })
}

/// Checks the caller's authentication and identity. No scopes required:
/// https://docs.slack.dev/reference/methods/auth.test
async fn auth_test(base_url: &str, bot_token: &str) -> Result<AuthTestResponse> {
    let url = format!("{base_url}/api/auth.test");
    let resp: AuthTestResponse = serde_json::from_value(
        post_json(&url, Auth::Bearer(bot_token), &[]).await?,
    )?;
    if !resp.ok {
        return Err(anyhow!("{}", resp.error));
    }
    Ok(resp)
}

/// Gets information about a bot user. Requires the `users:read` scope:
/// https://docs.slack.dev/reference/methods/bots.info
async fn bots_info(base_url: &str, bot_token: &str, auth: &AuthTestResponse) -> Result<Bot> {
    let mut url = format!("{base_url}/api/bots.info?bot={}", auth.bot_id);
    if !auth.team_id.is_empty() {
        url = format!("{url}&team_id={}", auth.team_id);
    }
    if auth.is_enterprise_install {
        url = format!("{url}&enterprise_id={}", auth.enterprise_id);
    }

    #[derive(Default, Deserialize)]
    struct BotsInfoResponse {
        #[serde(default)]
        ok: bool,
        #[serde(default)]
        error: String,
        #[serde(default)]
        bot: Bot,
    }

    let resp: BotsInfoResponse =
        serde_json::from_value(get_json(&url, Auth::Bearer(bot_token), &[]).await?)?;
    if !resp.ok {
        return Err(anyhow!("{}", resp.error));
    }
    if resp.bot.app_id.is_empty() {
        return Err(anyhow!("empty response"));
    }
    Ok(resp.bot)
}

/// Opens (and immediately discards) a Socket Mode WebSocket URL, to
/// prove the app-level token works. Requires `connections:write`:
/// https://docs.slack.dev/reference/methods/apps.connections.open
async fn open_connection(base_url: &str, app_token: &str) -> Result<()> {
    let url = format!("{base_url}/api/apps.connections.open");

    #[derive(Default, Deserialize)]
    struct OpenResponse {
        #[serde(default)]
        ok: bool,
        #[serde(default)]
        error: String,
    }

    let resp: OpenResponse =
        serde_json::from_value(post_json(&url, Auth::Bearer(app_token), &[]).await?)?;
    if !resp.ok {
        return Err(anyhow!("connection open error: {}", resp.error));
    }
    Ok(())
}
