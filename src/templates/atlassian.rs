//! Atlassian templates: Bitbucket, Jira, and Confluence, each with an
//! OAuth 2.0 (3LO) app variant and a static API-token variant.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use super::http::{get_json, Auth};
use super::{
    encode_metadata, normalize_base_url, Template, ValidatorContext, ValidatorFuture,
    OAUTH_CRED_FIELDS,
};
use crate::oauth::OAuthConfig;

const TOKEN_DOC_LINKS: &[&str] = &[
    "https://support.atlassian.com/atlassian-account/docs/manage-api-tokens-for-your-atlassian-account/",
    "https://id.atlassian.com/manage-profile/security/api-tokens",
];

pub fn bitbucket_oauth_template() -> Template {
    Template::new(
        "Bitbucket app using OAuth 2.0 (3LO)",
        &[
            "https://developer.atlassian.com/cloud/bitbucket/oauth-2/",
            "https://support.atlassian.com/bitbucket-cloud/docs/use-oauth-on-bitbucket-cloud/",
        ],
        OAUTH_CRED_FIELDS,
        Some(bitbucket_oauth_modifier),
        Some(bitbucket_oauth_checker),
    )
}

pub fn bitbucket_api_token_template() -> Template {
    Template::new(
        "Bitbucket with a user's static API token",
        &[
            "https://support.atlassian.com/atlassian-account/docs/manage-api-tokens-for-your-atlassian-account/",
            "https://developer.atlassian.com/cloud/bitbucket/rest/intro/#api-tokens",
        ],
        &["email_manual", "api_token_manual"],
        None,
        Some(bitbucket_api_token_checker),
    )
}

pub fn jira_oauth_template() -> Template {
    Template::new(
        "Jira app using OAuth 2.0 (3LO)",
        &["https://developer.atlassian.com/cloud/jira/platform/oauth-2-3lo-apps/"],
        OAUTH_CRED_FIELDS,
        Some(three_lo_modifier),
        Some(cloud_oauth_checker),
    )
}

pub fn jira_api_token_template() -> Template {
    Template::new(
        "Jira with a user's static API token",
        TOKEN_DOC_LINKS,
        &["base_url_manual", "email_manual", "api_token_manual"],
        None,
        Some(jira_api_token_checker),
    )
}

pub fn confluence_oauth_template() -> Template {
    Template::new(
        "Confluence app using OAuth 2.0 (3LO)",
        &["https://developer.atlassian.com/cloud/confluence/oauth-2-3lo-apps/"],
        OAUTH_CRED_FIELDS,
        Some(three_lo_modifier),
        Some(cloud_oauth_checker),
    )
}

pub fn confluence_api_token_template() -> Template {
    Template::new(
        "Confluence with a user's static API token",
        TOKEN_DOC_LINKS,
        &["base_url_manual", "email_manual", "api_token_manual"],
        None,
        Some(confluence_api_token_checker),
    )
}

/// Adjusts an OAuth config for Bitbucket Cloud OAuth 2.0 (3LO) apps:
/// https://developer.atlassian.com/cloud/bitbucket/oauth-2/
fn bitbucket_oauth_modifier(o: &mut OAuthConfig) {
    if o.auth_url.is_empty() {
        o.auth_url = "https://bitbucket.org/site/oauth2/authorize".to_string();
    }
    if o.token_url.is_empty() {
        o.token_url = "https://bitbucket.org/site/oauth2/access_token".to_string();
    }

    for scope in ["account", "webhook"] {
        if !o.scopes.iter().any(|s| s == scope) {
            o.scopes.push(scope.to_string());
        }
    }
}

/// Adjusts an OAuth config for Jira/Confluence Cloud OAuth 2.0 (3LO)
/// apps, which share Atlassian's central authorization server:
/// https://developer.atlassian.com/cloud/jira/platform/oauth-2-3lo-apps/
fn three_lo_modifier(o: &mut OAuthConfig) {
    if o.auth_url.is_empty() {
        o.auth_url = "https://auth.atlassian.com/authorize".to_string();
    }
    if o.token_url.is_empty() {
        o.token_url = "https://auth.atlassian.com/oauth/token".to_string();
    }

    if !o.scopes.iter().any(|s| s == "offline_access") {
        o.scopes.push("offline_access".to_string());
    }

    o.auth_codes
        .entry("audience".to_string())
        .or_insert_with(|| "api.atlassian.com".to_string());
    o.auth_codes
        .entry("prompt".to_string())
        .or_insert_with(|| "consent".to_string());
}

/// The details of a Confluence or Jira workspace, for the purpose of
/// checking OAuth tokens and making API calls.
#[derive(Debug, Deserialize, Serialize)]
pub struct CloudResource {
    pub id: String,
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Serialize)]
struct OAuthMetadata {
    cloud_id: String,
    name: String,
    url: String,
}

/// Metadata shape shared by the API-token checkers.
#[derive(Serialize)]
struct ApiTokenMetadata {
    account_id: String,
    account_type: String,
    email: String,
    name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    time_zone: String,
}

/// Resolves the single Atlassian Cloud workspace an OAuth token can
/// access. Based on:
/// https://developer.atlassian.com/cloud/jira/platform/oauth-2-3lo-apps/#3--make-calls-to-the-api-using-the-access-token
async fn accessible_resources(access_token: &str) -> Result<CloudResource> {
    let url = "https://api.atlassian.com/oauth/token/accessible-resources";
    let resp = get_json(url, Auth::Bearer(access_token), &[]).await?;
    let mut resources: Vec<CloudResource> = serde_json::from_value(resp)?;

    match resources.len() {
        0 => Err(anyhow!("valid OAuth token with no Atlassian accessible resources")),
        1 => Ok(resources.remove(0)),
        _ => Err(anyhow!("multiple Atlassian accessible resources found")),
    }
}

/// Checks an OAuth token and returns metadata for API calls in the
/// corresponding Atlassian Cloud workspace.
fn cloud_oauth_checker(ctx: ValidatorContext) -> ValidatorFuture {
    Box::pin(async move {
        let token = ctx
            .token
            .as_ref()
            .map(|t| t.access_token.clone())
            .unwrap_or_default();
        let res = accessible_resources(&token)
            .await
            .map_err(|e| anyhow!("failed to get Atlassian Cloud resource: {e}"))?;

        encode_metadata(&OAuthMetadata {
            cloud_id: res.id,
            name: res.name,
            url: res.url,
        })
    })
}

/// Fetches the current user with HTTP Basic `email:api_token`
/// authentication, shared by all the static-token checkers.
async fn current_user(url: &str, email: &str, api_token: &str) -> Result<serde_json::Value> {
    if email.is_empty() {
        return Err(anyhow!("missing email address"));
    }
    if api_token.is_empty() {
        return Err(anyhow!("missing API token"));
    }

    get_json(
        url,
        Auth::Basic {
            user: email,
            password: api_token,
        },
        &[],
    )
    .await
}

fn cred(ctx: &ValidatorContext, key: &str) -> String {
    ctx.creds.get(key).cloned().unwrap_or_default()
}

/// Checks a static API token for Bitbucket Cloud:
/// https://developer.atlassian.com/cloud/bitbucket/rest/api-group-users/#api-user-get
fn bitbucket_api_token_checker(ctx: ValidatorContext) -> ValidatorFuture {
    Box::pin(async move {
        let user = current_user(
            "https://api.bitbucket.org/2.0/user",
            &cred(&ctx, "email"),
            &cred(&ctx, "api_token"),
        )
        .await
        .map_err(|e| anyhow!("failed to get current Bitbucket Cloud user: {e}"))?;

        encode_metadata(&bitbucket_user(&user))
    })
}

/// Checks an OAuth token for Bitbucket Cloud by fetching the
/// authorizing user.
fn bitbucket_oauth_checker(ctx: ValidatorContext) -> ValidatorFuture {
    Box::pin(async move {
        let token = ctx
            .token
            .as_ref()
            .map(|t| t.access_token.clone())
            .unwrap_or_default();
        let user = get_json(
            "https://api.bitbucket.org/2.0/user",
            Auth::Bearer(&token),
            &[],
        )
        .await
        .map_err(|e| anyhow!("failed to get Bitbucket Cloud admin user: {e}"))?;

        encode_metadata(&bitbucket_user(&user))
    })
}

// https://developer.atlassian.com/cloud/bitbucket/rest/api-group-users/#api-user-get
#[derive(Serialize)]
struct BitbucketUser {
    account_id: String,
    #[serde(rename = "type")]
    kind: String,
    created_on: String,
    display_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    nickname: String,
    username: String,
    uuid: String,
}

fn bitbucket_user(v: &serde_json::Value) -> BitbucketUser {
    let s = |key: &str| v[key].as_str().unwrap_or_default().to_string();
    BitbucketUser {
        account_id: s("account_id"),
        kind: s("type"),
        created_on: s("created_on"),
        display_name: s("display_name"),
        nickname: s("nickname"),
        username: s("username"),
        uuid: s("uuid"),
    }
}

/// Checks a static API token for Jira Cloud:
/// https://developer.atlassian.com/cloud/jira/platform/rest/v3/api-group-myself/#api-rest-api-3-myself-get
fn jira_api_token_checker(ctx: ValidatorContext) -> ValidatorFuture {
    Box::pin(async move {
        let base_url = normalize_base_url(&cred(&ctx, "base_url"))?;
        let url = format!("{base_url}/rest/api/3/myself");
        let user = current_user(&url, &cred(&ctx, "email"), &cred(&ctx, "api_token"))
            .await
            .map_err(|e| anyhow!("error in getting current Jira Cloud user: {e}"))?;

        let s = |key: &str| user[key].as_str().unwrap_or_default().to_string();
        encode_metadata(&ApiTokenMetadata {
            account_id: s("accountId"),
            account_type: s("accountType"),
            email: s("emailAddress"),
            name: s("displayName"),
            time_zone: s("timeZone"),
        })
    })
}

/// Checks a static API token for Confluence Cloud:
/// https://developer.atlassian.com/cloud/confluence/rest/v1/api-group-users/#api-wiki-rest-api-user-current-get
fn confluence_api_token_checker(ctx: ValidatorContext) -> ValidatorFuture {
    Box::pin(async move {
        let base_url = normalize_base_url(&cred(&ctx, "base_url"))?;
        let url = format!("{base_url}/wiki/rest/api/user/current");
        let user = current_user(&url, &cred(&ctx, "email"), &cred(&ctx, "api_token"))
            .await
            .map_err(|e| anyhow!("error in getting current Confluence Cloud user: {e}"))?;

        let s = |key: &str| user[key].as_str().unwrap_or_default().to_string();
        encode_metadata(&ApiTokenMetadata {
            account_id: s("accountId"),
            account_type: s("accountType"),
            email: s("email"),
            name: s("publicName"),
            time_zone: s("timeZone"),
        })
    })
}
