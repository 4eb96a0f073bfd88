//! Authentication templates for well-known third-party services.
//!
//! A template binds three things for one 3P service: the credential
//! fields the CLI should collect, an optional modifier that fills in
//! missing OAuth endpoint details at link creation, and an optional
//! validator that proves a stored credential works by calling the 3P
//! and returning metadata about the principal.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::LazyLock;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use url::Url;

use crate::oauth::{OAuthConfig, OAuthToken};

mod anthropic;
mod atlassian;
mod gemini;
pub mod github;
mod google;
pub(crate) mod http;
mod openai;
mod slack;

/// Standard credential fields for OAuth-based templates, matching the
/// stored token shape.
pub const OAUTH_CRED_FIELDS: &[&str] = &["access_token", "expiry", "refresh_token", "token_type"];

/// A credential field descriptor, as reported to the CLI for UX hints.
#[derive(Clone, Debug, PartialEq)]
pub struct CredField {
    pub name: String,
    /// Must be entered manually by the user.
    pub manual: bool,
    /// May be left empty.
    pub optional: bool,
}

/// Everything a validator may need: the caller-provided credential
/// map, the link's OAuth config, and the provided or synthesized token.
pub struct ValidatorContext {
    pub creds: BTreeMap<String, String>,
    pub oauth: Option<OAuthConfig>,
    pub token: Option<OAuthToken>,
}

pub type ValidatorFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;
type ValidatorFn = fn(ValidatorContext) -> ValidatorFuture;
type ModifierFn = fn(&mut OAuthConfig);

/// The authentication recipe for one well-known third-party service.
pub struct Template {
    description: &'static str,
    doc_links: &'static [&'static str],
    cred_fields: &'static [&'static str],
    modifier: Option<ModifierFn>,
    validator: Option<ValidatorFn>,
}

impl Template {
    const fn new(
        description: &'static str,
        doc_links: &'static [&'static str],
        cred_fields: &'static [&'static str],
        modifier: Option<ModifierFn>,
        validator: Option<ValidatorFn>,
    ) -> Self {
        Self {
            description,
            doc_links,
            cred_fields,
            modifier,
            validator,
        }
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    pub fn doc_links(&self) -> &'static [&'static str] {
        self.doc_links
    }

    /// Projects the declared field names into descriptors: the
    /// `_manual` and `_optional` suffixes (in either order) are
    /// stripped and turned into flags.
    pub fn cred_fields(&self) -> Vec<CredField> {
        self.cred_fields
            .iter()
            .map(|declared| {
                let mut name = *declared;
                let mut manual = false;
                let mut optional = false;
                loop {
                    if let Some(prefix) = name.strip_suffix("_manual") {
                        name = prefix;
                        manual = true;
                    } else if let Some(prefix) = name.strip_suffix("_optional") {
                        name = prefix;
                        optional = true;
                    } else {
                        break;
                    }
                }
                CredField {
                    name: name.to_string(),
                    manual,
                    optional,
                }
            })
            .collect()
    }

    /// Fills in missing OAuth details (endpoint URLs, auth style,
    /// baseline scopes). Idempotent; a no-op for templates without a
    /// modifier. Scope normalization is the caller's job.
    pub fn modify(&self, config: &mut OAuthConfig) {
        if let Some(modifier) = self.modifier {
            modifier(config);
        }
    }

    /// Checks the usability of the provided credentials against the 3P
    /// and returns JSON-serialized metadata about them. Templates
    /// without a validator accept anything and return no metadata.
    pub async fn validate(&self, ctx: ValidatorContext) -> Result<String> {
        match self.validator {
            Some(validator) => validator(ctx).await,
            None => Ok(String::new()),
        }
    }
}

/// All the link templates this service recognizes and supports.
static REGISTRY: LazyLock<BTreeMap<&'static str, Template>> = LazyLock::new(|| {
    BTreeMap::from([
        ("bitbucket-app-oauth", atlassian::bitbucket_oauth_template()),
        ("bitbucket-user-token", atlassian::bitbucket_api_token_template()),
        ("chatgpt", openai::template()),
        ("claude", anthropic::template()),
        ("confluence-app-oauth", atlassian::confluence_oauth_template()),
        ("confluence-user-token", atlassian::confluence_api_token_template()),
        ("gemini", gemini::template()),
        (
            "generic-oauth",
            Template::new("Generic link", &[], &[], None, None),
        ),
        ("github-app-jwt", github::app_jwt_template()),
        ("github-app-user", github::app_user_template()),
        ("github-user-pat", github::user_pat_template()),
        ("github-webhook", github::webhook_template()),
        ("google-service-account", google::service_account_template()),
        ("google-user-oauth", google::user_oauth_template()),
        ("jira-app-oauth", atlassian::jira_oauth_template()),
        ("jira-user-token", atlassian::jira_api_token_template()),
        ("slack-bot-token", slack::bot_token_template()),
        ("slack-oauth", slack::oauth_template()),
        ("slack-oauth-gov", slack::oauth_gov_template()),
        ("slack-socket-mode", slack::socket_mode_template()),
    ])
});

/// Looks up a template by its ID.
pub fn get(id: &str) -> Option<&'static Template> {
    REGISTRY.get(id)
}

/// Applies the template's modifier to the given OAuth configuration
/// and normalizes (sorts and compacts) its scopes.
pub fn modify_oauth_by_template(config: &mut OAuthConfig, template_id: &str) {
    if let Some(template) = get(template_id) {
        template.modify(config);
    }
    config.normalize_scopes();
}

/// Converts the given value into a JSON string for metadata storage.
pub fn encode_metadata<T: Serialize>(v: &T) -> Result<String> {
    serde_json::to_string(v).context("failed to serialize metadata")
}

/// Checks that the given URL is valid and strips
/// everything after the host address.
pub fn normalize_base_url(base_url: &str) -> Result<String> {
    if base_url.is_empty() {
        return Err(anyhow!("missing base URL"));
    }

    let mut u = Url::parse(base_url).context("invalid base URL")?;
    if u.host_str().map_or(true, str::is_empty) {
        return Err(anyhow!("invalid base URL: no host"));
    }

    u.set_path("");
    u.set_query(None);
    u.set_fragment(None);
    Ok(u.to_string().trim_end_matches('/').to_string())
}
