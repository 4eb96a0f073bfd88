//! Claude template: a static Anthropic API key.

use super::http::{get_json, Auth};
use super::{Template, ValidatorContext, ValidatorFuture};

const MODELS_URL: &str = "https://api.anthropic.com/v1/models";

// https://docs.anthropic.com/en/api/versioning
const API_VERSION: &str = "2023-06-01";

pub fn template() -> Template {
    Template::new(
        "Claude using a static API key",
        &[
            "https://docs.anthropic.com/en/api/overview",
            "https://console.anthropic.com/settings/keys",
        ],
        &["api_key_manual"],
        None,
        Some(api_key_checker),
    )
}

fn api_key_checker(ctx: ValidatorContext) -> ValidatorFuture {
    Box::pin(async move {
        let api_key = ctx.creds.get("api_key").cloned().unwrap_or_default();
        get_json(
            MODELS_URL,
            Auth::None,
            &[
                ("x-api-key", api_key.as_str()),
                ("anthropic-version", API_VERSION),
            ],
        )
        .await?;
        Ok(String::new())
    })
}
