//! ChatGPT template: a static OpenAI API key.

use super::http::{get_json, Auth};
use super::{Template, ValidatorContext, ValidatorFuture};

const MODELS_URL: &str = "https://api.openai.com/v1/models";

pub fn template() -> Template {
    Template::new(
        "ChatGPT using a static API key",
        &[
            "https://platform.openai.com/docs/api-reference/authentication",
            "https://platform.openai.com/api-keys",
        ],
        &["api_key_manual"],
        None,
        Some(api_key_checker),
    )
}

/// A single authenticated GET proves the key works; OpenAI reports no
/// principal metadata worth storing.
fn api_key_checker(ctx: ValidatorContext) -> ValidatorFuture {
    Box::pin(async move {
        let api_key = ctx.creds.get("api_key").cloned().unwrap_or_default();
        get_json(MODELS_URL, Auth::Bearer(&api_key), &[]).await?;
        Ok(String::new())
    })
}
