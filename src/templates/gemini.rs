//! Gemini template: a static Google AI Studio API key. Storage only,
//! no validation endpoint.

use super::Template;

pub fn template() -> Template {
    Template::new(
        "Gemini using a static API key",
        &[
            "https://ai.google.dev/gemini-api/docs/api-key",
            "https://aistudio.google.com/app/apikey",
        ],
        &["api_key_manual"],
        None,
        None,
    )
}
