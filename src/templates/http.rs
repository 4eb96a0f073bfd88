//! Shared outbound HTTP helper for credential validators.
//!
//! All validator traffic goes through here: a 3-second end-to-end
//! timeout, a 10 MiB response cap, and JSON parsing. Error messages
//! include the 3P's status and body because they are reported back to
//! the caller, who is usually the one able to fix the credential.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Method;

const TIMEOUT: Duration = Duration::from_secs(3);
const MAX_RESPONSE_BYTES: usize = 10 << 20;

/// How to authenticate an outbound request.
pub enum Auth<'a> {
    None,
    Bearer(&'a str),
    Basic { user: &'a str, password: &'a str },
}

pub async fn get_json(
    url: &str,
    auth: Auth<'_>,
    headers: &[(&str, &str)],
) -> Result<serde_json::Value> {
    request_json(Method::GET, url, auth, headers).await
}

pub async fn post_json(
    url: &str,
    auth: Auth<'_>,
    headers: &[(&str, &str)],
) -> Result<serde_json::Value> {
    request_json(Method::POST, url, auth, headers).await
}

async fn request_json(
    method: Method,
    url: &str,
    auth: Auth<'_>,
    headers: &[(&str, &str)],
) -> Result<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;

    let mut req = client
        .request(method, url)
        .header("Accept", "application/json");
    req = match auth {
        Auth::None => req,
        Auth::Bearer(token) => req.bearer_auth(token),
        Auth::Basic { user, password } => req.basic_auth(user, Some(password)),
    };
    for (name, value) in headers {
        req = req.header(*name, *value);
    }

    let resp = req.send().await.context("failed to send HTTP request")?;
    let status = resp.status();
    let mut body = resp
        .bytes()
        .await
        .context("failed to read HTTP response body")?;
    body.truncate(MAX_RESPONSE_BYTES);

    if status.as_u16() >= 400 {
        let text = String::from_utf8_lossy(&body);
        return Err(anyhow!("{status}: {text}"));
    }

    serde_json::from_slice(&body).context("failed to parse HTTP response as JSON")
}
