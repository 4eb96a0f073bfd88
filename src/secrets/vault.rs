//! HashiCorp Vault KV v2 provider, over Vault's plain HTTP API.
//!
//! Values are wrapped as `{"value": ...}` under the `secret/` mount.
//! Deletion purges all versions via the metadata endpoint. The data
//! size limit is 0.5 or 1 MiB:
//! https://developer.hashicorp.com/vault/docs/internals/limits

use std::fs;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::SecretStore;
use crate::config::Config;

const MOUNT: &str = "secret";
const TIMEOUT: Duration = Duration::from_secs(3);

pub struct VaultStore {
    client: reqwest::Client,
    address: String,
    token: String,
}

#[derive(Deserialize)]
struct ReadResponse {
    data: ReadData,
}

#[derive(Deserialize)]
struct ReadData {
    data: serde_json::Map<String, serde_json::Value>,
}

impl VaultStore {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(TIMEOUT);

        if let Some(ca_path) = &config.vault_cacert {
            let pem = fs::read(ca_path)
                .with_context(|| format!("failed to read Vault CA cert {ca_path}"))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .with_context(|| format!("failed to parse Vault CA cert {ca_path}"))?;
            builder = builder.add_root_certificate(cert);
        }

        Ok(Self {
            client: builder.build().context("failed to build Vault HTTP client")?,
            address: config.vault_address.trim_end_matches('/').to_string(),
            token: config.vault_token.clone().unwrap_or_default(),
        })
    }

    fn data_url(&self, key: &str) -> String {
        format!("{}/v1/{MOUNT}/data/{key}", self.address)
    }

    fn metadata_url(&self, key: &str) -> String {
        format!("{}/v1/{MOUNT}/metadata/{key}", self.address)
    }
}

#[async_trait]
impl SecretStore for VaultStore {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.data_url(key))
            .header("X-Vault-Token", &self.token)
            .json(&json!({ "data": { "value": value } }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(anyhow!("Vault write failed with status {}", resp.status()));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String> {
        let resp = self
            .client
            .get(self.data_url(key))
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(String::new());
        }
        if !resp.status().is_success() {
            return Err(anyhow!("Vault read failed with status {}", resp.status()));
        }

        let body: ReadResponse = resp.json().await.context("invalid Vault response")?;
        match body.data.data.get("value") {
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            _ => Err(anyhow!("invalid data")),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.metadata_url(key))
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND || resp.status().is_success() {
            return Ok(());
        }
        Err(anyhow!("Vault delete failed with status {}", resp.status()))
    }
}
