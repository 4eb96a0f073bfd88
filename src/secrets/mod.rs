//! Pluggable storage for link records and credentials.
//!
//! Providers implement a 3-method key/value contract over opaque
//! strings. An empty value is the sentinel for "absent": `get` never
//! distinguishes between a missing key and an empty one, and `delete`
//! is idempotent. The [`SecretsManager`] wrapper namespaces every key
//! with `thrippy/<namespace>/` so that multiple deployments (dev,
//! staging, prod) can share one backend.
//!
//! Providers:
//! - `in-memory` - process-lifetime map, allowed only with `--dev`
//! - `file` - nested TOML document in the user's data directory
//! - `aws` - AWS SSM Parameter Store (SecureString)
//! - `vault` - HashiCorp Vault KV v2

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::info;

use crate::config::Config;

mod aws;
mod file;
mod memory;
mod vault;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Key/value contract implemented by every storage provider.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Upserts a value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Returns the value, or an empty string if the key is absent.
    async fn get(&self, key: &str) -> Result<String>;

    /// Removes a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Namespacing wrapper around a storage provider.
///
/// All keys are transparently prefixed with `thrippy/<namespace>/`.
#[derive(Clone)]
pub struct SecretsManager {
    provider: Arc<dyn SecretStore>,
    namespace: String,
}

impl SecretsManager {
    pub fn new(provider: Arc<dyn SecretStore>, namespace: &str) -> Self {
        Self {
            provider,
            namespace: namespace.to_string(),
        }
    }

    /// Builds the manager selected by the runtime configuration.
    ///
    /// The in-memory provider is unreliable and insecure for real-world
    /// use, so it is rejected unless the process runs with `--dev`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let provider = config.secrets_provider.as_str();
        if provider == "in-memory" && !config.dev {
            bail!("in-memory secrets provider allowed only with --dev flag");
        }

        info!(provider, "secrets provider selected");
        let provider: Arc<dyn SecretStore> = match provider {
            "in-memory" => Arc::new(MemoryStore::new()),
            "file" => Arc::new(FileStore::at_default_path()?),
            "aws" => Arc::new(aws::AwsStore::new(config).await),
            "vault" => Arc::new(vault::VaultStore::new(config)?),
            other => bail!("unrecognized secrets provider: {other}"),
        };

        Ok(Self::new(provider, &config.secrets_namespace))
    }

    /// A manager backed by the in-memory provider, for unit tests.
    pub fn for_testing() -> Self {
        Self::new(Arc::new(MemoryStore::new()), "test")
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.provider.set(&self.namespaced(key), value).await
    }

    pub async fn get(&self, key: &str) -> Result<String> {
        self.provider.get(&self.namespaced(key)).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.provider.delete(&self.namespaced(key)).await
    }

    fn namespaced(&self, key: &str) -> String {
        format!("thrippy/{}/{}", self.namespace, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_namespaced_keys_are_isolated() {
        let provider = Arc::new(MemoryStore::new());
        let dev = SecretsManager::new(Arc::clone(&provider) as Arc<dyn SecretStore>, "dev");
        let prod = SecretsManager::new(provider as Arc<dyn SecretStore>, "prod");

        dev.set("abc/template", "slack-oauth").await.unwrap();
        assert_eq!(dev.get("abc/template").await.unwrap(), "slack-oauth");
        assert_eq!(prod.get("abc/template").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_get_missing_returns_empty() {
        let sm = SecretsManager::for_testing();
        assert_eq!(sm.get("nope/creds").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let sm = SecretsManager::for_testing();
        sm.set("abc/creds", "v").await.unwrap();
        sm.delete("abc/creds").await.unwrap();
        sm.delete("abc/creds").await.unwrap();
        assert_eq!(sm.get("abc/creds").await.unwrap(), "");
    }
}
