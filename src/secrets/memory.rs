//! In-memory storage provider, for development and tests only.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::SecretStore;

/// Process-lifetime map guarded by a reader/writer lock.
///
/// Contents are lost on restart, which is why selecting this provider
/// without `--dev` is a startup error.
#[derive(Default)]
pub struct MemoryStore {
    store: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.store
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String> {
        Ok(self.store.read().await.get(key).cloned().unwrap_or_default())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.write().await.remove(key);
        Ok(())
    }
}
