//! Per-link record storage.
//!
//! Each link owns four independently stored records under its ID:
//! `template`, `oauth`, `creds`, and `meta`. The `template` record is
//! the existence marker: a link exists if and only if it is non-empty.

use anyhow::Result;

use crate::secrets::SecretsManager;

pub const RECORD_TEMPLATE: &str = "template";
pub const RECORD_OAUTH: &str = "oauth";
pub const RECORD_CREDS: &str = "creds";
pub const RECORD_META: &str = "meta";

/// Thin facade over the secrets manager with the four fixed suffixes.
#[derive(Clone)]
pub struct LinkStore {
    sm: SecretsManager,
}

impl LinkStore {
    pub fn new(sm: SecretsManager) -> Self {
        Self { sm }
    }

    pub async fn read(&self, link_id: &str, record: &str) -> Result<String> {
        self.sm.get(&format!("{link_id}/{record}")).await
    }

    pub async fn write(&self, link_id: &str, record: &str, value: &str) -> Result<()> {
        self.sm.set(&format!("{link_id}/{record}"), value).await
    }

    /// Deletes all four records, in a fixed order. The first failure
    /// stops the sequence and surfaces; any records already deleted
    /// stay deleted (an empty record is indistinguishable from a
    /// missing one, so partial success is invisible).
    pub async fn delete(&self, link_id: &str) -> Result<()> {
        for record in [RECORD_CREDS, RECORD_META, RECORD_OAUTH, RECORD_TEMPLATE] {
            self.sm.delete(&format!("{link_id}/{record}")).await?;
        }
        Ok(())
    }
}
