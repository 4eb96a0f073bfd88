//! File-backed storage provider.
//!
//! All secrets live in a single nested TOML document, with one level
//! per key segment: `thrippy.<namespace>.<link-id>.<field> = "value"`.
//! Every read parses the whole document and every write atomically
//! replaces it, with owner-only (0600) permissions.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use directories::ProjectDirs;
use tokio::sync::RwLock;

use super::SecretStore;

const DATA_FILE_NAME: &str = "secrets.toml";

/// Number of `/`-separated segments in a fully-qualified key.
const KEY_DEPTH: usize = 4;

pub struct FileStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FileStore {
    /// Opens (or creates) the secrets file in the user's data directory.
    pub fn at_default_path() -> Result<Self> {
        let dirs = ProjectDirs::from("", "", "thrippy")
            .context("failed to determine the user's data directory")?;
        let dir = dirs.data_dir();
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;
        Self::at_path(dir.join(DATA_FILE_NAME))
    }

    pub fn at_path(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            write_with_restricted_perms(&path, "")?;
        }
        Ok(Self {
            path,
            lock: RwLock::new(()),
        })
    }

    fn read_document(&self) -> Result<BTreeMap<String, String>> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let table: toml::Table = contents
            .parse()
            .with_context(|| format!("failed to parse {}", self.path.display()))?;

        let mut flat = BTreeMap::new();
        flatten(&table, &mut Vec::new(), &mut flat);
        Ok(flat)
    }

    fn write_document(&self, flat: &BTreeMap<String, String>) -> Result<()> {
        let mut root = toml::Table::new();
        for (key, value) in flat {
            let segments: Vec<&str> = key.split('/').collect();
            if segments.len() != KEY_DEPTH {
                continue;
            }

            let mut table = &mut root;
            for segment in &segments[..KEY_DEPTH - 1] {
                table = table
                    .entry(segment.to_string())
                    .or_insert_with(|| toml::Value::Table(toml::Table::new()))
                    .as_table_mut()
                    .context("key segment collides with a stored value")?;
            }
            table.insert(
                segments[KEY_DEPTH - 1].to_string(),
                toml::Value::String(value.clone()),
            );
        }

        let serialized = toml::to_string(&root).context("failed to serialize secrets")?;
        write_with_restricted_perms(&self.path, &serialized)
    }
}

/// Collects `a/b/c/d = value` pairs from a nested TOML document,
/// ignoring entries that are not nested exactly [`KEY_DEPTH`] deep.
fn flatten(table: &toml::Table, prefix: &mut Vec<String>, out: &mut BTreeMap<String, String>) {
    for (key, value) in table {
        prefix.push(key.clone());
        match value {
            toml::Value::Table(inner) => flatten(inner, prefix, out),
            toml::Value::String(s) if prefix.len() == KEY_DEPTH => {
                out.insert(prefix.join("/"), s.clone());
            }
            _ => {}
        }
        prefix.pop();
    }
}

/// Writes the file atomically (temp file + rename) with 0600 permissions.
fn write_with_restricted_perms(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, contents).with_context(|| format!("failed to write {}", tmp.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))
            .context("failed to restrict secrets file permissions")?;
    }

    fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))
}

#[async_trait]
impl SecretStore for FileStore {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.write().await;
        let mut flat = self.read_document()?;
        flat.insert(key.to_string(), value.to_string());
        self.write_document(&flat)
    }

    async fn get(&self, key: &str) -> Result<String> {
        let _guard = self.lock.read().await;
        let flat = self.read_document()?;
        Ok(flat.get(key).cloned().unwrap_or_default())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.lock.write().await;
        let mut flat = self.read_document()?;
        flat.remove(key);
        self.write_document(&flat)
    }
}
