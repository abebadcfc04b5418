//! On-disk [`KeyValueStorage`] backed by a single JSON file.
//!
//! The file holds a flat JSON object of string keys to string values:
//!
//! ```json
//! { "access_token": "eyJhbGciOi...", "user": "{\"id\":\"u1\",...}" }
//! ```
//!
//! Every read goes to disk, so a change made by another `rag` process is
//! visible immediately. Every write rewrites the whole file through a
//! sibling temp file and a rename, which makes [`KeyValueStorage::apply`]
//! atomic: a reader sees either the old pair or the new pair.
//!
//! An unreadable or malformed file is treated as empty (with a warning) so
//! that clearing the session always succeeds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};

pub use rag_client_core::storage::memory::MemoryStorage;
pub use rag_client_core::storage::{KeyValueStorage, StorageOp};

type Entries = BTreeMap<String, String>;

pub struct FileStorage {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<Entries> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read session file: {}", self.path.display())
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(Entries::new());
        }

        match serde_json::from_str::<Entries>(&content) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "session file is malformed; treating as empty"
                );
                Ok(Entries::new())
            }
        }
    }

    fn write_entries(&self, entries: &Entries) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(entries)?;
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_entries()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.apply(&[StorageOp::set(key, value)])
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.apply(&[StorageOp::remove(key)])
    }

    fn apply(&self, ops: &[StorageOp]) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("session file lock poisoned"))?;

        let mut entries = self.read_entries()?;
        let mut changed = false;
        for op in ops {
            match op {
                StorageOp::Set { key, value } => {
                    changed |= entries.insert(key.clone(), value.clone()).as_ref() != Some(value);
                }
                StorageOp::Remove { key } => {
                    changed |= entries.remove(key).is_some();
                }
            }
        }

        if !changed && self.path.exists() {
            return Ok(());
        }
        self.write_entries(&entries)
    }
}
