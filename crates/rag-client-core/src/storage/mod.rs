//! Key-value storage abstraction for persisted client state.
//!
//! The [`KeyValueStorage`] trait is the durable, process-local equivalent of
//! a browser's local storage: string keys, string values, synchronous
//! reads and writes. Session persistence is layered on top of it so the
//! backing medium (memory, a JSON file, a platform keychain) is pluggable.
//!
//! Implementations must be `Send + Sync`; they are shared behind `Arc`
//! between the HTTP gateway and the auth manager.

pub mod memory;

use anyhow::Result;

/// Key under which the bearer token is stored.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Key under which the serialized [`UserProfile`](crate::models::UserProfile) is stored.
pub const USER_KEY: &str = "user";

/// A single write in a [`KeyValueStorage::apply`] batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    Set { key: String, value: String },
    Remove { key: String },
}

impl StorageOp {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        Self::Remove { key: key.into() }
    }
}

/// Durable string key-value storage.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](KeyValueStorage::get) | Read a value |
/// | [`set`](KeyValueStorage::set) | Write a value |
/// | [`remove`](KeyValueStorage::remove) | Delete a value (no-op if absent) |
/// | [`apply`](KeyValueStorage::apply) | Apply several writes as one unit |
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// Apply a batch of writes.
    ///
    /// The default applies them one by one. Backends that can commit a
    /// batch atomically should override this so readers never observe a
    /// half-applied batch.
    fn apply(&self, ops: &[StorageOp]) -> Result<()> {
        for op in ops {
            match op {
                StorageOp::Set { key, value } => self.set(key, value)?,
                StorageOp::Remove { key } => self.remove(key)?,
            }
        }
        Ok(())
    }
}
