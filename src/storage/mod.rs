//!
//! roadside_admin client storage
//! -----------------------------
//! Client-local key/value persistence: the place bearer tokens, the cached user
//! profile and per-user permission override lists live between runs. It is a
//! best-effort cache of server-owned truth, so every consumer tolerates a missing
//! or unreadable entry.
//!
//! Two backends implement [`ClientStorage`]: [`MemoryStorage`] for tests and
//! ephemeral sessions, and [`FileStorage`], a JSON snapshot on disk.

use anyhow::Result;

pub mod kv;

pub use kv::{FileStorage, MemoryStorage};

/// Storage keys shared by the session, token and permission layers.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const USER_PROFILE: &str = "user";
    pub const PERMISSIONS_PREFIX: &str = "permissions:";

    pub fn permissions(user_id: i64) -> String { format!("{}{}", PERMISSIONS_PREFIX, user_id) }
}

pub trait ClientStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn keys(&self) -> Vec<String>;

    /// Remove several keys. Every key is attempted; the first failure is returned.
    fn remove_all(&self, keys: &[&str]) -> Result<()> {
        let mut first_err = None;
        for k in keys {
            if let Err(e) = self.remove(k) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod storage_tests;
