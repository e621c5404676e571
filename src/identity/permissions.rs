//! Client-side permission resolution for dashboard gating.
//!
//! This is a UI convenience, not an authorization boundary: the backend rejects
//! unauthorized requests on its own. Resolution happens once per login or
//! bootstrap; checks afterwards are synchronous lookups.

use std::borrow::Borrow;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::profile::UserProfile;
use crate::storage::{keys, ClientStorage};

/// Opaque permission identifier such as `riders.view`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(String);

impl Permission {
    pub fn new(name: impl Into<String>) -> Self { Self(name.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl Borrow<str> for Permission {
    fn borrow(&self) -> &str { &self.0 }
}

impl From<&str> for Permission {
    fn from(s: &str) -> Self { Self(s.to_string()) }
}

impl From<String> for Permission {
    fn from(s: String) -> Self { Self(s) }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

pub type PermissionSet = HashSet<Permission>;

static KNOWN_PERMISSIONS: Lazy<Vec<Permission>> = Lazy::new(|| {
    [
        "dashboard.view",
        "riders.view", "riders.manage",
        "roadies.view", "roadies.manage", "roadies.verify",
        "requests.view", "requests.manage",
        "wallets.view", "wallets.manage",
        "notifications.view", "notifications.send",
        "reports.view", "reports.export",
        "config.view", "config.manage",
        "admins.manage",
        "messenger.use",
    ]
    .into_iter()
    .map(Permission::from)
    .collect()
});

/// Every permission identifier the dashboard knows about.
pub fn default_known_permissions() -> &'static [Permission] { &KNOWN_PERMISSIONS }

/// What a user without an override list gets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionPolicy {
    /// Grant the full known universe.
    #[default]
    FailOpen,
    /// Grant nothing.
    FailClosed,
}

impl FromStr for PermissionPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_open" | "open" => Ok(PermissionPolicy::FailOpen),
            "fail_closed" | "closed" => Ok(PermissionPolicy::FailClosed),
            other => Err(anyhow!("unknown permission policy {:?}", other)),
        }
    }
}

/// Usernames that bypass every check, compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterAccounts {
    names: HashSet<String>,
}

impl MasterAccounts {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self { names }
    }

    pub fn contains(&self, username: &str) -> bool {
        self.names.contains(&username.trim().to_lowercase())
    }
}

/// Per-user override lists persisted in client storage under `permissions:<user_id>`.
#[derive(Clone)]
pub struct PermissionStore {
    storage: Arc<dyn ClientStorage>,
}

impl PermissionStore {
    pub fn new(storage: Arc<dyn ClientStorage>) -> Self { Self { storage } }

    /// Stored list for `user_id`. An unparsable entry is treated as absent.
    pub fn load(&self, user_id: i64) -> Option<Vec<Permission>> {
        let raw = self.storage.get(&keys::permissions(user_id))?;
        match serde_json::from_str::<Vec<Permission>>(&raw) {
            Ok(list) => Some(list),
            Err(e) => {
                warn!(user_id, error = %e, "ignoring unreadable permission override list");
                None
            }
        }
    }

    pub fn save(&self, user_id: i64, perms: &[Permission]) -> Result<()> {
        self.storage.set(&keys::permissions(user_id), serde_json::to_string(perms)?)
    }

    pub fn remove(&self, user_id: i64) -> Result<()> {
        self.storage.remove(&keys::permissions(user_id))
    }
}

/// Where the resolved grant came from; handy in logs and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionSource {
    Unauthenticated,
    Superuser,
    MasterAccount,
    Override,
    DefaultUniverse,
    FailClosed,
}

#[derive(Debug, Clone)]
enum Grant {
    Nothing,
    Everything,
    Set(PermissionSet),
}

/// Answers permission queries for one session.
#[derive(Debug, Clone)]
pub struct PermissionResolver {
    grant: Grant,
    source: PermissionSource,
}

impl PermissionResolver {
    pub fn unauthenticated() -> Self {
        Self { grant: Grant::Nothing, source: PermissionSource::Unauthenticated }
    }

    pub fn resolve(
        user: &UserProfile,
        overrides: Option<Vec<Permission>>,
        policy: PermissionPolicy,
        known: &[Permission],
        masters: &MasterAccounts,
    ) -> Self {
        if user.is_superuser {
            return Self { grant: Grant::Everything, source: PermissionSource::Superuser };
        }
        if masters.contains(&user.username) {
            return Self { grant: Grant::Everything, source: PermissionSource::MasterAccount };
        }
        match overrides {
            Some(list) if !list.is_empty() => Self {
                grant: Grant::Set(list.into_iter().collect()),
                source: PermissionSource::Override,
            },
            _ => match policy {
                PermissionPolicy::FailOpen => Self {
                    grant: Grant::Set(known.iter().cloned().collect()),
                    source: PermissionSource::DefaultUniverse,
                },
                PermissionPolicy::FailClosed => Self { grant: Grant::Set(PermissionSet::new()), source: PermissionSource::FailClosed },
            },
        }
    }

    pub fn source(&self) -> PermissionSource { self.source }

    pub fn is_bypass(&self) -> bool { matches!(self.grant, Grant::Everything) }

    pub fn has(&self, perm: &str) -> bool {
        match &self.grant {
            Grant::Nothing => false,
            Grant::Everything => true,
            Grant::Set(set) => set.contains(perm),
        }
    }

    /// True if at least one permission is held; an empty query is false.
    pub fn has_any<I, P>(&self, perms: I) -> bool
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        perms.into_iter().any(|p| self.has(p.as_ref()))
    }

    /// True if every permission is held. An empty query is true once authenticated.
    pub fn has_all<I, P>(&self, perms: I) -> bool
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        if matches!(self.grant, Grant::Nothing) { return false; }
        perms.into_iter().all(|p| self.has(p.as_ref()))
    }

    /// Explicitly granted permissions, sorted. Empty for bypass and unauthenticated grants.
    pub fn granted(&self) -> Vec<Permission> {
        let mut out: Vec<Permission> = match &self.grant {
            Grant::Set(set) => set.iter().cloned().collect(),
            _ => Vec::new(),
        };
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn user(name: &str, superuser: bool) -> UserProfile {
        UserProfile { id: 5, username: name.into(), is_superuser: superuser, ..Default::default() }
    }

    fn perms(list: &[&str]) -> Vec<Permission> { list.iter().map(|p| Permission::from(*p)).collect() }

    #[test]
    fn superuser_bypasses_override_list() {
        let r = PermissionResolver::resolve(&user("ada", true), Some(perms(&["A"])), PermissionPolicy::FailClosed, &[], &MasterAccounts::default());
        assert_eq!(r.source(), PermissionSource::Superuser);
        assert!(r.is_bypass());
        assert!(r.has("A"));
        assert!(r.has("anything.else"));
        assert!(r.has_all(["x", "y"]));
    }

    #[test]
    fn master_account_matches_case_insensitively() {
        let masters = MasterAccounts::new(["OpsMaster"]);
        let r = PermissionResolver::resolve(&user("opsmaster", false), Some(Vec::new()), PermissionPolicy::FailClosed, &[], &masters);
        assert_eq!(r.source(), PermissionSource::MasterAccount);
        assert!(r.has("config.manage"));
        assert!(!MasterAccounts::new(["OpsMaster"]).contains("ops"));
    }

    #[test]
    fn override_list_is_used_verbatim() {
        let r = PermissionResolver::resolve(&user("bo", false), Some(perms(&["A", "B"])), PermissionPolicy::FailOpen, default_known_permissions(), &MasterAccounts::default());
        assert_eq!(r.source(), PermissionSource::Override);
        assert!(r.has("A"));
        assert!(!r.has("C"));
        assert!(!r.has("riders.view"));
        assert!(r.has_any(["C", "B"]));
        assert!(!r.has_all(["A", "C"]));
        assert!(!r.has_any(Vec::<&str>::new()));
        assert!(r.has_all(Vec::<&str>::new()));
        assert!(!r.is_bypass());
        assert_eq!(r.granted(), perms(&["A", "B"]));
    }

    #[test]
    fn missing_or_empty_override_fails_open_by_default() {
        for overrides in [None, Some(Vec::new())] {
            let r = PermissionResolver::resolve(&user("bo", false), overrides, PermissionPolicy::FailOpen, default_known_permissions(), &MasterAccounts::default());
            assert_eq!(r.source(), PermissionSource::DefaultUniverse);
            for p in default_known_permissions() {
                assert!(r.has(p.as_str()), "expected {} granted", p);
            }
            assert!(!r.has("not.a.known.permission"));
        }
    }

    #[test]
    fn fail_closed_grants_nothing() {
        let r = PermissionResolver::resolve(&user("bo", false), None, PermissionPolicy::FailClosed, default_known_permissions(), &MasterAccounts::default());
        assert_eq!(r.source(), PermissionSource::FailClosed);
        assert!(!r.has("riders.view"));
        assert!(r.has_all(Vec::<String>::new()));
    }

    #[test]
    fn unauthenticated_denies_everything() {
        let r = PermissionResolver::unauthenticated();
        assert!(!r.has("riders.view"));
        assert!(!r.has_any(["riders.view"]));
        assert!(!r.has_all(Vec::<&str>::new()));
    }

    #[test]
    fn policy_parses_from_env_strings() {
        assert_eq!("fail-closed".parse::<PermissionPolicy>().unwrap(), PermissionPolicy::FailClosed);
        assert_eq!("Fail_Open".parse::<PermissionPolicy>().unwrap(), PermissionPolicy::FailOpen);
        assert!("maybe".parse::<PermissionPolicy>().is_err());
    }

    #[test]
    fn store_round_trip_and_garbage() {
        let storage = Arc::new(MemoryStorage::new());
        let store = PermissionStore::new(storage.clone());
        assert_eq!(store.load(1), None);
        store.save(1, &perms(&["riders.view"])).unwrap();
        assert_eq!(store.load(1), Some(perms(&["riders.view"])));
        storage.set("permissions:2", "oops".into()).unwrap();
        assert_eq!(store.load(2), None);
        store.remove(1).unwrap();
        assert_eq!(store.load(1), None);
    }
}
