//! Runtime configuration for the admin session core.
//!
//! Settings load from an optional JSON file (`ROADSIDE_CONFIG`) and are then
//! overridden field by field from `ROADSIDE_*` environment variables. Idle
//! timings, the master-account allow-list and the permission fallback policy are
//! all configuration; none of them are compiled in.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::identity::{default_known_permissions, PermissionPolicy};

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct AdminConfig {
    /// Base URL of the REST backend, e.g. `https://api.example.com`.
    #[serde(default = "AdminConfig::default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub endpoints: Endpoints,
    /// File used as client-local storage. Memory-only when unset.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
    /// Login entry point used for redirects after a logout.
    #[serde(default = "AdminConfig::default_login_redirect")]
    pub login_redirect: String,
    #[serde(default = "AdminConfig::default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Seconds before the idle timeout at which the warning is raised.
    #[serde(default = "AdminConfig::default_idle_warning_secs")]
    pub idle_warning_secs: u64,
    #[serde(default = "AdminConfig::default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    /// Usernames that bypass permission checks (matched case-insensitively).
    #[serde(default)]
    pub master_accounts: Vec<String>,
    #[serde(default)]
    pub permission_policy: PermissionPolicy,
    #[serde(default = "AdminConfig::default_known_permissions")]
    pub known_permissions: Vec<String>,
    /// Error codes in a 401 body that mean "this session was evicted", not "token expired".
    #[serde(default = "AdminConfig::default_invalidation_codes")]
    pub invalidation_codes: Vec<String>,
    #[serde(default = "AdminConfig::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Endpoints {
    #[serde(default = "Endpoints::default_login")]
    pub login: String,
    #[serde(default = "Endpoints::default_refresh")]
    pub refresh: String,
    #[serde(default = "Endpoints::default_profile")]
    pub profile: String,
    #[serde(default = "Endpoints::default_logout")]
    pub logout: String,
    /// Path template; `{user_id}` is substituted.
    #[serde(default = "Endpoints::default_permissions")]
    pub permissions: String,
}

impl Endpoints {
    fn default_login() -> String { "/api/token/".to_string() }
    fn default_refresh() -> String { "/api/token/refresh/".to_string() }
    fn default_profile() -> String { "/api/users/me/".to_string() }
    fn default_logout() -> String { "/api/logout/".to_string() }
    fn default_permissions() -> String { "/api/admin-permissions/{user_id}/".to_string() }

    pub fn permissions_for(&self, user_id: i64) -> String {
        self.permissions.replace("{user_id}", &user_id.to_string())
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: Self::default_login(),
            refresh: Self::default_refresh(),
            profile: Self::default_profile(),
            logout: Self::default_logout(),
            permissions: Self::default_permissions(),
        }
    }
}

impl AdminConfig {
    fn default_api_base() -> String { "http://127.0.0.1:8000".to_string() }
    fn default_login_redirect() -> String { "/login".to_string() }
    fn default_idle_timeout_secs() -> u64 { 15 * 60 }
    fn default_idle_warning_secs() -> u64 { 60 }
    fn default_idle_poll_ms() -> u64 { 1_000 }
    fn default_known_permissions() -> Vec<String> { default_known_permissions().iter().map(|p| p.to_string()).collect() }
    fn default_invalidation_codes() -> Vec<String> { vec!["session_invalidated".to_string(), "concurrent_login".to_string()] }
    fn default_request_timeout_secs() -> u64 { 15 }

    /// Read settings from a JSON file; missing fields take their defaults.
    pub fn load_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading config {}", path.display()))?;
        let cfg: AdminConfig = serde_json::from_slice(&bytes).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    /// File named by `ROADSIDE_CONFIG` (if any), then environment overrides, then validation.
    pub fn from_env() -> Result<Self> {
        let mut cfg = match std::env::var("ROADSIDE_CONFIG").ok() {
            Some(p) if !p.trim().is_empty() => Self::load_file(Path::new(p.trim()))?,
            _ => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `ROADSIDE_*` overrides from an arbitrary lookup (the process env in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse_u64(key: &str, raw: String) -> Result<u64> {
            raw.trim().parse::<u64>().map_err(|e| anyhow!("{}={:?} is not a number: {}", key, raw, e))
        }

        if let Some(v) = lookup("ROADSIDE_API_BASE") {
            self.api_base = v.trim().to_string();
        }
        if let Some(v) = lookup("ROADSIDE_STORAGE_PATH") {
            let v = v.trim();
            self.storage_path = if v.is_empty() { None } else { Some(PathBuf::from(v)) };
        }
        if let Some(v) = lookup("ROADSIDE_LOGIN_REDIRECT") {
            self.login_redirect = v.trim().to_string();
        }
        if let Some(v) = lookup("ROADSIDE_IDLE_TIMEOUT_SECS") {
            self.idle_timeout_secs = parse_u64("ROADSIDE_IDLE_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("ROADSIDE_IDLE_WARNING_SECS") {
            self.idle_warning_secs = parse_u64("ROADSIDE_IDLE_WARNING_SECS", v)?;
        }
        if let Some(v) = lookup("ROADSIDE_IDLE_POLL_MS") {
            self.idle_poll_ms = parse_u64("ROADSIDE_IDLE_POLL_MS", v)?;
        }
        if let Some(v) = lookup("ROADSIDE_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_u64("ROADSIDE_REQUEST_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("ROADSIDE_MASTER_ACCOUNTS") {
            self.master_accounts = v.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).map(|s| s.to_string()).collect();
        }
        if let Some(v) = lookup("ROADSIDE_PERMISSION_POLICY") {
            self.permission_policy = v.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.api_base).with_context(|| format!("invalid api_base {:?}", self.api_base))?;
        if self.idle_timeout_secs == 0 { return Err(anyhow!("idle_timeout_secs must be positive")); }
        if self.idle_poll_ms == 0 { return Err(anyhow!("idle_poll_ms must be positive")); }
        if self.idle_warning_secs >= self.idle_timeout_secs {
            return Err(anyhow!(
                "idle_warning_secs ({}) must be shorter than idle_timeout_secs ({})",
                self.idle_warning_secs, self.idle_timeout_secs
            ));
        }
        if self.request_timeout_secs == 0 { return Err(anyhow!("request_timeout_secs must be positive")); }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration { Duration::from_secs(self.idle_timeout_secs) }
    pub fn idle_warning_lead(&self) -> Duration { Duration::from_secs(self.idle_warning_secs) }
    pub fn idle_poll_interval(&self) -> Duration { Duration::from_millis(self.idle_poll_ms) }
    pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            api_base: Self::default_api_base(),
            endpoints: Endpoints::default(),
            storage_path: None,
            login_redirect: Self::default_login_redirect(),
            idle_timeout_secs: Self::default_idle_timeout_secs(),
            idle_warning_secs: Self::default_idle_warning_secs(),
            idle_poll_ms: Self::default_idle_poll_ms(),
            master_accounts: Vec::new(),
            permission_policy: PermissionPolicy::default(),
            known_permissions: Self::default_known_permissions(),
            invalidation_codes: Self::default_invalidation_codes(),
            request_timeout_secs: Self::default_request_timeout_secs(),
        }
    }
}
