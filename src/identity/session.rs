use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::permissions::{MasterAccounts, Permission, PermissionResolver, PermissionSource, PermissionStore};
use super::profile::UserProfile;
use super::token::TokenStore;
use crate::api::{Backend, BackendError, HttpBackend};
use crate::config::AdminConfig;
use crate::error::{AppError, AppResult};
use crate::storage::{keys, ClientStorage, FileStorage, MemoryStorage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    UserRequested,
    Inactivity,
    SessionExpired,
    SessionInvalidated,
}

impl LogoutReason {
    /// Flag appended to the login redirect; none for a plain user logout.
    pub fn login_flag(&self) -> Option<&'static str> {
        match self {
            LogoutReason::UserRequested => None,
            LogoutReason::Inactivity => Some("inactivity"),
            LogoutReason::SessionExpired => Some("session_expired"),
            LogoutReason::SessionInvalidated => Some("session_invalidated"),
        }
    }

    fn ends_in_expiry(&self) -> bool {
        matches!(self, LogoutReason::SessionExpired | LogoutReason::SessionInvalidated)
    }

    /// Logout forced by a backend failure, if the failure ends the session.
    pub fn for_backend_error(err: &BackendError) -> Option<Self> {
        match err {
            BackendError::Unauthorized => Some(LogoutReason::SessionExpired),
            BackendError::SessionInvalidated(_) => Some(LogoutReason::SessionInvalidated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSource {
    Fresh,
    Cached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Unauthenticated,
    Fresh(UserProfile),
    Cached(UserProfile),
}

impl BootstrapOutcome {
    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            BootstrapOutcome::Unauthenticated => None,
            BootstrapOutcome::Fresh(u) | BootstrapOutcome::Cached(u) => Some(u),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Init,
    Unauthenticated,
    Authenticated,
    Expired,
    Destroyed,
}

/// Broadcast to UI consumers (redirects, banners, countdowns).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Authenticated { user_id: i64, username: String, source: ProfileSource },
    LoggedOut { reason: LogoutReason, redirect: String },
    PermissionsChanged { user_id: i64 },
    IdleWarning { remaining_secs: u64 },
    IdleWarningCleared,
}

#[derive(Debug, Clone)]
struct ActiveSession {
    session_id: Uuid,
    user: UserProfile,
    resolver: PermissionResolver,
    source: ProfileSource,
    started_at: DateTime<Utc>,
}

#[derive(Debug)]
enum Phase {
    Init,
    Unauthenticated,
    Authenticated(ActiveSession),
    Expired,
    Destroyed,
}

/// Explicit session object for one dashboard client: tokens, cached profile,
/// resolved permissions and the lifecycle `init -> authenticated -> expired/destroyed`.
/// Shared behind an `Arc` by UI code, the inactivity monitor and the CLI.
pub struct SessionContext {
    config: Arc<AdminConfig>,
    backend: Arc<dyn Backend>,
    storage: Arc<dyn ClientStorage>,
    tokens: TokenStore,
    permissions: PermissionStore,
    masters: MasterAccounts,
    known: Vec<Permission>,
    phase: RwLock<Phase>,
    events: broadcast::Sender<SessionEvent>,
}

const EVENT_CAPACITY: usize = 64;

impl SessionContext {
    pub fn new(config: AdminConfig, storage: Arc<dyn ClientStorage>, backend: Arc<dyn Backend>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let masters = MasterAccounts::new(&config.master_accounts);
        let known = config.known_permissions.iter().map(|p| Permission::from(p.as_str())).collect();
        Self {
            tokens: TokenStore::new(storage.clone()),
            permissions: PermissionStore::new(storage.clone()),
            config: Arc::new(config),
            backend,
            storage,
            masters,
            known,
            phase: RwLock::new(Phase::Init),
            events,
        }
    }

    /// Wire storage and the HTTP backend from configuration.
    pub fn from_config(config: AdminConfig) -> AppResult<Self> {
        config.validate().map_err(AppError::config_failure)?;
        let storage: Arc<dyn ClientStorage> = match &config.storage_path {
            Some(p) => Arc::new(FileStorage::open(p.clone()).map_err(AppError::storage_failure)?),
            None => Arc::new(MemoryStorage::new()),
        };
        let backend = HttpBackend::new(&config, TokenStore::new(storage.clone())).map_err(AppError::config_failure)?;
        Ok(Self::new(config, storage, Arc::new(backend)))
    }

    pub fn config(&self) -> &AdminConfig { &self.config }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> { self.events.subscribe() }

    /// Publish an event to subscribers; nobody listening is fine.
    pub fn notify(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Resolve the stored token into a user. Never fails: every error path
    /// degrades to a cached profile or to "unauthenticated".
    pub async fn bootstrap(&self) -> BootstrapOutcome {
        if self.tokens.load().is_none() {
            debug!("no stored token; unauthenticated");
            *self.phase.write() = Phase::Unauthenticated;
            return BootstrapOutcome::Unauthenticated;
        }
        let now = Utc::now();
        if self.tokens.both_expired_at(now) {
            info!("stored tokens expired; clearing session");
            self.end_session(LogoutReason::SessionExpired).await;
            return BootstrapOutcome::Unauthenticated;
        }
        if self.tokens.access_expired_at(now) {
            debug!("access token expired; refreshing before profile fetch");
            if let Err(e) = self.backend.refresh().await {
                if let Some(reason) = LogoutReason::for_backend_error(&e) {
                    self.end_session(reason).await;
                    return BootstrapOutcome::Unauthenticated;
                }
                warn!(error = %e, "token refresh failed; trying the profile anyway");
            }
        }

        let (profile, source) = match self.backend.fetch_profile().await {
            Ok(profile) => {
                self.cache_profile(&profile);
                (profile, ProfileSource::Fresh)
            }
            Err(e) => match LogoutReason::for_backend_error(&e) {
                Some(reason) => {
                    self.end_session(reason).await;
                    return BootstrapOutcome::Unauthenticated;
                }
                None if e.is_transient() => match self.cached_profile() {
                    Some(profile) => {
                        warn!(error = %e, user_id = profile.id, "profile fetch failed; using cached profile");
                        (profile, ProfileSource::Cached)
                    }
                    None => {
                        warn!(error = %e, "profile fetch failed and no cached profile; unauthenticated");
                        *self.phase.write() = Phase::Unauthenticated;
                        return BootstrapOutcome::Unauthenticated;
                    }
                },
                None => {
                    warn!(error = %e, "profile fetch rejected; unauthenticated");
                    *self.phase.write() = Phase::Unauthenticated;
                    return BootstrapOutcome::Unauthenticated;
                }
            },
        };

        if let Err(e) = self.establish(profile.clone(), source).await {
            if let Some(reason) = LogoutReason::for_backend_error(&e) {
                self.end_session(reason).await;
            }
            return BootstrapOutcome::Unauthenticated;
        }
        match source {
            ProfileSource::Fresh => BootstrapOutcome::Fresh(profile),
            ProfileSource::Cached => BootstrapOutcome::Cached(profile),
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> AppResult<UserProfile> {
        let pair = self.backend.login(username, password).await.map_err(|e| {
            info!(username, error = %e, "login rejected");
            AppError::from(e)
        })?;
        self.tokens.save(&pair).map_err(AppError::storage_failure)?;
        let profile = match self.backend.fetch_profile().await {
            Ok(p) => p,
            Err(e) => {
                if let Err(ce) = self.tokens.clear() {
                    warn!(error = %ce, "could not clear tokens after failed login");
                }
                return Err(e.into());
            }
        };
        self.cache_profile(&profile);
        if let Err(e) = self.establish(profile.clone(), ProfileSource::Fresh).await {
            return Err(self.handle_backend_error(e).await);
        }
        Ok(profile)
    }

    /// End the session and return the login redirect. Safe to call repeatedly.
    ///
    /// Fails with [`AppError::Storage`] when client storage still holds the
    /// credentials afterwards; the in-memory session is gone either way and a
    /// later call retries the cleanup.
    pub async fn logout(&self, reason: LogoutReason) -> AppResult<String> {
        let redirect = self.login_redirect(reason);
        let had_tokens = self.tokens.load().is_some();
        let user_id = self.current_user().map(|u| u.id);
        let ended = if reason.ends_in_expiry() { Phase::Expired } else { Phase::Destroyed };
        if !had_tokens && user_id.is_none() {
            *self.phase.write() = ended;
            return Ok(redirect);
        }

        if reason == LogoutReason::UserRequested && had_tokens {
            if let Err(e) = self.backend.logout().await {
                warn!(error = %e, "server-side logout failed; clearing local session anyway");
            }
        }
        let cleared = self.clear_local().or_else(|e| {
            warn!(error = %e, "clearing client storage failed; retrying once");
            self.clear_local()
        });
        *self.phase.write() = ended;
        if let Err(e) = cleared {
            return Err(AppError::storage_failure(e.context("credentials left in client storage")));
        }
        info!(?reason, ?user_id, "session ended");
        self.notify(SessionEvent::LoggedOut { reason, redirect: redirect.clone() });
        Ok(redirect)
    }

    /// Route a failed CRUD call through the session: auth failures end the session.
    pub async fn handle_backend_error(&self, err: BackendError) -> AppError {
        if let Some(reason) = LogoutReason::for_backend_error(&err) {
            self.end_session(reason).await;
        }
        AppError::from(err)
    }

    /// Admin edit of a user's override list. The local store is written first;
    /// the current session picks the change up at once, others at their next bootstrap.
    pub async fn update_permission_overrides(&self, user_id: i64, perms: Vec<Permission>) -> AppResult<()> {
        self.permissions.save(user_id, &perms).map_err(AppError::storage_failure)?;
        let rebuilt = {
            let mut phase = self.phase.write();
            match &mut *phase {
                Phase::Authenticated(active) if active.user.id == user_id => {
                    active.resolver = PermissionResolver::resolve(
                        &active.user,
                        Some(perms.clone()),
                        self.config.permission_policy,
                        &self.known,
                        &self.masters,
                    );
                    true
                }
                _ => false,
            }
        };
        if rebuilt {
            self.notify(SessionEvent::PermissionsChanged { user_id });
        }
        info!(user_id, count = perms.len(), "permission overrides updated");

        if let Err(e) = self.backend.save_permission_overrides(user_id, &perms).await {
            warn!(user_id, error = %e, "permission overrides saved locally only");
            return Err(self.handle_backend_error(e).await);
        }
        Ok(())
    }

    pub fn status(&self) -> SessionStatus {
        match &*self.phase.read() {
            Phase::Init => SessionStatus::Init,
            Phase::Unauthenticated => SessionStatus::Unauthenticated,
            Phase::Authenticated(_) => SessionStatus::Authenticated,
            Phase::Expired => SessionStatus::Expired,
            Phase::Destroyed => SessionStatus::Destroyed,
        }
    }

    pub fn is_authenticated(&self) -> bool { matches!(*self.phase.read(), Phase::Authenticated(_)) }

    pub fn current_user(&self) -> Option<UserProfile> {
        match &*self.phase.read() {
            Phase::Authenticated(a) => Some(a.user.clone()),
            _ => None,
        }
    }

    pub fn session_id(&self) -> Option<Uuid> {
        match &*self.phase.read() {
            Phase::Authenticated(a) => Some(a.session_id),
            _ => None,
        }
    }

    pub fn profile_source(&self) -> Option<ProfileSource> {
        match &*self.phase.read() {
            Phase::Authenticated(a) => Some(a.source),
            _ => None,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match &*self.phase.read() {
            Phase::Authenticated(a) => Some(a.started_at),
            _ => None,
        }
    }

    pub fn has_permission(&self, perm: &str) -> bool {
        self.with_resolver(|r| r.has(perm))
    }

    pub fn has_any_permission<I, P>(&self, perms: I) -> bool
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        self.with_resolver(|r| r.has_any(perms))
    }

    pub fn has_all_permissions<I, P>(&self, perms: I) -> bool
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        self.with_resolver(|r| r.has_all(perms))
    }

    pub fn permission_source(&self) -> PermissionSource {
        self.with_resolver(|r| r.source())
    }

    /// Superuser or master account: every check passes.
    pub fn is_bypass(&self) -> bool {
        self.with_resolver(|r| r.is_bypass())
    }

    pub fn granted_permissions(&self) -> Vec<Permission> {
        self.with_resolver(|r| r.granted())
    }

    fn with_resolver<T>(&self, f: impl FnOnce(&PermissionResolver) -> T) -> T {
        match &*self.phase.read() {
            Phase::Authenticated(a) => f(&a.resolver),
            _ => f(&PermissionResolver::unauthenticated()),
        }
    }

    fn login_redirect(&self, reason: LogoutReason) -> String {
        let base = self.config.login_redirect.as_str();
        match reason.login_flag() {
            Some(flag) => {
                let sep = if base.contains('?') { '&' } else { '?' };
                format!("{}{}reason={}", base, sep, flag)
            }
            None => base.to_string(),
        }
    }

    /// Logout from an internal path; a storage failure is logged and the
    /// in-memory session ends regardless.
    async fn end_session(&self, reason: LogoutReason) {
        if let Err(e) = self.logout(reason).await {
            warn!(?reason, error = %e, "logout incomplete");
        }
    }

    /// Resolve permissions and enter `Authenticated`. Fails only when the
    /// permission store reports the session itself is dead.
    async fn establish(&self, user: UserProfile, source: ProfileSource) -> Result<(), BackendError> {
        let resolver = self.resolve_permissions(&user).await?;
        let active = ActiveSession {
            session_id: Uuid::new_v4(),
            user: user.clone(),
            resolver,
            source,
            started_at: Utc::now(),
        };
        info!(
            user_id = user.id,
            username = %user.username,
            sid = %active.session_id,
            ?source,
            permission_source = ?active.resolver.source(),
            "session authenticated"
        );
        *self.phase.write() = Phase::Authenticated(active);
        self.notify(SessionEvent::Authenticated { user_id: user.id, username: user.username, source });
        Ok(())
    }

    async fn resolve_permissions(&self, user: &UserProfile) -> Result<PermissionResolver, BackendError> {
        let bypass = user.is_superuser || self.masters.contains(&user.username);
        if !bypass {
            match self.backend.fetch_permission_overrides(user.id).await {
                Ok(Some(list)) => {
                    if let Err(e) = self.permissions.save(user.id, &list) {
                        warn!(user_id = user.id, error = %e, "could not cache permission overrides");
                    }
                }
                Ok(None) => {}
                Err(e) if LogoutReason::for_backend_error(&e).is_some() => return Err(e),
                Err(e) => warn!(user_id = user.id, error = %e, "permission store unreachable; using local overrides"),
            }
        }
        let overrides = self.permissions.load(user.id);
        Ok(PermissionResolver::resolve(user, overrides, self.config.permission_policy, &self.known, &self.masters))
    }

    fn cache_profile(&self, profile: &UserProfile) {
        let res = serde_json::to_string(profile)
            .map_err(anyhow::Error::from)
            .and_then(|s| self.storage.set(keys::USER_PROFILE, s));
        if let Err(e) = res {
            warn!(user_id = profile.id, error = %e, "could not cache user profile");
        }
    }

    fn cached_profile(&self) -> Option<UserProfile> {
        let raw = self.storage.get(keys::USER_PROFILE)?;
        match serde_json::from_str(&raw) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable cached profile");
                None
            }
        }
    }

    /// Drop tokens and the cached profile. Override lists stay.
    fn clear_local(&self) -> anyhow::Result<()> {
        self.storage.remove_all(&[keys::ACCESS_TOKEN, keys::REFRESH_TOKEN, keys::USER_PROFILE])
    }
}
