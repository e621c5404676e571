#![allow(dead_code)]
//! Shared fixtures: an in-memory backend whose answers each test scripts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use roadside_admin::api::{Backend, BackendError};
use roadside_admin::identity::{Permission, TokenPair, UserProfile};
use roadside_admin::storage::{keys, ClientStorage, FileStorage, MemoryStorage};
use roadside_admin::{AdminConfig, SessionContext};

pub struct FakeBackend {
    pub profile: Mutex<Result<UserProfile, BackendError>>,
    pub login_result: Mutex<Result<TokenPair, BackendError>>,
    pub refresh_result: Mutex<Result<TokenPair, BackendError>>,
    pub overrides: Mutex<HashMap<i64, Vec<Permission>>>,
    pub overrides_error: Mutex<Option<BackendError>>,
    pub save_error: Mutex<Option<BackendError>>,
    pub profile_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub override_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn serving(profile: UserProfile) -> Arc<Self> {
        Arc::new(Self {
            profile: Mutex::new(Ok(profile)),
            login_result: Mutex::new(Ok(TokenPair { access: "access-1".into(), refresh: "refresh-1".into() })),
            refresh_result: Mutex::new(Err(BackendError::Unauthorized)),
            overrides: Mutex::new(HashMap::new()),
            overrides_error: Mutex::new(None),
            save_error: Mutex::new(None),
            profile_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            override_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(err: BackendError) -> Arc<Self> {
        let b = Self::serving(UserProfile::default());
        *b.profile.lock() = Err(err);
        b
    }

    pub fn profile_calls(&self) -> usize { self.profile_calls.load(Ordering::SeqCst) }
    pub fn refresh_calls(&self) -> usize { self.refresh_calls.load(Ordering::SeqCst) }
    pub fn logout_calls(&self) -> usize { self.logout_calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn login(&self, _username: &str, _password: &str) -> Result<TokenPair, BackendError> {
        self.login_result.lock().clone()
    }

    async fn refresh(&self) -> Result<TokenPair, BackendError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_result.lock().clone()
    }

    async fn fetch_profile(&self) -> Result<UserProfile, BackendError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        self.profile.lock().clone()
    }

    async fn logout(&self) -> Result<(), BackendError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_permission_overrides(&self, user_id: i64) -> Result<Option<Vec<Permission>>, BackendError> {
        self.override_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.overrides_error.lock().clone() { return Err(e); }
        Ok(self.overrides.lock().get(&user_id).cloned())
    }

    async fn save_permission_overrides(&self, user_id: i64, perms: &[Permission]) -> Result<(), BackendError> {
        if let Some(e) = self.save_error.lock().clone() { return Err(e); }
        self.overrides.lock().insert(user_id, perms.to_vec());
        Ok(())
    }
}

pub fn staff(id: i64, username: &str) -> UserProfile {
    UserProfile {
        id,
        username: username.into(),
        first_name: "Test".into(),
        last_name: "Admin".into(),
        email: format!("{}@example.com", username),
        role: Some("admin".into()),
        is_superuser: false,
        is_staff: true,
    }
}

pub fn perms(list: &[&str]) -> Vec<Permission> { list.iter().map(|p| Permission::from(*p)).collect() }

pub fn seed_tokens(storage: &MemoryStorage) {
    storage.set(keys::ACCESS_TOKEN, "stored-access".into()).unwrap();
    storage.set(keys::REFRESH_TOKEN, "stored-refresh".into()).unwrap();
}

pub fn seed_cached_profile(storage: &MemoryStorage, profile: &UserProfile) {
    storage.set(keys::USER_PROFILE, serde_json::to_string(profile).unwrap()).unwrap();
}

pub fn file_session(config: AdminConfig, storage: &FileStorage, backend: Arc<FakeBackend>) -> Arc<SessionContext> {
    Arc::new(SessionContext::new(config, Arc::new(storage.clone()), backend))
}

pub fn session(config: AdminConfig, storage: &MemoryStorage, backend: Arc<FakeBackend>) -> Arc<SessionContext> {
    Arc::new(SessionContext::new(config, Arc::new(storage.clone()), backend))
}
