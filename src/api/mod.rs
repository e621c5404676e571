//! REST backend collaborator.
//! The backend owns users, permissions and authorization truth; this module only
//! describes the calls the session core makes against it.

use async_trait::async_trait;
use thiserror::Error;

use crate::identity::{Permission, TokenPair, UserProfile};

mod http;

pub use http::HttpBackend;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Transport(String),
    #[error("invalid username or password")]
    InvalidCredentials,
    /// Access token rejected and the single refresh attempt failed.
    #[error("session expired")]
    Unauthorized,
    /// The server ended this session itself, e.g. a login elsewhere evicted it.
    #[error("session invalidated by server ({0})")]
    SessionInvalidated(String),
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected backend payload: {0}")]
    Decode(String),
}

impl BackendError {
    /// Failures worth falling back to cached state for.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Transport(_) => true,
            BackendError::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<TokenPair, BackendError>;

    /// Exchange the stored refresh token for a new pair and persist it.
    async fn refresh(&self) -> Result<TokenPair, BackendError>;

    async fn fetch_profile(&self) -> Result<UserProfile, BackendError>;

    /// Best-effort server-side revocation of the current refresh token.
    async fn logout(&self) -> Result<(), BackendError>;

    /// `Ok(None)` when the server keeps no override list for the user.
    async fn fetch_permission_overrides(&self, user_id: i64) -> Result<Option<Vec<Permission>>, BackendError>;

    async fn save_permission_overrides(&self, user_id: i64, perms: &[Permission]) -> Result<(), BackendError>;
}
