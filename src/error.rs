//! Unified application error model and mapping helpers.
//! This module provides the error enum surfaced to dashboard callers (login form,
//! CRUD pages, CLI) along with helpers that decide whether a failure forces the
//! operator back to the login entry point.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::api::BackendError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    Auth { code: String, message: String },
    SessionExpired { code: String, message: String },
    SessionInvalidated { code: String, message: String },
    Network { code: String, message: String },
    Storage { code: String, message: String },
    Config { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Auth { code, .. }
            | AppError::SessionExpired { code, .. }
            | AppError::SessionInvalidated { code, .. }
            | AppError::Network { code, .. }
            | AppError::Storage { code, .. }
            | AppError::Config { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Auth { message, .. }
            | AppError::SessionExpired { message, .. }
            | AppError::SessionInvalidated { message, .. }
            | AppError::Network { message, .. }
            | AppError::Storage { message, .. }
            | AppError::Config { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn auth<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn session_expired<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::SessionExpired { code: code.into(), message: msg.into() } }
    pub fn session_invalidated<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::SessionInvalidated { code: code.into(), message: msg.into() } }
    pub fn network<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Network { code: code.into(), message: msg.into() } }
    pub fn storage<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Storage { code: code.into(), message: msg.into() } }
    pub fn config<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Config { code: code.into(), message: msg.into() } }
    pub fn internal<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Client storage could not be read or written.
    pub fn storage_failure(err: anyhow::Error) -> Self { Self::storage("storage_error", format!("{:#}", err)) }

    /// Settings rejected at startup.
    pub fn config_failure(err: anyhow::Error) -> Self { Self::config("invalid_config", format!("{:#}", err)) }

    /// True when the only way forward is a fresh login.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, AppError::SessionExpired { .. } | AppError::SessionInvalidated { .. })
    }

    /// Query flag appended to the login redirect so the login screen can explain itself.
    pub fn login_flag(&self) -> Option<&'static str> {
        match self {
            AppError::SessionExpired { .. } => Some("session_expired"),
            AppError::SessionInvalidated { .. } => Some("session_invalidated"),
            _ => None,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: plumbing failures (storage, serde) land here
        AppError::Internal { code: "internal_error".into(), message: format!("{:#}", err) }
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        let message = err.to_string();
        match err {
            BackendError::InvalidCredentials => AppError::Auth { code: "invalid_credentials".into(), message },
            BackendError::Unauthorized => AppError::SessionExpired { code: "session_expired".into(), message },
            BackendError::SessionInvalidated(_) => AppError::SessionInvalidated { code: "session_invalidated".into(), message },
            BackendError::Transport(_) => AppError::Network { code: "network_error".into(), message },
            BackendError::Status { .. } => AppError::Network { code: "backend_error".into(), message },
            BackendError::Decode(_) => AppError::Internal { code: "decode_error".into(), message },
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
