use super::*;

#[test]
fn backend_error_mapping() {
    assert!(matches!(AppError::from(BackendError::InvalidCredentials), AppError::Auth { .. }));
    assert!(matches!(AppError::from(BackendError::Unauthorized), AppError::SessionExpired { .. }));
    assert!(matches!(
        AppError::from(BackendError::SessionInvalidated("concurrent_login".into())),
        AppError::SessionInvalidated { .. }
    ));
    assert!(matches!(AppError::from(BackendError::Transport("refused".into())), AppError::Network { .. }));
    let status = AppError::from(BackendError::Status { status: 502, body: "bad gateway".into() });
    assert_eq!(status.code_str(), "backend_error");
}

#[test]
fn reauth_and_login_flags() {
    let expired = AppError::session_expired("session_expired", "token refresh failed");
    assert!(expired.requires_reauth());
    assert_eq!(expired.login_flag(), Some("session_expired"));

    let evicted = AppError::session_invalidated("session_invalidated", "logged in elsewhere");
    assert!(evicted.requires_reauth());
    assert_eq!(evicted.login_flag(), Some("session_invalidated"));

    let net = AppError::network("network_error", "timeout");
    assert!(!net.requires_reauth());
    assert_eq!(net.login_flag(), None);
}

#[test]
fn display_and_serde_tag() {
    let e = AppError::auth("invalid_credentials", "wrong password");
    assert_eq!(e.to_string(), "invalid_credentials: wrong password");
    let v = serde_json::to_value(&e).unwrap();
    assert_eq!(v["type"], "auth");
    assert_eq!(v["code"], "invalid_credentials");
}

#[test]
fn anyhow_maps_to_internal() {
    let e: AppError = anyhow::anyhow!("disk full").into();
    assert_eq!(e.code_str(), "internal_error");
    assert!(e.message().contains("disk full"));
}

#[test]
fn storage_and_config_failures_keep_context() {
    let e = AppError::storage_failure(anyhow::anyhow!("disk full").context("writing client.json.tmp"));
    assert!(matches!(e, AppError::Storage { .. }));
    assert_eq!(e.code_str(), "storage_error");
    assert!(e.message().contains("client.json.tmp"));
    assert!(e.message().contains("disk full"));
    assert!(!e.requires_reauth());

    let e = AppError::config_failure(anyhow::anyhow!("idle_poll_ms must be positive"));
    assert!(matches!(e, AppError::Config { .. }));
    assert_eq!(e.code_str(), "invalid_config");
}
