use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{Backend, BackendError};
use crate::config::{AdminConfig, Endpoints};
use crate::identity::{Permission, TokenPair, TokenStore, UserProfile};

/// reqwest-backed client for the dashboard's REST API. Bearer tokens come from
/// the shared [`TokenStore`]; a 401 triggers at most one refresh per request.
pub struct HttpBackend {
    base: Url,
    client: reqwest::Client,
    endpoints: Endpoints,
    tokens: TokenStore,
    invalidation_codes: Vec<String>,
    /// Serializes refreshes so concurrent 401s spend the refresh token once
    refresh_lock: tokio::sync::Mutex<()>,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OverridesPayload {
    Bare(Vec<Permission>),
    Wrapped { permissions: Vec<Permission> },
}

fn transport(e: reqwest::Error) -> BackendError {
    BackendError::Transport(e.to_string())
}

async fn expect_success(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() { return Ok(resp); }
    let body = resp.text().await.unwrap_or_default();
    Err(BackendError::Status { status: status.as_u16(), body })
}

impl HttpBackend {
    pub fn new(config: &AdminConfig, tokens: TokenStore) -> Result<Self> {
        let base = Url::parse(&config.api_base).context("invalid api_base")?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            base,
            client,
            endpoints: config.endpoints.clone(),
            tokens,
            invalidation_codes: config.invalidation_codes.clone(),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn url(&self, path: &str) -> Result<Url, BackendError> {
        self.base.join(path).map_err(|e| BackendError::Decode(format!("bad endpoint path {:?}: {}", path, e)))
    }

    /// Invalidation code carried by a 401 body, if it is one of the configured ones.
    fn invalidation_code(&self, body: &str) -> Option<String> {
        let v: serde_json::Value = serde_json::from_str(body).ok()?;
        ["code", "error", "reason"]
            .iter()
            .filter_map(|k| v.get(*k).and_then(|c| c.as_str()))
            .find(|c| self.invalidation_codes.iter().any(|ic| ic.eq_ignore_ascii_case(c)))
            .map(|c| c.to_string())
    }

    async fn send_with(
        &self,
        method: Method,
        url: &Url,
        access: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, BackendError> {
        let mut req = self.client.request(method, url.clone()).bearer_auth(access);
        if let Some(b) = body {
            req = req.json(b);
        }
        req.send().await.map_err(transport)
    }

    /// Send with the stored access token; on 401 refresh once and retry once.
    async fn send_authorized(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, BackendError> {
        let url = self.url(path)?;
        let pair = self.tokens.load().ok_or(BackendError::Unauthorized)?;
        let resp = self.send_with(method.clone(), &url, &pair.access, body).await?;
        if resp.status() != StatusCode::UNAUTHORIZED { return Ok(resp); }

        let text = resp.text().await.unwrap_or_default();
        if let Some(code) = self.invalidation_code(&text) {
            warn!(code = %code, path, "session invalidated by server");
            return Err(BackendError::SessionInvalidated(code));
        }
        debug!(path, "access token rejected; refreshing");
        let fresh = self.refresh_after(&pair.access).await?;
        let retry = self.send_with(method, &url, &fresh.access, body).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            let text = retry.text().await.unwrap_or_default();
            if let Some(code) = self.invalidation_code(&text) {
                return Err(BackendError::SessionInvalidated(code));
            }
            return Err(BackendError::Unauthorized);
        }
        Ok(retry)
    }

    /// Refresh unless another request already replaced `stale_access`.
    async fn refresh_after(&self, stale_access: &str) -> Result<TokenPair, BackendError> {
        let _guard = self.refresh_lock.lock().await;
        if let Some(current) = self.tokens.load() {
            if current.access != stale_access { return Ok(current); }
        }
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<TokenPair, BackendError> {
        let pair = self.tokens.load().ok_or(BackendError::Unauthorized)?;
        if pair.refresh.is_empty() { return Err(BackendError::Unauthorized); }
        let url = self.url(&self.endpoints.refresh)?;
        let resp = self.client
            .post(url)
            .json(&serde_json::json!({"refresh": pair.refresh}))
            .send()
            .await
            .map_err(transport)?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::BAD_REQUEST {
            let text = resp.text().await.unwrap_or_default();
            if let Some(code) = self.invalidation_code(&text) {
                return Err(BackendError::SessionInvalidated(code));
            }
            info!("refresh token rejected");
            return Err(BackendError::Unauthorized);
        }
        let resp = expect_success(resp).await?;
        let body: RefreshResponse = resp.json().await.map_err(|e| BackendError::Decode(e.to_string()))?;
        let fresh = TokenPair { access: body.access, refresh: body.refresh.unwrap_or(pair.refresh) };
        if let Err(e) = self.tokens.save(&fresh) {
            warn!(error = %e, "could not persist refreshed tokens");
        }
        debug!("access token refreshed");
        Ok(fresh)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn login(&self, username: &str, password: &str) -> Result<TokenPair, BackendError> {
        let url = self.url(&self.endpoints.login)?;
        let resp = self.client
            .post(url)
            .json(&serde_json::json!({"username": username, "password": password}))
            .send()
            .await
            .map_err(transport)?;
        if matches!(resp.status(), StatusCode::UNAUTHORIZED | StatusCode::BAD_REQUEST) {
            return Err(BackendError::InvalidCredentials);
        }
        let resp = expect_success(resp).await?;
        resp.json::<TokenPair>().await.map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn refresh(&self) -> Result<TokenPair, BackendError> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    async fn fetch_profile(&self) -> Result<UserProfile, BackendError> {
        let resp = self.send_authorized(Method::GET, &self.endpoints.profile, None).await?;
        let resp = expect_success(resp).await?;
        resp.json::<UserProfile>().await.map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn logout(&self) -> Result<(), BackendError> {
        let Some(pair) = self.tokens.load() else { return Ok(()); };
        let url = self.url(&self.endpoints.logout)?;
        let body = serde_json::json!({"refresh": pair.refresh});
        let resp = self.send_with(Method::POST, &url, &pair.access, Some(&body)).await?;
        // an already-dead token is as logged out as it gets
        if resp.status() == StatusCode::UNAUTHORIZED { return Ok(()); }
        expect_success(resp).await.map(|_| ())
    }

    async fn fetch_permission_overrides(&self, user_id: i64) -> Result<Option<Vec<Permission>>, BackendError> {
        let path = self.endpoints.permissions_for(user_id);
        let resp = self.send_authorized(Method::GET, &path, None).await?;
        if resp.status() == StatusCode::NOT_FOUND { return Ok(None); }
        let resp = expect_success(resp).await?;
        let payload: OverridesPayload = resp.json().await.map_err(|e| BackendError::Decode(e.to_string()))?;
        let list = match payload {
            OverridesPayload::Bare(l) | OverridesPayload::Wrapped { permissions: l } => l,
        };
        Ok(Some(list))
    }

    async fn save_permission_overrides(&self, user_id: i64, perms: &[Permission]) -> Result<(), BackendError> {
        let path = self.endpoints.permissions_for(user_id);
        let body = serde_json::json!({"permissions": perms});
        let resp = self.send_authorized(Method::PUT, &path, Some(&body)).await?;
        expect_success(resp).await.map(|_| ())
    }
}
