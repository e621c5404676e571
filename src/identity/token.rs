use std::sync::Arc;

use anyhow::{anyhow, Result};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{keys, ClientStorage};

/// Access + refresh bearer pair issued by the login endpoint.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never log bearer material
        f.debug_struct("TokenPair").field("access", &"<redacted>").field("refresh", &"<redacted>").finish()
    }
}

/// Unverified JWT payload. The server is the only party that checks signatures;
/// the client reads these fields for expiry hints and logging.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub jti: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl AccessClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|e| Utc.timestamp_opt(e, 0).single())
    }

    /// Unknown expiry counts as not expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map(|t| t <= now).unwrap_or(false)
    }
}

/// Decode the payload segment of a JWT without verifying it.
pub fn decode_claims(token: &str) -> Result<AccessClaims> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_sig)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(anyhow!("token is not a JWT"));
    };
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| anyhow!("jwt payload is not base64url: {}", e))?;
    let claims = serde_json::from_slice::<AccessClaims>(&bytes)?;
    Ok(claims)
}

/// Typed view over the token keys of the client storage. Shared by the session
/// context and the HTTP backend so a refreshed pair is visible to both.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn ClientStorage>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn ClientStorage>) -> Self { Self { storage } }

    /// The pair, or `None` unless an access token is stored. A missing refresh
    /// token is kept as an empty string; refreshing will then fail cleanly.
    pub fn load(&self) -> Option<TokenPair> {
        let access = self.storage.get(keys::ACCESS_TOKEN).filter(|s| !s.is_empty())?;
        let refresh = self.storage.get(keys::REFRESH_TOKEN).unwrap_or_default();
        Some(TokenPair { access, refresh })
    }

    pub fn save(&self, pair: &TokenPair) -> Result<()> {
        self.storage.set(keys::ACCESS_TOKEN, pair.access.clone())?;
        self.storage.set(keys::REFRESH_TOKEN, pair.refresh.clone())?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.storage.remove_all(&[keys::ACCESS_TOKEN, keys::REFRESH_TOKEN])
    }

    /// True when the access token decodes and has passed its `exp`.
    pub fn access_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.load()
            .and_then(|pair| decode_claims(&pair.access).ok())
            .map(|c| c.is_expired_at(now))
            .unwrap_or(false)
    }

    /// True only when both tokens decode and both have passed their `exp`.
    pub fn both_expired_at(&self, now: DateTime<Utc>) -> bool {
        let Some(pair) = self.load() else { return false; };
        let access = decode_claims(&pair.access);
        let refresh = decode_claims(&pair.refresh);
        match (access, refresh) {
            (Ok(a), Ok(r)) => a.is_expired_at(now) && r.is_expired_at(now),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn fake_jwt(claims: &serde_json::Value) -> String {
        let enc = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        format!(
            "{}.{}.{}",
            enc.encode(br#"{"alg":"HS256","typ":"JWT"}"#),
            enc.encode(serde_json::to_vec(claims).unwrap_or_default()),
            enc.encode(b"sig")
        )
    }

    #[test]
    fn decodes_simplejwt_payload() {
        let tok = fake_jwt(&json!({"user_id": 9, "exp": 1_700_000_000, "token_type": "access", "jti": "x"}));
        let c = decode_claims(&tok).unwrap();
        assert_eq!(c.user_id, Some(9));
        assert_eq!(c.token_type.as_deref(), Some("access"));
        assert_eq!(c.expires_at().unwrap().timestamp(), 1_700_000_000);
        assert!(c.is_expired_at(Utc::now()));
    }

    #[test]
    fn opaque_tokens_do_not_decode() {
        assert!(decode_claims("opaque-token").is_err());
        assert!(decode_claims("a.%%%.c").is_err());
    }

    #[test]
    fn debug_redacts_tokens() {
        let pair = TokenPair { access: "secret-a".into(), refresh: "secret-r".into() };
        let s = format!("{:?}", pair);
        assert!(!s.contains("secret"));
    }

    #[test]
    fn token_store_round_and_expiry() {
        let store = TokenStore::new(Arc::new(MemoryStorage::new()));
        assert!(store.load().is_none());
        assert!(!store.both_expired_at(Utc::now()));

        let past = fake_jwt(&json!({"exp": 1_000}));
        store.save(&TokenPair { access: past.clone(), refresh: past.clone() }).unwrap();
        assert!(store.both_expired_at(Utc::now()));

        let future = fake_jwt(&json!({"exp": Utc::now().timestamp() + 3_600}));
        store.save(&TokenPair { access: past, refresh: future }).unwrap();
        assert!(!store.both_expired_at(Utc::now()));
        assert!(store.access_expired_at(Utc::now()));

        store.save(&TokenPair { access: "opaque".into(), refresh: "opaque".into() }).unwrap();
        assert!(!store.both_expired_at(Utc::now()));
        assert!(!store.access_expired_at(Utc::now()));

        store.clear().unwrap();
        assert!(store.load().is_none());
    }
}
