//! Session store backed by an external key-value cache.
//!
//! # Storage Layout
//! - One value per client under `session:<uuid>`
//! - Value is JSON `{"key": <base64 oct JWK>, "token": <auth token>}`
//!
//! A single SET per handshake keeps key and token from drifting apart and
//! makes "latest handshake wins" a plain overwrite.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crypto::SessionKey;
use crate::error::{KvError, StoreError};
use crate::session::{ClientSession, SessionStore};

/// Minimal capability an external cache must offer.
#[async_trait]
pub trait KvClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;
    async fn del(&self, key: &str) -> Result<(), KvError>;
    async fn exists(&self, key: &str) -> Result<bool, KvError>;
    async fn ping(&self) -> Result<(), KvError>;
}

#[derive(Serialize, Deserialize)]
struct StoredSession {
    key: String,
    token: String,
}

/// `SessionStore` over any `KvClient`.
pub struct KvSessionStore<C> {
    client: C,
}

impl<C: KvClient> KvSessionStore<C> {
    /// Wrap a client, verifying it is reachable first.
    pub async fn connect(client: C) -> Result<Self, StoreError> {
        client.ping().await?;
        Ok(Self { client })
    }

    fn entry_key(client_uuid: &str) -> String {
        format!("session:{client_uuid}")
    }

    async fn load(&self, client_uuid: &str) -> Result<Option<StoredSession>, StoreError> {
        let raw = match self.client.get(&Self::entry_key(client_uuid)).await? {
            Some(v) => v,
            None => return Ok(None),
        };
        let stored = serde_json::from_str(&raw).map_err(|_| StoreError::CorruptKey)?;
        Ok(Some(stored))
    }

    /// Remove a client's session.
    pub async fn remove(&self, client_uuid: &str) -> Result<(), StoreError> {
        self.client.del(&Self::entry_key(client_uuid)).await?;
        Ok(())
    }

    /// Whether a session is registered for the client.
    pub async fn contains(&self, client_uuid: &str) -> Result<bool, StoreError> {
        Ok(self.client.exists(&Self::entry_key(client_uuid)).await?)
    }
}

#[async_trait]
impl<C: KvClient> SessionStore for KvSessionStore<C> {
    async fn add_session(
        &self,
        client_uuid: &str,
        key: SessionKey,
        auth_token: &str,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_string(&StoredSession {
            key: key.to_jwk_b64(),
            token: auth_token.to_string(),
        })
        .map_err(|_| StoreError::CorruptKey)?;

        self.client.set(&Self::entry_key(client_uuid), &value).await?;
        tracing::debug!(client_uuid = %client_uuid, "Session stored in external cache");
        Ok(())
    }

    async fn get_key(&self, client_uuid: &str) -> Result<SessionKey, StoreError> {
        let stored = self
            .load(client_uuid)
            .await?
            .ok_or_else(|| StoreError::NotFound(client_uuid.to_string()))?;
        SessionKey::from_jwk_b64(&stored.key).ok_or(StoreError::CorruptKey)
    }

    async fn get_token(&self, client_uuid: &str) -> Result<String, StoreError> {
        self.load(client_uuid)
            .await?
            .map(|s| s.token)
            .ok_or_else(|| StoreError::NotFound(client_uuid.to_string()))
    }

    async fn session(&self, client_uuid: &str) -> Result<Option<ClientSession>, StoreError> {
        let stored = match self.load(client_uuid).await? {
            Some(s) => s,
            None => return Ok(None),
        };
        let key = SessionKey::from_jwk_b64(&stored.key).ok_or(StoreError::CorruptKey)?;
        Ok(Some(ClientSession {
            client_uuid: client_uuid.to_string(),
            key,
            auth_token: stored.token,
        }))
    }
}
