//! In-process session store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::crypto::SessionKey;
use crate::error::StoreError;
use crate::session::{ClientSession, SessionStore};

#[derive(Clone)]
struct Entry {
    key: SessionKey,
    auth_token: String,
}

/// Thread-safe session map keyed by client UUID.
///
/// Key and token live in one entry so a reader never observes the key of
/// one handshake paired with the token of another.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<DashMap<String, Entry>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn add_session(
        &self,
        client_uuid: &str,
        key: SessionKey,
        auth_token: &str,
    ) -> Result<(), StoreError> {
        let replaced = self
            .inner
            .insert(
                client_uuid.to_string(),
                Entry {
                    key,
                    auth_token: auth_token.to_string(),
                },
            )
            .is_some();
        tracing::debug!(client_uuid = %client_uuid, replaced, "Session stored");
        Ok(())
    }

    async fn get_key(&self, client_uuid: &str) -> Result<SessionKey, StoreError> {
        self.inner
            .get(client_uuid)
            .map(|r| r.value().key.clone())
            .ok_or_else(|| StoreError::NotFound(client_uuid.to_string()))
    }

    async fn get_token(&self, client_uuid: &str) -> Result<String, StoreError> {
        self.inner
            .get(client_uuid)
            .map(|r| r.value().auth_token.clone())
            .ok_or_else(|| StoreError::NotFound(client_uuid.to_string()))
    }

    async fn session(&self, client_uuid: &str) -> Result<Option<ClientSession>, StoreError> {
        Ok(self.inner.get(client_uuid).map(|r| ClientSession {
            client_uuid: client_uuid.to_string(),
            key: r.value().key.clone(),
            auth_token: r.value().auth_token.clone(),
        }))
    }
}
