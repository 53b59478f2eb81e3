//! Per-client session storage.
//!
//! # Data Flow
//! ```text
//! handshake completes
//!     → SessionStore::add_session(uuid, key, token)   (latest handshake wins)
//!
//! tunneled request
//!     → SessionStore::get_key / get_token
//! ```
//!
//! # Backends
//! - memory.rs: in-process concurrent map (DashMap)
//! - kv.rs: external key-value cache behind the `KvClient` capability
//! - cache.rs: `KvClient` on a managed Redis connection
//!
//! Backend choice is made once at startup from configuration.

pub mod cache;
pub mod kv;
pub mod memory;

use async_trait::async_trait;

use crate::crypto::SessionKey;
use crate::error::StoreError;

pub use kv::{KvClient, KvSessionStore};
pub use memory::MemorySessionStore;
pub use cache::RedisClient;

/// A live tunnel session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    pub client_uuid: String,
    pub key: SessionKey,
    pub auth_token: String,
}

/// Capability set every session backend provides.
///
/// Reads must be safe to interleave with concurrent `add_session` calls.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Register a session, replacing any existing one for the same UUID.
    async fn add_session(
        &self,
        client_uuid: &str,
        key: SessionKey,
        auth_token: &str,
    ) -> Result<(), StoreError>;

    /// Session key for the client, or `StoreError::NotFound`.
    async fn get_key(&self, client_uuid: &str) -> Result<SessionKey, StoreError>;

    /// Auth token for the client, or `StoreError::NotFound`.
    async fn get_token(&self, client_uuid: &str) -> Result<String, StoreError>;

    /// Full session if both the key and the token are present.
    async fn session(&self, client_uuid: &str) -> Result<Option<ClientSession>, StoreError> {
        let key = match self.get_key(client_uuid).await {
            Ok(k) => k,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let auth_token = match self.get_token(client_uuid).await {
            Ok(t) => t,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(ClientSession {
            client_uuid: client_uuid.to_string(),
            key,
            auth_token,
        }))
    }
}
