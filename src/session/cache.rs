//! Redis-backed key-value client.
//!
//! # Responsibilities
//! - Connect to the cache described by `RedisConfig` (password, database)
//! - Map GET/SET/DEL/EXISTS/PING onto the `KvClient` capability
//!
//! # Design Decisions
//! - One `ConnectionManager` shared by all requests; it multiplexes commands
//!   and reconnects on its own after a dropped connection
//! - Startup makes a bounded number of connection attempts, then fails

use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;

use crate::config::RedisConfig;
use crate::error::KvError;
use crate::session::kv::KvClient;

const CONNECT_RETRIES: usize = 2;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// `KvClient` talking to a Redis-compatible server.
#[derive(Clone)]
pub struct RedisClient {
    conn: ConnectionManager,
}

impl RedisClient {
    /// Open the managed connection. Fails if the cache cannot be reached.
    pub async fn connect(config: &RedisConfig) -> Result<Self, KvError> {
        let client = redis::Client::open(connection_url(config))?;
        let manager_config = ConnectionManagerConfig::new()
            .set_number_of_retries(CONNECT_RETRIES)
            .set_connection_timeout(CONNECT_TIMEOUT);
        let conn = ConnectionManager::new_with_config(client, manager_config).await?;

        tracing::info!(host = %config.host, port = config.port, db = config.db, "Connected to session cache");
        Ok(Self { conn })
    }
}

/// `redis://[:password@]host:port/db`, password percent-encoded.
fn connection_url(config: &RedisConfig) -> String {
    let auth = match config.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) => format!(":{}@", utf8_percent_encode(password, NON_ALPHANUMERIC)),
        None => String::new(),
    };
    format!("redis://{auth}{}:{}/{}", config.host, config.port, config.db)
}

impl From<redis::RedisError> for KvError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
            KvError::Connection(e.to_string())
        } else {
            KvError::Server(e.to_string())
        }
    }
}

#[async_trait]
impl KvClient for RedisClient {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn ping(&self) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(KvError::Server(format!("unexpected reply to PING: {reply}")))
        }
    }
}
