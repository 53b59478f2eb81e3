//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the session backend selected in configuration
//! - Generate the process identity
//! - Assemble the dispatcher with its upstream and optional asset source
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The identity lives for the process; a restart invalidates every session

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{SessionBackend, SessionConfig, TunnelConfig};
use crate::crypto::ServerIdentity;
use crate::dispatch::{DirAssets, DispatchSettings, Dispatcher};
use crate::error::{StoreError, UpstreamError};
use crate::http::UpstreamClient;
use crate::session::{KvSessionStore, MemorySessionStore, RedisClient, SessionStore};

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("session store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("upstream misconfigured: {0}")]
    Upstream(#[from] UpstreamError),
}

/// Connect the configured session backend.
pub async fn build_session_store(config: &SessionConfig) -> Result<Arc<dyn SessionStore>, StoreError> {
    match config.backend {
        SessionBackend::Memory => {
            tracing::info!("Using in-memory session store");
            Ok(Arc::new(MemorySessionStore::new()))
        }
        SessionBackend::Redis => {
            tracing::info!(
                host = %config.redis.host,
                port = config.redis.port,
                db = config.redis.db,
                "Connecting to external session store"
            );
            let store = KvSessionStore::connect(RedisClient::connect(&config.redis).await?).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Everything the server needs to handle traffic.
pub async fn build_dispatcher(config: &TunnelConfig) -> Result<Dispatcher, StartupError> {
    let store = build_session_store(&config.sessions).await?;
    let upstream = UpstreamClient::new(
        &config.upstream.address,
        Duration::from_secs(config.timeouts.upstream_secs),
    )?;
    let identity = Arc::new(ServerIdentity::generate());

    let mut dispatcher = Dispatcher::new(
        identity,
        store,
        Arc::new(upstream),
        DispatchSettings::from(&config.tunnel),
    );

    if let Some(dir) = &config.static_files.dir {
        tracing::info!(dir = %dir, "Serving static assets");
        dispatcher = dispatcher.with_static_assets(Arc::new(DirAssets::new(dir)));
    }

    tracing::info!(
        upstream = %config.upstream.address,
        tunnel_header = %config.tunnel.tunnel_header,
        "Dispatcher ready"
    );
    Ok(dispatcher)
}
