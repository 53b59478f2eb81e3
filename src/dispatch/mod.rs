//! Tunnel dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → classify (tunnel marker, handshake, static, session; first match wins)
//!     → NotTunneled: backend.rs, request untouched
//!     → Handshake:   handshake manager, response is the handshake result
//!     → Static:      assets.rs, enveloped asset or placeholder image
//!     → Tunneled:    envelope decode → transcode → backend → normalize → envelope encode
//! ```
//!
//! # Design Decisions
//! - Every request ends in exactly one response built as a value
//! - The session read during classification is reused for the whole request

pub mod assets;
pub mod backend;
pub mod dispatcher;

use std::fmt;

use axum::http::HeaderMap;

use crate::config::TunnelSettings;
use crate::error::StoreError;
use crate::handshake::{CLIENT_UUID_HEADER, ECDH_INIT_HEADER};
use crate::session::{ClientSession, SessionStore};

pub use assets::{sniff_content_type, DirAssets, StaticAssets, PLACEHOLDER_PNG};
pub use backend::Backend;
pub use dispatcher::Dispatcher;

/// Terminal dispatch states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    NotTunneled,
    Handshake,
    Static,
    Tunneled,
}

impl TunnelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelState::NotTunneled => "not_tunneled",
            TunnelState::Handshake => "handshake",
            TunnelState::Static => "static",
            TunnelState::Tunneled => "tunneled",
        }
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol settings the dispatcher needs at request time.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Lowercase tunnel engagement header.
    pub tunnel_header: String,
    /// Lowercase static asset header.
    pub static_header: String,
    pub expose_shared_secret: bool,
    pub max_body_size: usize,
}

impl From<&TunnelSettings> for DispatchSettings {
    fn from(settings: &TunnelSettings) -> Self {
        Self {
            tunnel_header: settings.tunnel_header.to_ascii_lowercase(),
            static_header: settings.static_header.to_ascii_lowercase(),
            expose_shared_secret: settings.expose_shared_secret,
            max_body_size: settings.max_body_size,
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from(&TunnelSettings::default())
    }
}

/// Outcome of classifying a request, with the session when one was needed.
#[derive(Debug)]
pub enum Classification {
    NotTunneled,
    Handshake,
    Static { session: Option<ClientSession> },
    Tunneled(ClientSession),
}

impl Classification {
    pub fn state(&self) -> TunnelState {
        match self {
            Classification::NotTunneled => TunnelState::NotTunneled,
            Classification::Handshake => TunnelState::Handshake,
            Classification::Static { .. } => TunnelState::Static,
            Classification::Tunneled(_) => TunnelState::Tunneled,
        }
    }
}

/// Apply the transition rules in order; the first match wins.
pub async fn classify(
    headers: &HeaderMap,
    settings: &DispatchSettings,
    store: &dyn SessionStore,
) -> Result<Classification, StoreError> {
    // 1. Tunnel marker absent
    if !headers.contains_key(settings.tunnel_header.as_str()) {
        return Ok(Classification::NotTunneled);
    }

    // 2. Explicit handshake, or no client identity
    if headers.contains_key(ECDH_INIT_HEADER) {
        return Ok(Classification::Handshake);
    }
    let Some(client_uuid) = headers.get(CLIENT_UUID_HEADER) else {
        return Ok(Classification::Handshake);
    };
    let Ok(client_uuid) = client_uuid.to_str() else {
        return Ok(Classification::Handshake);
    };

    let session = store.session(client_uuid).await?;

    // 3. Static bypass
    if headers.contains_key(settings.static_header.as_str()) {
        return Ok(Classification::Static { session });
    }

    // 4. Unknown client → forced re-handshake, 5. otherwise tunneled
    Ok(match session {
        None => Classification::Handshake,
        Some(session) => Classification::Tunneled(session),
    })
}
