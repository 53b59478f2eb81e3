//! Layer8 encrypted tunnel middleware library.
//!
//! Sits in front of an HTTP backend. Requests carrying the tunnel header are
//! either ECDH handshakes, static asset requests, or AES-GCM sealed envelopes
//! that are opened, rebuilt into plain requests, forwarded, and sealed again
//! on the way back. Everything else passes through untouched.

pub mod client;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod handshake;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod session;
pub mod transcode;
pub mod uploads;

pub use client::TunnelClient;
pub use config::TunnelConfig;
pub use dispatch::Dispatcher;
pub use error::{TunnelError, TunnelResult};
pub use http::{TunnelServer, UpstreamClient};
pub use lifecycle::Shutdown;
