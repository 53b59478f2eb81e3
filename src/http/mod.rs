//! HTTP transport subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → dispatch::Dispatcher (tunnel state machine)
//!     → server.rs UpstreamClient (backend application)
//!     → Send to client
//! ```

pub mod server;

pub use server::{TunnelServer, UpstreamClient};
