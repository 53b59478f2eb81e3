//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges (timeouts > 0, header names valid)
//! - Check the static directory exists when configured
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TunnelConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use std::path::Path;

use axum::http::HeaderName;

use crate::config::schema::TunnelConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &TunnelConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut push = |field: &'static str, message: String| {
        errors.push(ValidationError { field, message });
    };

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        push(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        );
    }

    if config.upstream.address.trim().is_empty() {
        push("upstream.address", "must not be empty".to_string());
    }

    for (field, name) in [
        ("tunnel.tunnel_header", &config.tunnel.tunnel_header),
        ("tunnel.static_header", &config.tunnel.static_header),
    ] {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            push(field, format!("'{}' is not a valid header name", name));
        }
    }

    if config.tunnel.tunnel_header.eq_ignore_ascii_case(&config.tunnel.static_header) {
        push(
            "tunnel.static_header",
            "must differ from tunnel.tunnel_header".to_string(),
        );
    }

    if config.tunnel.max_body_size == 0 {
        push("tunnel.max_body_size", "must be greater than zero".to_string());
    }

    if config.timeouts.request_secs == 0 {
        push("timeouts.request_secs", "must be greater than zero".to_string());
    }
    if config.timeouts.upstream_secs == 0 {
        push("timeouts.upstream_secs", "must be greater than zero".to_string());
    }

    if let Some(dir) = &config.static_files.dir {
        if !Path::new(dir).is_dir() {
            push("static_files.dir", format!("'{}' is not a directory", dir));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        push(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
