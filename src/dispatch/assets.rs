//! Static asset delivery for tunneled clients.
//!
//! # Responsibilities
//! - Map a request path to a file under the configured directory
//! - Sniff the asset's content type from its leading bytes
//! - Provide the placeholder image served to clients without a session

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use percent_encoding::percent_decode_str;

/// Source of static assets.
#[async_trait]
pub trait StaticAssets: Send + Sync {
    /// Load the asset for a request path. `Ok(None)` means not found.
    async fn load(&self, request_path: &str) -> io::Result<Option<Vec<u8>>>;
}

/// Assets read from a directory on disk.
#[derive(Debug, Clone)]
pub struct DirAssets {
    root: PathBuf,
}

impl DirAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path for a request path, or `None` if it cannot be served.
    pub fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let path = if request_path.is_empty() || request_path == "/" {
            "/index.html"
        } else {
            request_path
        };

        let decoded = percent_decode_str(path).decode_utf8().ok()?;
        let relative = Path::new(decoded.trim_start_matches('/'));

        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(resolved)
    }
}

#[async_trait]
impl StaticAssets for DirAssets {
    async fn load(&self, request_path: &str) -> io::Result<Option<Vec<u8>>> {
        let Some(path) = self.resolve(request_path) else {
            tracing::debug!(path = %request_path, "Rejected static path");
            return Ok(None);
        };

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        }
        tokio::fs::read(&path).await.map(Some)
    }
}

/// 1x1 transparent PNG returned in place of assets for session-less clients.
pub const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

const SNIFF_LEN: usize = 512;

/// Guess a content type from leading bytes.
pub fn sniff_content_type(bytes: &[u8]) -> &'static str {
    let head = &bytes[..bytes.len().min(SNIFF_LEN)];

    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1f\x8b\x08", "application/x-gzip"),
        (b"\x00\x00\x01\x00", "image/x-icon"),
        (b"wOFF", "font/woff"),
        (b"wOF2", "font/woff2"),
        (b"\x00asm", "application/wasm"),
    ];
    for &(magic, mime) in SIGNATURES {
        if head.starts_with(magic) {
            return mime;
        }
    }
    if head.len() >= 14 && &head[..4] == b"RIFF" && &head[8..14] == b"WEBPVP" {
        return "image/webp";
    }

    let start = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(head.len());
    let text = &head[start..];
    const HTML_TAGS: &[&[u8]] = &[b"<!doctype html", b"<html", b"<head", b"<body", b"<script", b"<div", b"<!--"];
    if HTML_TAGS
        .iter()
        .any(|tag| text.len() >= tag.len() && text[..tag.len()].eq_ignore_ascii_case(tag))
    {
        return "text/html; charset=utf-8";
    }
    if text.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }

    let binary = head
        .iter()
        .any(|b| matches!(b, 0x00..=0x08 | 0x0b | 0x0e..=0x1a | 0x1c..=0x1f));
    if binary {
        "application/octet-stream"
    } else {
        "text/plain; charset=utf-8"
    }
}
