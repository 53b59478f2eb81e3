//! Persisting uploaded files from a parsed form.
//!
//! Backends receiving a reconstructed multipart body can parse it with
//! `transcode::decode_multipart` and store the files of one field here.

use std::io;
use std::path::{Path, PathBuf};

use crate::transcode::{FormFields, TypedValue};

/// Directory used when no destination is given.
pub const DEFAULT_UPLOAD_DIR: &str = "tmp";

/// A file written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    pub field: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub path: PathBuf,
}

/// Writes uploaded files under a destination directory.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dest: PathBuf,
}

impl Default for UploadStore {
    fn default() -> Self {
        Self::new(DEFAULT_UPLOAD_DIR)
    }
}

impl UploadStore {
    /// An empty destination falls back to `tmp`.
    pub fn new(dest: impl AsRef<Path>) -> Self {
        let dest = dest.as_ref();
        let dest = if dest.as_os_str().is_empty() {
            PathBuf::from(DEFAULT_UPLOAD_DIR)
        } else {
            dest.to_path_buf()
        };
        Self { dest }
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Save the first file under `field`. `None` if there is no such file.
    pub async fn single(&self, fields: &FormFields, field: &str) -> io::Result<Option<SavedFile>> {
        let Some(value) = fields.get(field).and_then(|values| values.iter().find(|v| v.is_file())) else {
            return Ok(None);
        };
        tokio::fs::create_dir_all(&self.dest).await?;
        self.write(field, value).await
    }

    /// Save every file under `field`; non-file values are skipped.
    pub async fn array(&self, fields: &FormFields, field: &str) -> io::Result<Vec<SavedFile>> {
        let Some(values) = fields.get(field) else {
            return Ok(Vec::new());
        };
        if !values.iter().any(TypedValue::is_file) {
            return Ok(Vec::new());
        }

        tokio::fs::create_dir_all(&self.dest).await?;
        let mut saved = Vec::new();
        for value in values {
            if let Some(file) = self.write(field, value).await? {
                saved.push(file);
            }
        }
        Ok(saved)
    }

    async fn write(&self, field: &str, value: &TypedValue) -> io::Result<Option<SavedFile>> {
        let TypedValue::File { name, mime_type, bytes, .. } = value else {
            return Ok(None);
        };
        let Some(file_name) = safe_file_name(name) else {
            tracing::warn!(field = %field, name = %name, "Skipping upload with unusable file name");
            return Ok(None);
        };

        let path = self.dest.join(file_name);
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(field = %field, path = %path.display(), size = bytes.len(), "Upload saved");

        Ok(Some(SavedFile {
            field: field.to_string(),
            name: file_name.to_string(),
            mime_type: mime_type.clone(),
            size: bytes.len() as u64,
            path,
        }))
    }
}

/// Final path component of a client-supplied name, if it is a plain name.
fn safe_file_name(name: &str) -> Option<&str> {
    let last = name.rsplit(|c: char| c == '/' || c == '\\').next()?;
    match last {
        "" | "." | ".." => None,
        n => Some(n),
    }
}
