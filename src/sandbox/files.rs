//! File writer for `write_files` entries.
//!
//! Entries are applied in order, each one immediately: a later entry for
//! the same path overwrites an earlier one. The first failure aborts the
//! batch; files already written stay on disk.
//!
//! Paths are not confined to any root. The only gate in front of this
//! module is API-token auth on the request.
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, error, info};

use crate::error::GatewayError;

/// One `{ path, content }` entry from the request.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FileEntry {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FileWriter;

impl FileWriter {
    pub fn new() -> Self {
        Self
    }

    /// Writes every entry and returns one `wrote:<path>` record per entry.
    pub async fn write_all(&self, entries: &[FileEntry]) -> Result<Vec<String>, GatewayError> {
        let mut results = Vec::with_capacity(entries.len());

        for entry in entries {
            let raw_path = entry
                .path
                .as_deref()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| GatewayError::BadRequest("File entry missing 'path'".to_string()))?;

            let path = expand_path(raw_path);
            let content = entry.content.as_deref().unwrap_or_default();
            debug!("Writing {} bytes to {}", content.len(), path.display());

            if let Err(e) = write_one(&path, content).await {
                error!("Failed to write file {}: {e}", path.display());
                return Err(GatewayError::FileWriteFailed { path, source: e });
            }

            info!("Wrote file {}", path.display());
            results.push(format!("wrote:{}", path.display()));
        }

        Ok(results)
    }
}

async fn write_one(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await
}

/// Expands a leading `~` to the home directory.
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}
