//! Writes the rewritten feed to disk.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors that can occur while persisting the output feed.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to create output directory '{}': {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write temporary file '{}': {source}", path.display())]
    WriteTemp {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to move '{}' into place: {source}", path.display())]
    Rename {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Atomically writes `document` to `path`, creating parent directories.
///
/// The bytes go to a uniquely named sibling file first, are synced, then
/// renamed over `path`, so readers see either the old feed or the complete
/// new one and never a partial write.
pub fn write_feed(document: &[u8], path: &Path) -> Result<(), SinkError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| SinkError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    // SEC-009: Randomized temp filename to prevent TOCTOU race conditions
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    write_temp(document, &temp_path).map_err(|source| {
        let _ = std::fs::remove_file(&temp_path);
        SinkError::WriteTemp {
            path: temp_path.clone(),
            source,
        }
    })?;

    // On Windows, rename fails if destination exists, so remove it first
    #[cfg(windows)]
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }

    std::fs::rename(&temp_path, path).map_err(|source| {
        let _ = std::fs::remove_file(&temp_path);
        SinkError::Rename {
            path: path.to_path_buf(),
            source,
        }
    })?;

    tracing::debug!(path = %path.display(), bytes = document.len(), "Feed written");
    Ok(())
}

fn write_temp(document: &[u8], temp_path: &Path) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true) // Fails atomically if file exists (prevents symlink race)
        .open(temp_path)?;
    file.write_all(document)?;
    file.sync_all()
}
