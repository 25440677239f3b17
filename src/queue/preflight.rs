//! Preflight validation of queued items
//!
//! Run before every transition and every (re)upload, never cached: the file
//! may have been moved, deleted or rewritten since it was queued.

use crate::config::ShipperConfig;
use crate::queue::layout::{Stage, StorageLayout};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a path is not eligible for processing
#[derive(Debug, Error)]
pub enum PreflightError {
    /// The parent directory is neither the Inbox nor the Outbox
    #[error("{0} is not in the inbox or outbox")]
    Location(PathBuf),

    /// The file does not carry the configured extension
    #[error("{0} does not have the configured extension")]
    Extension(PathBuf),

    /// The file is gone, usually moved by a concurrent actor. Expected.
    #[error("{0} is no longer present")]
    FileNotPresent(PathBuf),

    /// The file exceeds the configured size limit
    #[error("{path} is {size} bytes, limit is {limit}")]
    FileSize {
        /// Offending item
        path: PathBuf,
        /// Actual size
        size: u64,
        /// Configured limit
        limit: u64,
    },

    /// The file exists but its metadata could not be read
    #[error("Cannot inspect {path}: {source}")]
    Inaccessible {
        /// Offending item
        path: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },
}

impl PreflightError {
    /// True for the "file vanished" race, which is never reported
    pub fn is_expected(&self) -> bool {
        matches!(self, PreflightError::FileNotPresent(_))
    }
}

/// Decide whether `path` may be processed, returning the stage it sits in.
///
/// Steps, short-circuiting on the first failure: location, extension,
/// existence, size.
pub fn preflight(path: &Path, config: &ShipperConfig) -> Result<Stage, PreflightError> {
    let layout = StorageLayout::from_config(config);
    preflight_in(path, &layout, config)
}

/// [`preflight`] against an already computed layout
pub fn preflight_in(
    path: &Path,
    layout: &StorageLayout,
    config: &ShipperConfig,
) -> Result<Stage, PreflightError> {
    let stage = match layout.stage_of(path) {
        Some(stage @ (Stage::Inbox | Stage::Outbox)) => stage,
        _ => return Err(PreflightError::Location(path.to_path_buf())),
    };

    let expected = config.item.normalized_extension();
    let matches_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(expected))
        .unwrap_or(false);
    if !matches_extension {
        return Err(PreflightError::Extension(path.to_path_buf()));
    }

    let size = match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => return Err(PreflightError::FileNotPresent(path.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(PreflightError::FileNotPresent(path.to_path_buf()))
        }
        Err(source) => {
            return Err(PreflightError::Inaccessible {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let limit = config.item.size_limit;
    if size > limit {
        return Err(PreflightError::FileSize {
            path: path.to_path_buf(),
            size,
            limit,
        });
    }

    Ok(stage)
}
