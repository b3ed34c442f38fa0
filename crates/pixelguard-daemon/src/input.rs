//! Task and credential file loading.
//!
//! The task file is a JSON array of `{x, y, color}` records; `color` is
//! either a bare palette code (`"E"`) or a hex string that must already be
//! an exact palette member. Loading is strict: one malformed record fails
//! the whole load, so a typo cannot silently shrink the guarded region.
//!
//! The credential file is one opaque token per line; blank lines and
//! `#`-comments are skipped. Tokens are never logged.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use pixelguard_core::palette::{self, ColorCode, PaletteError};

use crate::transport::Credential;

/// Input file errors.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse task file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task record {index}: {source}")]
    BadColor {
        index: usize,
        #[source]
        source: PaletteError,
    },

    #[error("credential file contains no usable tokens")]
    NoCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskRecord {
    x: u32,
    y: u32,
    color: String,
}

/// Load guard triples from a JSON task file.
///
/// Bounds are validated later, when the region is built against the
/// configured canvas dimensions.
///
/// # Errors
///
/// Returns [`InputError`] on read, parse, or color resolution failure.
pub fn load_tasks(path: impl AsRef<Path>) -> Result<Vec<(u32, u32, ColorCode)>, InputError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let records: Vec<TaskRecord> = serde_json::from_str(&contents)?;
    let mut triples = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let color = palette::resolve_color_input(&record.color)
            .map_err(|source| InputError::BadColor { index, source })?;
        triples.push((record.x, record.y, color));
    }

    info!(path = %path.display(), tasks = triples.len(), "loaded task file");
    Ok(triples)
}

/// Load credentials from a one-token-per-line file.
///
/// # Errors
///
/// Returns [`InputError::NoCredentials`] if no usable line remains after
/// skipping blanks and comments.
pub fn load_credentials(path: impl AsRef<Path>) -> Result<Vec<Credential>, InputError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let credentials: Vec<Credential> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .enumerate()
        .map(|(index, token)| Credential::new(format!("worker-{index}"), token))
        .collect();

    if credentials.is_empty() {
        return Err(InputError::NoCredentials);
    }

    info!(path = %path.display(), count = credentials.len(), "loaded credential file");
    Ok(credentials)
}
