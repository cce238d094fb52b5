//! Application-wide error types.
//!
//! This module provides a unified error hierarchy for the crate.
//! Components use specific error types via `thiserror`, while the
//! CLI uses `anyhow` for convenient error propagation.
//!
//! # Design
//!
//! - [`Error`]: Top-level error enum
//! - Component errors ([`PreloadError`], [`XrError`], [`ConfigError`]) for
//!   detailed handling at the component boundary
//! - Media failures are never errors here: they are recorded in the state
//!   store's error log and playback continues
//!
//! # Example
//!
//! ```ignore
//! use xr_player::error::{Result, ResultExt};
//!
//! fn read_track(path: &Path) -> Result<Track> {
//!     let json = std::fs::read_to_string(path).with_context("reading track file")?;
//!     Track::from_cms_json(&json)
//! }
//! ```

use crate::config::ConfigError;
use crate::preload::PreloadError;
use crate::xr::XrError;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error.
///
/// Aggregates errors from all components for unified handling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON payload
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Track payload that cannot be played
    #[error("Invalid track: {0}")]
    InvalidTrack(String),

    /// Readiness gate rejected a request outright
    #[error("Preload error: {0}")]
    Preload(#[from] PreloadError),

    /// Mode transition rejected
    #[error("XR error: {0}")]
    Xr(#[from] XrError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an invalid track error.
    pub fn invalid_track(message: impl Into<String>) -> Self {
        Self::InvalidTrack(message.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}
