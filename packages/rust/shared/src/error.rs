//! Error types for stixkit.
//!
//! Library crates use [`StixKitError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Per-object decode failures are not errors of the enclosing operation;
//! they are reported as [`crate::ObjectParseError`] and counted.

use std::path::PathBuf;

/// Top-level error type for all stixkit operations.
#[derive(Debug, thiserror::Error)]
pub enum StixKitError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during download.
    #[error("network error: {0}")]
    Network(String),

    /// Input bundle is missing or is not valid JSON. Fatal for the command.
    #[error("failed to load {path:?}: {message}")]
    Load { path: PathBuf, message: String },

    /// Malformed structure part way through a streamed bundle.
    #[error("stream error in {path:?}: {message}")]
    Stream { path: PathBuf, message: String },

    /// One group's output bundle could not be assembled or serialized.
    #[error("failed to build bundle for {group}: {message}")]
    BundleBuild { group: String, message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad URL, unexpected document shape, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, StixKitError>;

impl StixKitError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a load error for the given input path.
    pub fn load(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Load {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a stream error for the given input path.
    pub fn stream(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Stream {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a bundle build error for the named group.
    pub fn bundle_build(group: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::BundleBuild {
            group: group.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
