//! Error taxonomy shared by the builder and the query engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by flatdex operations
#[derive(Error, Debug)]
pub enum FlatdexError {
    /// Missing index directory, unknown alias, unknown record format
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Field not indexed, identifier absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Open, seek or read failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Unreadable source file, exhausted temp space
    #[error("Build error: {0}")]
    Build(String),

    /// Division table and data files disagree
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// Index file header failed validation
    #[error("Corrupt header in {path}: {reason}")]
    CorruptHeader { path: PathBuf, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for flatdex operations
pub type Result<T> = std::result::Result<T, FlatdexError>;

impl FlatdexError {
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        FlatdexError::Configuration(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        FlatdexError::NotFound(msg.into())
    }

    pub fn build<S: Into<String>>(msg: S) -> Self {
        FlatdexError::Build(msg.into())
    }

    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        FlatdexError::Invariant(msg.into())
    }

    pub fn corrupt_header<S: Into<String>>(path: &std::path::Path, reason: S) -> Self {
        FlatdexError::CorruptHeader {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Whether the error only disables a single field rather than the session
    pub fn is_field_local(&self) -> bool {
        matches!(self, FlatdexError::NotFound(_))
    }
}
