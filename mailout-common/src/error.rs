//! Error types shared across the mailout crates.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors raised while loading configuration at startup.
///
/// Every variant is fatal: the gateway refuses to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A recipient or sender address failed validation.
    #[error("Incorrect email address found in: {0:?}")]
    InvalidAddress(String),

    /// The PGP address/key list does not pair up.
    #[error("Imbalanced PGP email addresses and keys: {0:?}")]
    ImbalancedKeys(Vec<String>),

    /// A configuration value is invalid.
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// A required file does not exist or is empty.
    #[error("File {0:?} not found")]
    FileNotFound(PathBuf),

    /// A log directory could not be created.
    #[error("Cannot create directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Generic I/O error while reading configuration resources.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
