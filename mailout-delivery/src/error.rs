//! Typed errors for composition and delivery.
//!
//! Startup failures (`KeyError`, template parse errors surfaced as
//! `RenderError`, the startup SMTP ping) are fatal. Everything raised while a
//! submission is being processed is logged and the affected message dropped.

use std::path::PathBuf;

use mailout_common::error::ConfigError;
use thiserror::Error;

/// Top-level error returned while building [`crate::MailSettings`].
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("Template error: {0}")]
    Render(#[from] RenderError),

    #[error("SMTP server unreachable: {0}")]
    Transport(#[from] TransportError),
}

/// Errors raised while loading a recipient's public key.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Cannot create HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The key server could not be reached.
    #[error("Failed to fetch key from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The key server answered with something other than 200.
    #[error("Failed to fetch key from {url}: HTTP status {status}")]
    HttpStatus { url: String, status: u16 },

    /// A local key file is missing or empty.
    #[error("Key file {0:?} not found")]
    NotFound(PathBuf),

    #[error("Cannot read key file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The resource is not an armored public key.
    #[error("Cannot read public key from {reference}: {reason}")]
    Parse { reference: String, reason: String },

    /// The resource carries secret key material.
    #[error("PrivateKey found in {0}. Not allowed")]
    PrivateKey(String),
}

/// Encrypting a body for one recipient failed.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("PGP encryption failed: {0}")]
    Pgp(#[from] pgp::errors::Error),
}

/// Template parsing or rendering failed.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{0}")]
    Template(#[from] tera::Error),

    /// Body templates must end in `.txt` or `.html`.
    #[error("Unsupported template extension for {0:?}, expected .txt or .html")]
    UnsupportedExtension(PathBuf),

    /// The template file is missing or empty.
    #[error("Template file {0:?} not found")]
    NotFound(PathBuf),

    #[error("Cannot read template {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Building the RFC 5322 form of an outbound message failed.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Invalid message: {0}")]
    Email(#[from] lettre::error::Error),

    #[error("Invalid content type: {0}")]
    ContentType(#[from] lettre::message::header::ContentTypeErr),
}

/// Errors from the SMTP transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("{0}")]
    Message(#[from] MessageError),
}

impl TransportError {
    /// Returns `true` if the server rejected the transaction with a 5xx reply.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Smtp(e) if e.is_permanent())
    }

    /// Returns `true` if the failure happened before any SMTP reply was read.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Smtp(e) if !e.is_response())
    }
}

/// Terminal outcomes of the supervisor.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker faulted more often than allowed.
    #[error("Session worker crashed {0} times, giving up")]
    RestartLimit(u32),

    /// The worker task was cancelled.
    #[error("Session worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
