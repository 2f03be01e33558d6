//! Turning form submissions into mail and getting it onto the wire
//!
//! This crate provides:
//! - A token bucket [`RateLimiter`] used as the admission gate
//! - PGP key loading and the per-recipient [`EncryptionEngine`]
//! - Text and HTML template renderers
//! - The [`MessageComposer`] fan-out from one submission to its messages
//! - A single-owner [`SessionWorker`] holding the SMTP connection and its
//!   idle lifecycle, restarted by a bounded [`Supervisor`]

mod composer;
mod encryption;
mod error;
mod keys;
mod message;
mod rate_limiter;
mod settings;
mod submission;
mod supervisor;
pub mod template;
pub mod transport;
mod worker;

pub use composer::MessageComposer;
pub use encryption::{EncryptedBody, EncryptionEngine, PGP_END, PGP_START, PLACEHOLDER_BODY};
pub use error::{
    DeliveryError, EncryptionError, KeyError, MessageError, RenderError, TransportError,
    WorkerError,
};
pub use keys::{KeyLoader, PublicKey};
pub use message::{ContentKind, MessageBody, OutboundMessage, Sender};
pub use rate_limiter::{Admission, RateLimitConfig, RateLimiter};
pub use settings::{DeliveryConfig, MailSettings, SmtpConfig, SmtpSettings, WorkerConfig};
pub use submission::{RequestInfo, Submission};
pub use supervisor::{Supervisor, SupervisorConfig};
pub use worker::SessionWorker;
