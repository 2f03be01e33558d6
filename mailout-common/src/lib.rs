//! Shared plumbing for the mailout gateway: logging, error types, address
//! validation, buffer pooling and the on-disk activity log.

pub mod address;
pub mod bufpool;
pub mod env;
pub mod error;
pub mod logging;
pub mod maillog;

pub use tracing;

/// Lifecycle signal broadcast from the composition root to every service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
