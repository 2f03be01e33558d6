//! Form submission endpoint for the mailout gateway
//!
//! A single configurable path accepts `application/x-www-form-urlencoded`
//! POSTs. Each request is checked in order and answered with a small JSON
//! body whose `code` mirrors the HTTP status:
//!
//! - **405** for any method other than POST
//! - **429** when the rate limiter has no token, with `X-Rate-Limit-*` headers
//! - **400** for a body that is not a valid form
//! - **422** when the `email` field is not a valid address
//! - **200** once the submission is queued for the session worker
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use mailout_delivery::RateLimiter;
//! use mailout_http::{HttpConfig, MailoutServer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HttpConfig::default();
//! let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
//! let (queue, _submissions) = tokio::sync::mpsc::channel(32);
//!
//! let server = MailoutServer::new(&config, limiter, queue).await?;
//! // server.serve(shutdown_receiver).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod handler;
mod reply;
mod server;

pub use config::HttpConfig;
pub use error::{HttpError, ServerError};
pub use handler::AppState;
pub use reply::Reply;
pub use server::{MailoutServer, router};
