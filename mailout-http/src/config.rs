//! Submission endpoint configuration

use mailout_delivery::RateLimitConfig;
use serde::{Deserialize, Serialize};

/// Configuration for the HTTP listener and its single endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to bind
    ///
    /// Common values:
    /// - `[::]:2015` (IPv6 any address)
    /// - `127.0.0.1:2015` (localhost only)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Path of the submission endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Admission control in front of the worker queue
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Largest accepted form body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Seconds a request may take, including waiting for queue space
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_listen_address() -> String {
    "[::]:2015".to_string()
}

fn default_endpoint() -> String {
    "/mailout".to_string()
}

const fn default_max_body_bytes() -> usize {
    64 * 1024
}

const fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            endpoint: default_endpoint(),
            rate_limit: RateLimitConfig::default(),
            max_body_bytes: default_max_body_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}
