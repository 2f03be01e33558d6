//! Admission control using the token bucket algorithm
//!
//! One bucket guards the submission endpoint for the whole process.
//!
//! # Token Bucket Algorithm
//!
//! - The bucket starts full with `capacity` tokens
//! - One token is added every `interval`, up to `capacity`
//! - Each admitted submission consumes one token
//! - With no token available the caller may wait up to `max_wait` for one;
//!   otherwise it is rejected with the time until the next token
//! - `max_wait` defaults to one refill interval; `max_wait_ms: Some(0)`
//!   rejects at once
//!
//! # Example
//!
//! ```text
//! capacity: 4, interval: 100ms
//! - 4 submissions are admitted immediately (burst)
//! - the 5th is rejected, retry after ~100ms
//! - 100ms later exactly one more is admitted
//! ```

use std::time::Duration;

use mailout_common::tracing;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Configuration for the admission gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum number of tokens (burst size)
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Milliseconds between two refilled tokens
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Milliseconds a caller may wait for a token before being rejected,
    /// one refill interval when unset
    #[serde(default)]
    pub max_wait_ms: Option<u64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            interval_ms: default_interval_ms(),
            max_wait_ms: None,
        }
    }
}

const fn default_capacity() -> u32 {
    1000
}

const fn default_interval_ms() -> u64 {
    24 * 60 * 60 * 1000
}

/// Outcome of one admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Whether the caller may proceed
    pub allowed: bool,
    /// Bucket capacity
    pub limit: u32,
    /// Whole tokens left after this attempt
    pub remaining: u32,
    /// Time until the next token, zero when one is available
    pub retry_after: Duration,
}

#[derive(Debug)]
struct TokenBucket {
    /// Current number of tokens, negative while waiters hold reservations
    tokens: f64,
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, interval: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        let interval = interval.max(Duration::from_millis(1));
        Self {
            tokens: capacity,
            capacity,
            refill_rate: 1.0 / interval.as_secs_f64(),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = elapsed.mul_add(self.refill_rate, self.tokens).min(self.capacity);
        self.last_refill = now;
    }

    fn time_until_available(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }

        let tokens_needed = 1.0 - self.tokens;
        Duration::from_secs_f64(tokens_needed / self.refill_rate)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn remaining(&self) -> u32 {
        self.tokens.max(0.0).floor() as u32
    }
}

/// Process-wide admission gate shared by every request handler
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
    limit: u32,
    max_wait: Duration,
}

impl RateLimiter {
    /// Create a limiter holding `capacity` tokens and refilling one every
    /// `interval`.
    #[must_use]
    pub fn new(capacity: u32, interval: Duration) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(capacity, interval)),
            limit: capacity.max(1),
            max_wait: Duration::ZERO,
        }
    }

    /// Allow callers to wait up to `max_wait` for a token.
    #[must_use]
    pub const fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity, Duration::from_millis(config.interval_ms))
            .with_max_wait(Duration::from_millis(
                config.max_wait_ms.unwrap_or(config.interval_ms),
            ))
    }

    /// Bucket capacity
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Try to take a token, waiting up to the configured `max_wait` for one.
    pub async fn admit(&self) -> Admission {
        let (admission, wait) = self.reserve(self.max_wait);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        admission
    }

    /// Try to take a token without waiting.
    pub fn try_admit(&self) -> Admission {
        self.reserve(Duration::ZERO).0
    }

    /// Take a token now, or reserve one that arrives within `max_wait`.
    ///
    /// Returns the admission and how long the caller must sleep before it
    /// holds the reserved token.
    fn reserve(&self, max_wait: Duration) -> (Admission, Duration) {
        let mut bucket = self.bucket.lock();
        bucket.refill();

        let wait = bucket.time_until_available();
        let allowed = wait.is_zero() || (!max_wait.is_zero() && wait <= max_wait);
        if allowed {
            bucket.tokens -= 1.0;
        }

        let admission = Admission {
            allowed,
            limit: self.limit,
            remaining: bucket.remaining(),
            retry_after: if allowed { Duration::ZERO } else { wait },
        };
        drop(bucket);

        if !allowed {
            tracing::debug!(
                wait_seconds = wait.as_secs_f64(),
                "Rate limit exceeded, rejecting submission"
            );
        }

        (admission, if allowed { wait } else { Duration::ZERO })
    }
}
