//! Test support utilities for end-to-end testing
//!
//! Runs the whole gateway in-process against a mock SMTP relay, so tests can
//! follow a submission from the HTTP POST to the bytes the relay receives.
#![allow(dead_code)] // Not every test binary uses every helper

pub mod harness;
pub mod mock_server;

pub use harness::{E2ETestHarness, key_fixture};
pub use mock_server::{MockSmtpServer, SmtpCommand};
