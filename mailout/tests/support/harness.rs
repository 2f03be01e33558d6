//! End-to-end test harness for the mailout gateway
//!
//! Starts a complete gateway (HTTP endpoint, session worker, supervisor)
//! from a RON configuration pointed at a [`MockSmtpServer`], then drives it
//! with real HTTP requests.
//!
//! # Example
//!
//! ```no_run
//! use support::harness::E2ETestHarness;
//!
//! #[tokio::test]
//! async fn test_delivery() {
//!     let harness = E2ETestHarness::builder().build().await.unwrap();
//!
//!     let status = harness.post(&[("email", "ken@x.com")]).await.unwrap().0;
//!     assert_eq!(status, 200);
//!
//!     harness.wait_for_messages(1).await.unwrap();
//!     harness.shutdown().await.unwrap();
//! }
//! ```

use std::{net::SocketAddr, path::Path, time::Duration};

use mailout::controller::Mailout;
use mailout_common::Signal;
use tempfile::TempDir;
use tokio::{sync::broadcast, task::JoinHandle, time::timeout};

use super::mock_server::MockSmtpServer;

pub const BODY_TEMPLATE: &str = "Hello from {{ name }}\n\n{{ form.message | default(value=\"\") }}\n";

/// Path of a PGP fixture shared with the delivery crate's tests
pub fn key_fixture(name: &str) -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../mailout-delivery/testdata")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

/// A running gateway plus the mock relay it delivers to
pub struct E2ETestHarness {
    addr: SocketAddr,
    mock_server: MockSmtpServer,
    handle: JoinHandle<anyhow::Result<()>>,
    shutdown_tx: broadcast::Sender<Signal>,
    client: reqwest::Client,
    dir: TempDir,
}

impl E2ETestHarness {
    #[must_use]
    pub fn builder() -> E2ETestHarnessBuilder {
        E2ETestHarnessBuilder::default()
    }

    pub const fn mock(&self) -> &MockSmtpServer {
        &self.mock_server
    }

    /// Directory holding the templates and logs of this gateway
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// POST `fields` to the endpoint, returning the status and JSON body
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent.
    pub async fn post(&self, fields: &[(&str, &str)]) -> anyhow::Result<(u16, String)> {
        let body = fields
            .iter()
            .map(|(key, value)| format!("{}={}", encode(key), encode(value)))
            .collect::<Vec<_>>()
            .join("&");

        let response = self
            .client
            .post(format!("http://{}/mailout", self.addr))
            .header("content-type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        Ok((response.status().as_u16(), response.text().await?))
    }

    /// Wait until the relay has accepted `count` messages
    ///
    /// # Errors
    ///
    /// Returns an error if the messages do not arrive within five seconds.
    pub async fn wait_for_messages(&self, count: usize) -> anyhow::Result<Vec<String>> {
        let start = tokio::time::Instant::now();

        loop {
            let messages = self.mock_server.messages().await;
            if messages.len() >= count {
                return Ok(messages);
            }

            if start.elapsed() > Duration::from_secs(5) {
                anyhow::bail!(
                    "Timeout waiting for delivery. Mock server accepted {} of {count} messages",
                    messages.len()
                );
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Signal shutdown and wait for the gateway to drain and stop, leaving
    /// the mock relay running for inspection
    ///
    /// # Errors
    ///
    /// Returns the gateway's own error, or an error if it does not stop
    /// within five seconds.
    pub async fn stop(self) -> anyhow::Result<MockSmtpServer> {
        let _ = self.shutdown_tx.send(Signal::Shutdown);

        timeout(Duration::from_secs(5), self.handle).await???;
        Ok(self.mock_server)
    }

    /// Stop the gateway and the mock relay
    ///
    /// # Errors
    ///
    /// See [`Self::stop`].
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.stop().await?.shutdown();
        Ok(())
    }
}

/// Percent-encode everything outside the unreserved set
fn encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                char::from(b).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}

/// Builder for configuring an E2E test harness
#[derive(Default)]
pub struct E2ETestHarnessBuilder {
    smtp: Vec<String>,
    delivery: Vec<String>,
    mock: Option<MockSmtpServer>,
}

impl E2ETestHarnessBuilder {
    /// Add a raw `field: value` entry to the `delivery.smtp` section
    #[must_use]
    pub fn with_smtp(mut self, entry: impl Into<String>) -> Self {
        self.smtp.push(entry.into());
        self
    }

    /// Add a raw `field: value` entry to the delivery section
    ///
    /// A `to:` entry replaces the default recipient `a@example.com`.
    #[must_use]
    pub fn with_delivery(mut self, entry: impl Into<String>) -> Self {
        self.delivery.push(entry.into());
        self
    }

    /// Deliver to a preconfigured mock server instead of the default one
    #[must_use]
    pub fn with_mock_server(mut self, mock: MockSmtpServer) -> Self {
        self.mock = Some(mock);
        self
    }

    /// RON configuration for a gateway delivering to `relay`
    fn config(&self, dir: &Path, relay: SocketAddr) -> String {
        let mut smtp = vec![
            r#"host: "127.0.0.1""#.to_string(),
            format!("port: {}", relay.port()),
            "timeout_secs: 5".to_string(),
        ];
        smtp.extend(self.smtp.iter().cloned());

        let mut delivery = vec![
            format!("smtp: ({})", smtp.join(", ")),
            format!(r#"body: "{}""#, dir.join("body.txt").display()),
            r#"subject: "Email from {{ name }}""#.to_string(),
        ];
        if !self.delivery.iter().any(|entry| entry.starts_with("to:")) {
            delivery.push(r#"to: ["a@example.com"]"#.to_string());
        }
        delivery.extend(self.delivery.iter().cloned());

        format!(
            r#"(
                hosts: ["forms.example.com"],
                maillog: (
                    mail_dir: Some("{mail}"),
                    error_dir: Some("{errors}"),
                ),
                http: (listen_address: "127.0.0.1:0"),
                delivery: ({delivery}),
            )"#,
            mail = dir.join("mail").display(),
            errors = dir.join("errors").display(),
            delivery = delivery.join(", "),
        )
    }

    /// Start the mock server (unless one was given) and the gateway
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not parse or the gateway
    /// fails to start.
    pub async fn build(mut self) -> anyhow::Result<E2ETestHarness> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("body.txt"), BODY_TEMPLATE)?;

        let mock_server = match self.mock.take() {
            Some(server) => server,
            None => MockSmtpServer::builder().build().await?,
        };

        let mailout: Mailout = ron::from_str(&self.config(dir.path(), mock_server.addr()))?;
        let gateway = mailout.init().await?;
        let addr = gateway.local_addr()?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let handle = tokio::spawn(gateway.serve(shutdown_rx));

        Ok(E2ETestHarness {
            addr,
            mock_server,
            handle,
            shutdown_tx,
            client: reqwest::Client::new(),
            dir,
        })
    }
}
