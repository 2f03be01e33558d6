//! SMTP connections as used by the session worker.
//!
//! [`Transport`] dials, [`Session`] sends over an open connection. The worker
//! only sees these traits, which keeps the connection lifecycle testable
//! without a network.

use async_trait::async_trait;
use lettre::{
    address::Envelope,
    transport::smtp::{
        authentication::{Credentials, Mechanism},
        client::{AsyncSmtpConnection, TlsParameters},
        extension::ClientId,
    },
};
use mailout_common::outgoing;

use crate::{error::TransportError, settings::SmtpSettings};

const SUBMISSION_PORT: u16 = 587;
const SUBMISSIONS_PORT: u16 = 465;

/// Opens connections to the mail server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Session: Session;

    /// Connect, negotiate TLS and authenticate.
    async fn dial(&self) -> Result<Self::Session, TransportError>;
}

/// One open, authenticated connection.
#[async_trait]
pub trait Session: Send + 'static {
    /// Run one mail transaction.
    async fn send(&mut self, envelope: &Envelope, email: &[u8]) -> Result<(), TransportError>;

    /// Whether the connection can no longer carry a transaction.
    ///
    /// A rejected transaction may tear the connection down; the worker then
    /// drops the session instead of reusing it.
    fn is_broken(&self) -> bool;

    /// Say goodbye and drop the connection. Never fails.
    async fn close(&mut self);
}

/// Transport backed by lettre's SMTP client.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    settings: SmtpSettings,
    hello: ClientId,
}

impl SmtpTransport {
    pub fn new(settings: SmtpSettings) -> Self {
        Self {
            settings,
            hello: ClientId::default(),
        }
    }

    pub const fn settings(&self) -> &SmtpSettings {
        &self.settings
    }

    /// Dial once and hang up, to prove the server is reachable.
    ///
    /// # Errors
    ///
    /// Returns the dial error.
    pub async fn ping(&self) -> Result<(), TransportError> {
        let mut session = self.dial().await?;
        session.close().await;
        Ok(())
    }

    fn tls_parameters(&self) -> Result<TlsParameters, TransportError> {
        Ok(TlsParameters::builder(self.settings.host.clone())
            .dangerous_accept_invalid_certs(self.settings.skip_tls_verify)
            .build()?)
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    type Session = SmtpSession;

    async fn dial(&self) -> Result<SmtpSession, TransportError> {
        let SmtpSettings {
            host,
            port,
            username,
            password,
            skip_tls_verify,
            timeout,
        } = &self.settings;

        let implicit_tls = if *port == SUBMISSIONS_PORT {
            Some(self.tls_parameters()?)
        } else {
            None
        };
        let wants_starttls = implicit_tls.is_none() && (*port == SUBMISSION_PORT || *skip_tls_verify);

        outgoing!(level = DEBUG, host = %host, port, "Dialing SMTP server");
        let mut connection = AsyncSmtpConnection::connect_tokio1(
            (host.as_str(), *port),
            Some(*timeout),
            &self.hello,
            implicit_tls,
            None,
        )
        .await?;

        if wants_starttls && connection.can_starttls() {
            connection.starttls(self.tls_parameters()?, &self.hello).await?;
            outgoing!(level = DEBUG, host = %host, "Upgraded SMTP session to TLS");
        }

        if let Some(username) = username {
            let credentials =
                Credentials::new(username.clone(), password.clone().unwrap_or_default());
            if let Err(e) = connection.auth(&[Mechanism::Plain], &credentials).await {
                connection.abort().await;
                return Err(e.into());
            }
        }

        outgoing!(level = INFO, host = %host, port, "SMTP session open");
        Ok(SmtpSession { connection })
    }
}

/// An open lettre SMTP connection.
pub struct SmtpSession {
    connection: AsyncSmtpConnection,
}

impl std::fmt::Debug for SmtpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSession")
            .field("encrypted", &self.connection.is_encrypted())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Session for SmtpSession {
    async fn send(&mut self, envelope: &Envelope, email: &[u8]) -> Result<(), TransportError> {
        let response = self.connection.send(envelope, email).await?;
        outgoing!(
            level = DEBUG,
            code = %response.code(),
            "Message accepted: {}",
            response.message().collect::<Vec<_>>().join(" ")
        );
        Ok(())
    }

    fn is_broken(&self) -> bool {
        self.connection.has_broken()
    }

    async fn close(&mut self) {
        if self.connection.quit().await.is_err() {
            self.connection.abort().await;
        }
        outgoing!(level = INFO, "SMTP session closed");
    }
}
