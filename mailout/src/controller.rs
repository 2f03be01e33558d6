use std::{
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use mailout_common::{
    Signal, internal, logging,
    maillog::{MailLog, MailLogConfig},
};
use mailout_delivery::{
    DeliveryConfig, KeyLoader, MailSettings, MessageComposer, RateLimiter, SessionWorker,
    Supervisor, SupervisorConfig, transport::SmtpTransport,
};
use mailout_http::{HttpConfig, MailoutServer};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};

/// The whole configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Mailout {
    /// Names this gateway answers for, used in log file names
    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(default)]
    pub maillog: MailLogConfig,

    #[serde(default)]
    pub http: HttpConfig,

    pub delivery: DeliveryConfig,
}

async fn shutdown(signal: broadcast::Sender<Signal>) -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    let mut receiver = signal.subscribe();

    signal
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl Mailout {
    /// Build every component and bind the listener, without serving yet.
    ///
    /// Configuration problems, unreadable keys or templates and an
    /// unreachable SMTP server (when `ping_on_startup` is set) all fail here.
    ///
    /// # Errors
    ///
    /// Returns the first startup failure.
    pub async fn init(self) -> anyhow::Result<Gateway> {
        let maillog = Arc::new(
            MailLog::init(&self.maillog, &self.hosts).context("Unable to create log directories")?,
        );

        let loader = KeyLoader::new()?;
        let settings = Arc::new(MailSettings::load(&self.delivery, &loader).await?);
        internal!(
            level = INFO,
            messages = settings.message_count(),
            pgp_recipients = settings.pgp_keys.len(),
            "Delivery settings loaded"
        );

        let transport = Arc::new(SmtpTransport::new(settings.smtp.clone()));
        if self.delivery.smtp.ping_on_startup {
            transport.ping().await.with_context(|| {
                format!(
                    "SMTP server {}:{} is not reachable",
                    settings.smtp.host, settings.smtp.port
                )
            })?;
        }

        let worker_config = &self.delivery.worker;
        let (queue, submissions) = mpsc::channel(worker_config.queue_size.max(1));

        let composer = Arc::new(MessageComposer::new(Arc::clone(&settings), Arc::clone(&maillog)));
        let worker = SessionWorker::new(
            transport,
            composer,
            maillog,
            Duration::from_secs(worker_config.idle_timeout_secs),
        );
        let supervisor = Supervisor::new(
            worker,
            submissions,
            SupervisorConfig::from(worker_config),
        );

        let limiter = Arc::new(RateLimiter::from_config(&self.http.rate_limit));
        let server = MailoutServer::new(&self.http, limiter, queue).await?;

        Ok(Gateway { server, supervisor })
    }

    /// Run this controller, and everything it controls
    ///
    /// # Errors
    ///
    /// This function will return an error if any component fails to
    /// initialise, or if the session worker crashes too often.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        internal!(level = INFO, "Controller running");

        let gateway = self.init().await?;
        let (shutdown_broadcast, _) = broadcast::channel(64);

        let ret = tokio::select! {
            r = gateway.serve(shutdown_broadcast.subscribe()) => {
                r
            }
            r = shutdown(shutdown_broadcast.clone()) => {
                r
            }
        };

        internal!(level = INFO, "Shutting down...");

        ret
    }
}

/// A started gateway: bound listener plus the supervised session worker.
pub struct Gateway {
    server: MailoutServer,
    supervisor: Supervisor<SmtpTransport>,
}

impl Gateway {
    /// Address the submission endpoint is listening on.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.server.local_addr()
    }

    /// Serve submissions until `shutdown` fires, then drain the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails or the session worker gives up
    /// after too many crashes.
    pub async fn serve(self, shutdown: broadcast::Receiver<Signal>) -> anyhow::Result<()> {
        let Self { server, supervisor } = self;
        let mut worker = tokio::spawn(supervisor.run());

        tokio::select! {
            served = server.serve(shutdown) => {
                served?;
                internal!(level = INFO, "Draining submission queue");
                worker.await??;
            }
            finished = &mut worker => {
                finished??;
                internal!(level = WARN, "Session worker exited while the server was running");
            }
        }

        internal!(level = INFO, "Gateway stopped");
        Ok(())
    }
}
