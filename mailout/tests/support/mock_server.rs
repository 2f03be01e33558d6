//! Mock SMTP server standing in for the operator's mail relay
//!
//! Speaks just enough ESMTP for lettre's client: greeting, EHLO with a
//! configurable capability list, `AUTH PLAIN`, one or more mail transactions
//! per connection and QUIT. Every command and message body is recorded,
//! tagged with the connection it arrived on.

use std::{
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

/// SMTP command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    /// `AUTH` arguments, mechanism first
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message content (after DATA), dot-stuffing left in place
    MessageContent(Vec<u8>),
    Quit,
    Other(String),
}

/// A command and the 1-based connection it arrived on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub connection: usize,
    pub command: SmtpCommand,
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Debug, Clone)]
struct MockServerConfig {
    capabilities: Vec<String>,
    auth_response: Reply,
    rcpt_to_response: Reply,
    data_end_response: Reply,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            capabilities: vec!["mock.example.com".to_string(), "SIZE 10000".to_string()],
            auth_response: Reply::new(235, "2.7.0 Authentication successful"),
            rcpt_to_response: Reply::new(250, "OK"),
            data_end_response: Reply::new(250, "OK: Message accepted"),
        }
    }
}

fn ehlo_reply(capabilities: &[String]) -> Vec<u8> {
    let mut response = String::new();
    let last = capabilities.len().saturating_sub(1);

    for (i, cap) in capabilities.iter().enumerate() {
        let separator = if i < last { '-' } else { ' ' };
        let _ = write!(&mut response, "250{separator}{cap}\r\n");
    }

    response.into_bytes()
}

/// Mock SMTP server for the end-to-end tests
pub struct MockSmtpServer {
    addr: SocketAddr,
    received: Arc<RwLock<Vec<Received>>>,
    connections: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            config: MockServerConfig::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Every command received so far, in arrival order
    pub async fn received(&self) -> Vec<Received> {
        self.received.read().await.clone()
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.received()
            .await
            .into_iter()
            .map(|received| received.command)
            .collect()
    }

    /// Message bodies accepted so far
    pub async fn messages(&self) -> Vec<String> {
        self.commands()
            .await
            .into_iter()
            .filter_map(|command| match command {
                SmtpCommand::MessageContent(content) => {
                    Some(String::from_utf8_lossy(&content).into_owned())
                }
                _ => None,
            })
            .collect()
    }

    /// Number of TCP connections accepted
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn handle_client(
        mut stream: TcpStream,
        connection: usize,
        config: Arc<MockServerConfig>,
        received: Arc<RwLock<Vec<Received>>>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        let record = |command: SmtpCommand| {
            let received = Arc::clone(&received);
            async move {
                received.write().await.push(Received {
                    connection,
                    command,
                });
            }
        };

        writer
            .write_all(&Reply::new(220, "Mock SMTP Server").to_bytes())
            .await?;
        writer.flush().await?;

        loop {
            line.clear();

            // Longer than the gateway's idle window, so the client always
            // hangs up first.
            let Ok(read) = timeout(Duration::from_secs(120), reader.read_line(&mut line)).await
            else {
                return Ok(());
            };
            if read? == 0 {
                return Ok(());
            }

            let cmd_line = line.trim();
            tracing::debug!("Mock server received: {}", cmd_line);

            let (verb, argument) = cmd_line.split_once(' ').unwrap_or((cmd_line, ""));
            let argument = argument.to_string();

            let (response, command) = match verb.to_uppercase().as_str() {
                "EHLO" => (ehlo_reply(&config.capabilities), SmtpCommand::Ehlo(argument)),
                "AUTH" => (config.auth_response.to_bytes(), SmtpCommand::Auth(argument)),
                "MAIL" => (Reply::new(250, "OK").to_bytes(), SmtpCommand::MailFrom(argument)),
                "RCPT" => (config.rcpt_to_response.to_bytes(), SmtpCommand::RcptTo(argument)),
                "RSET" | "NOOP" => (
                    Reply::new(250, "OK").to_bytes(),
                    SmtpCommand::Other(cmd_line.to_string()),
                ),
                "DATA" => (
                    Reply::new(354, "Start mail input; end with <CRLF>.<CRLF>").to_bytes(),
                    SmtpCommand::Data,
                ),
                "QUIT" => {
                    record(SmtpCommand::Quit).await;
                    writer.write_all(&Reply::new(221, "Bye").to_bytes()).await?;
                    writer.flush().await?;
                    return Ok(());
                }
                _ => (
                    Reply::new(500, "Unknown command").to_bytes(),
                    SmtpCommand::Other(cmd_line.to_string()),
                ),
            };

            let is_data = command == SmtpCommand::Data;
            record(command).await;
            writer.write_all(&response).await?;
            writer.flush().await?;

            if is_data {
                let mut content = Vec::new();
                let mut data_line = String::new();

                loop {
                    data_line.clear();
                    if reader.read_line(&mut data_line).await? == 0 {
                        return Ok(());
                    }

                    if data_line.trim_end() == "." {
                        break;
                    }

                    content.extend_from_slice(data_line.as_bytes());
                }

                record(SmtpCommand::MessageContent(content)).await;
                writer
                    .write_all(&config.data_end_response.to_bytes())
                    .await?;
                writer.flush().await?;
            }
        }
    }
}

/// Builder for configuring a `MockSmtpServer`
pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    /// Advertise `AUTH PLAIN` in the EHLO response
    #[must_use]
    pub fn with_auth(mut self) -> Self {
        self.config.capabilities.push("AUTH PLAIN".to_string());
        self
    }

    /// Set the response to `AUTH`
    #[must_use]
    pub fn with_auth_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.auth_response = Reply::new(code, message);
        self
    }

    /// Set the RCPT TO response
    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to_response = Reply::new(code, message);
        self
    }

    /// Set the response after message content (after `<CRLF>.<CRLF>`)
    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = Reply::new(code, message);
        self
    }

    /// Bind to a random local port and start accepting connections
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to a port
    pub async fn build(self) -> Result<MockSmtpServer, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let received = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let server = MockSmtpServer {
            addr,
            received: Arc::clone(&received),
            connections: Arc::clone(&connections),
            shutdown: Arc::clone(&shutdown),
        };

        tokio::spawn(async move {
            while !shutdown.load(Ordering::Relaxed) {
                // Accept with a timeout so the shutdown flag is noticed
                let Ok(Ok((stream, _peer))) =
                    timeout(Duration::from_millis(100), listener.accept()).await
                else {
                    continue;
                };

                let connection = connections.fetch_add(1, Ordering::Relaxed) + 1;
                let config = Arc::clone(&config);
                let received = Arc::clone(&received);

                tokio::spawn(async move {
                    if let Err(e) =
                        MockSmtpServer::handle_client(stream, connection, config, received).await
                    {
                        tracing::debug!("Mock server client error: {}", e);
                    }
                });
            }
        });

        Ok(server)
    }
}
