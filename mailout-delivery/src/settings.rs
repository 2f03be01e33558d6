//! Delivery configuration and the immutable settings built from it.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use mailout_common::{
    address::{RecipientList, is_valid_email},
    env,
    error::ConfigError,
    tracing,
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    error::DeliveryError,
    keys::{KeyLoader, PublicKey},
    template::{self, Renderer, TextTemplate},
};

/// SMTP server section of the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Server host, or `ENV:NAME`
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port as a number or a string, `ENV:NAME` allowed
    #[serde(default = "default_port", deserialize_with = "deserialize_port")]
    pub port: String,

    /// PLAIN auth user, `ENV:NAME` allowed. Empty disables authentication.
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Skip certificate verification and attempt STARTTLS on any port
    #[serde(default)]
    pub skip_tls_verify: bool,

    /// Connect and command timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Dial the server once before accepting submissions
    #[serde(default = "default_true")]
    pub ping_on_startup: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            skip_tls_verify: false,
            timeout_secs: default_timeout_secs(),
            ping_on_startup: true,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> String {
    "1025".to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}

fn deserialize_port<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u16),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Number(port) => port.to_string(),
        Raw::Text(port) => port,
    })
}

/// Session worker and supervisor tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Seconds an open SMTP session may sit unused before it is closed
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Submissions that may wait for the worker before handlers block
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Worker crashes tolerated before the gateway gives up
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Delay before the first restart, doubled on every further one
    #[serde(default = "default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            queue_size: default_queue_size(),
            max_restarts: default_max_restarts(),
            restart_backoff_ms: default_restart_backoff_ms(),
        }
    }
}

const fn default_idle_timeout_secs() -> u64 {
    30
}

const fn default_queue_size() -> usize {
    32
}

const fn default_max_restarts() -> u32 {
    10
}

const fn default_restart_backoff_ms() -> u64 {
    100
}

/// The delivery section of the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub smtp: SmtpConfig,

    #[serde(default)]
    pub from_email: Option<String>,

    #[serde(default)]
    pub from_name: Option<String>,

    #[serde(default)]
    pub to: RecipientList,

    #[serde(default)]
    pub cc: RecipientList,

    #[serde(default)]
    pub bcc: RecipientList,

    /// Flat list of `address, key reference` pairs
    #[serde(default)]
    pub pgp_keys: Vec<String>,

    /// File name of the encrypted attachment
    #[serde(default = "default_attachment_name")]
    pub attachment_name: String,

    /// Subject template
    #[serde(default)]
    pub subject: String,

    /// Body template, `.txt` or `.html`
    pub body: PathBuf,

    #[serde(default)]
    pub worker: WorkerConfig,
}

fn default_attachment_name() -> String {
    "encrypted.gpg".to_string()
}

/// Resolved SMTP connection parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub skip_tls_verify: bool,
    pub timeout: Duration,
}

impl SmtpSettings {
    /// Resolve `ENV:` references and validate the port.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is not a number between 1 and 65535.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, ConfigError> {
        let port = env::resolve(&config.port);
        let port = port
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "smtp.port",
                reason: format!("{port:?} must be between 1-65535"),
            })?;

        let non_empty = |value: String| (!value.is_empty()).then_some(value);

        Ok(Self {
            host: env::resolve(&config.host),
            port,
            username: non_empty(env::resolve(&config.username)),
            password: non_empty(env::resolve(&config.password)),
            skip_tls_verify: config.skip_tls_verify,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

/// Everything needed to compose messages, fixed at startup.
#[derive(Debug)]
pub struct MailSettings {
    pub smtp: SmtpSettings,
    pub from_email: Option<String>,
    pub from_name: Option<String>,
    pub to: RecipientList,
    pub cc: RecipientList,
    pub bcc: RecipientList,
    pub pgp_keys: HashMap<String, PublicKey>,
    pub attachment_name: String,
    pub subject: TextTemplate,
    pub body: Box<dyn Renderer>,
    message_count: usize,
}

impl MailSettings {
    /// Validate the configuration, load templates and keys.
    ///
    /// Addresses that have a PGP key are removed from `to`, `cc` and `bcc`.
    ///
    /// # Errors
    ///
    /// Any invalid value, unreadable template or unusable key is an error.
    pub async fn load(config: &DeliveryConfig, loader: &KeyLoader) -> Result<Self, DeliveryError> {
        let smtp = SmtpSettings::from_config(&config.smtp)?;

        let from_email = non_blank(config.from_email.as_deref());
        if let Some(from) = &from_email
            && !is_valid_email(from)
        {
            return Err(ConfigError::InvalidAddress(from.clone()).into());
        }

        let subject = TextTemplate::parse(&config.subject)?;
        let body = template::load_body(&config.body)?;

        let mut to = config.to.clone();
        let mut cc = config.cc.clone();
        let mut bcc = config.bcc.clone();

        let mut pgp_keys = HashMap::new();
        for (address, reference) in pair_keys(&config.pgp_keys)? {
            let key = loader.load(reference).await?;
            for list in [&mut to, &mut cc, &mut bcc] {
                list.remove(address);
            }
            pgp_keys.insert(address.to_string(), key);
        }

        let message_count =
            pgp_keys.len() + usize::from(!(to.is_empty() && cc.is_empty() && bcc.is_empty()));

        tracing::info!(
            pgp_recipients = pgp_keys.len(),
            to = %to,
            cc = %cc,
            bcc = %bcc,
            message_count,
            "Loaded delivery settings"
        );

        Ok(Self {
            smtp,
            from_email,
            from_name: non_blank(config.from_name.as_deref()),
            to,
            cc,
            bcc,
            pgp_keys,
            attachment_name: config.attachment_name.clone(),
            subject,
            body,
            message_count,
        })
    }

    /// Number of messages every submission turns into.
    pub const fn message_count(&self) -> usize {
        self.message_count
    }

    /// Whether any recipient without a PGP key remains.
    pub fn has_plain_recipients(&self) -> bool {
        !(self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty())
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

/// Split the flat `address, reference, ...` list into validated pairs.
fn pair_keys(flat: &[String]) -> Result<Vec<(&str, &str)>, ConfigError> {
    if flat.len() % 2 != 0 {
        return Err(ConfigError::ImbalancedKeys(flat.to_vec()));
    }

    flat.chunks_exact(2)
        .map(|pair| {
            let address = pair[0].trim();
            if is_valid_email(address) {
                Ok((address, pair[1].trim()))
            } else {
                Err(ConfigError::InvalidAddress(address.to_string()))
            }
        })
        .collect()
}
