//! Activity and error log written to operator-configured directories.
//!
//! The activity log keeps one file per outbound message, written before the
//! message is handed to SMTP, so the audit trail does not depend on the
//! network. The error log is a single append-only file per process start.
//! Both directories are optional; a missing directory turns the matching half
//! of the logger into a no-op.

use std::{
    fmt::Display,
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Where the activity and error logs live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailLogConfig {
    /// Directory receiving one file per outbound message
    #[serde(default)]
    pub mail_dir: Option<PathBuf>,

    /// Directory receiving the error log file
    #[serde(default)]
    pub error_dir: Option<PathBuf>,
}

/// Activity and error logger.
#[derive(Debug, Default)]
pub struct MailLog {
    mail_dir: Option<PathBuf>,
    hosts: String,
    error_file: Option<PathBuf>,
    errors: Option<Mutex<File>>,
}

impl MailLog {
    /// A logger that writes nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Create the configured directories and open the error log.
    ///
    /// `hosts` are the server names this gateway answers for; they become part
    /// of every file name.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or the error log file cannot be created.
    pub fn init<S: AsRef<str>>(config: &MailLogConfig, hosts: &[S]) -> Result<Self, ConfigError> {
        let hosts = hosts
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("_");

        for dir in [&config.mail_dir, &config.error_dir].into_iter().flatten() {
            create_dir(dir)?;
        }

        let (error_file, errors) = match &config.error_dir {
            Some(dir) => {
                let path = dir.join(format!("errors_{hosts}_{}.log", unix_secs()));
                let file = open_private(&path, OpenMode::Append)?;
                (Some(path), Some(Mutex::new(file)))
            }
            None => (None, None),
        };

        Ok(Self {
            mail_dir: config.mail_dir.clone(),
            hosts,
            error_file,
            errors,
        })
    }

    /// Path of the error log file, if one is configured.
    pub fn error_file(&self) -> Option<&Path> {
        self.error_file.as_deref()
    }

    /// Write one message into its own activity log file.
    ///
    /// Failures are reported to the error log and otherwise swallowed.
    pub fn record(&self, message: &[u8]) {
        let Some(dir) = &self.mail_dir else {
            return;
        };

        let stem = format!("mail_{}_{}", self.hosts, unix_nanos());
        if let Err(e) = write_new(dir, &stem, message) {
            self.error(format_args!(
                "failed to create {} with error: {e}",
                dir.join(format!("{stem}.txt")).display()
            ));
        }
    }

    /// Append a line to the error log.
    pub fn error(&self, message: impl Display) {
        tracing::error!("{message}");

        let Some(errors) = &self.errors else {
            return;
        };

        let mut file = errors.lock();
        let _ = writeln!(
            file,
            "{} {message}",
            chrono::Utc::now().format("%Y/%m/%d %H:%M:%S")
        );
    }
}

fn create_dir(dir: &Path) -> Result<(), ConfigError> {
    if dir.is_dir() {
        return Ok(());
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }

    builder.create(dir).map_err(|source| ConfigError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

/// Attempts at finding a free activity file name after a timestamp clash.
const MAX_NAME_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenMode {
    /// Fail if the file exists
    New,
    /// Keep existing content and write at the end
    Append,
}

/// Write `message` to a fresh `<stem>.txt`, falling back to `<stem>_<n>.txt`
/// when that name is taken. Existing files are never overwritten.
fn write_new(dir: &Path, stem: &str, message: &[u8]) -> std::io::Result<PathBuf> {
    let mut attempt = 0;
    loop {
        let path = if attempt == 0 {
            dir.join(format!("{stem}.txt"))
        } else {
            dir.join(format!("{stem}_{attempt}.txt"))
        };

        match open_private(&path, OpenMode::New) {
            Ok(mut file) => {
                file.write_all(message)?;
                file.flush()?;
                return Ok(path);
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::AlreadyExists
                    && attempt + 1 < MAX_NAME_ATTEMPTS =>
            {
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn open_private(path: &Path, mode: OpenMode) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    match mode {
        OpenMode::New => options.write(true).create_new(true),
        OpenMode::Append => options.append(true).create(true),
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}
