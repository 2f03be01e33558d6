//! Shared helpers for the delivery integration tests
#![allow(dead_code)] // Not every test binary uses every helper

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use lettre::address::{AddressError, Envelope};
use mailout_common::{
    address::RecipientList,
    maillog::{MailLog, MailLogConfig},
};
use mailout_delivery::{
    DeliveryConfig, KeyLoader, MailSettings, MessageError, RequestInfo, SmtpConfig, Submission,
    TransportError, WorkerConfig,
    transport::{Session, Transport},
};
use parking_lot::Mutex;
use tempfile::TempDir;

pub fn fixture(name: &str) -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join(name)
        .to_string_lossy()
        .to_string()
}

/// A config with a plain-text body template written into `dir`.
pub fn config(dir: &Path) -> DeliveryConfig {
    let body = dir.join("body.txt");
    std::fs::write(&body, "Hello from {{ name }}\n\n{{ form.message | default(value=\"\") }}")
        .unwrap();

    DeliveryConfig {
        smtp: SmtpConfig {
            ping_on_startup: false,
            ..SmtpConfig::default()
        },
        from_email: None,
        from_name: None,
        to: RecipientList::new(["a@example.com"]).unwrap(),
        cc: RecipientList::default(),
        bcc: RecipientList::default(),
        pgp_keys: vec![],
        attachment_name: "encrypted.gpg".to_string(),
        subject: "Email from {{ name }}".to_string(),
        body,
        worker: WorkerConfig::default(),
    }
}

/// Load settings from [`config`] after applying `customize`.
pub async fn settings(customize: impl FnOnce(&mut DeliveryConfig, &Path)) -> (Arc<MailSettings>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    customize(&mut config, dir.path());

    let settings = MailSettings::load(&config, &KeyLoader::new().unwrap())
        .await
        .unwrap();
    (Arc::new(settings), dir)
}

pub fn submission(fields: &[(&str, &str)]) -> Submission {
    Submission::new(
        fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
        RequestInfo {
            remote_addr: "192.0.2.10:52000".to_string(),
            user_agent: "test-agent".to_string(),
            host: "forms.example.com".to_string(),
            path: "/mailout".to_string(),
        },
    )
}

/// Activity and error log under a fresh temporary directory.
pub fn maillog() -> (Arc<MailLog>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let log = MailLog::init(
        &MailLogConfig {
            mail_dir: Some(dir.path().join("mail")),
            error_dir: Some(dir.path().join("errors")),
        },
        &["forms.example.com"],
    )
    .unwrap();
    (Arc::new(log), dir)
}

pub fn mail_files(dir: &TempDir) -> Vec<PathBuf> {
    let mut files = std::fs::read_dir(dir.path().join("mail"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect::<Vec<_>>();
    files.sort();
    files
}

pub fn error_log(log: &MailLog) -> String {
    std::fs::read_to_string(log.error_file().unwrap()).unwrap()
}

/// One transaction seen by a [`FakeTransport`] session.
#[derive(Debug, Clone)]
pub struct Sent {
    pub session: usize,
    pub recipients: Vec<String>,
    pub email: String,
}

#[derive(Debug, Default)]
struct Shared {
    dials: AtomicUsize,
    closes: AtomicUsize,
    fail_dials: AtomicUsize,
    panic_dials: AtomicUsize,
    fail_sends: AtomicBool,
    break_on_failure: AtomicBool,
    sent: Mutex<Vec<Sent>>,
}

/// In-memory transport that counts dials and closes.
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    shared: Arc<Shared>,
}

impl FakeTransport {
    /// Fail the next `count` dials.
    pub fn fail_next_dials(&self, count: usize) {
        self.shared.fail_dials.store(count, Ordering::SeqCst);
    }

    /// Panic on the next `count` dials.
    pub fn panic_next_dials(&self, count: usize) {
        self.shared.panic_dials.store(count, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make a failed send tear the session down, as lettre does.
    pub fn break_on_failure(&self, broken: bool) {
        self.shared.break_on_failure.store(broken, Ordering::SeqCst);
    }

    pub fn dials(&self) -> usize {
        self.shared.dials.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.shared.sent.lock().clone()
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Transport for FakeTransport {
    type Session = FakeSession;

    async fn dial(&self) -> Result<FakeSession, TransportError> {
        let id = self.shared.dials.fetch_add(1, Ordering::SeqCst) + 1;

        assert!(!take_one(&self.shared.panic_dials), "injected dial panic");

        if take_one(&self.shared.fail_dials) {
            return Err(MessageError::Address(AddressError::InvalidDomain).into());
        }

        Ok(FakeSession {
            id,
            broken: false,
            shared: Arc::clone(&self.shared),
        })
    }
}

#[derive(Debug)]
pub struct FakeSession {
    id: usize,
    broken: bool,
    shared: Arc<Shared>,
}

#[async_trait]
impl Session for FakeSession {
    async fn send(&mut self, envelope: &Envelope, email: &[u8]) -> Result<(), TransportError> {
        if self.broken || self.shared.fail_sends.load(Ordering::SeqCst) {
            self.broken |= self.shared.break_on_failure.load(Ordering::SeqCst);
            return Err(MessageError::Address(AddressError::InvalidUser).into());
        }

        self.shared.sent.lock().push(Sent {
            session: self.id,
            recipients: envelope.to().iter().map(ToString::to_string).collect(),
            email: String::from_utf8_lossy(email).into_owned(),
        });
        Ok(())
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    async fn close(&mut self) {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
    }
}
