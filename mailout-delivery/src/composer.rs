//! Fan-out from one submission to the messages it produces.
//!
//! Every PGP-keyed recipient gets a message of its own, encrypted for its
//! key. All remaining recipients share one plaintext message. The order of
//! the keyed messages is unspecified.

use std::sync::Arc;

use mailout_common::{address::RecipientList, bufpool::BufferPool, maillog::MailLog, tracing};

use crate::{
    encryption::EncryptionEngine,
    message::{MessageBody, OutboundMessage, Sender},
    settings::MailSettings,
    submission::Submission,
};

/// Builds the outbound messages for a submission.
#[derive(Debug)]
pub struct MessageComposer {
    settings: Arc<MailSettings>,
    engine: EncryptionEngine,
    buffers: BufferPool,
    maillog: Arc<MailLog>,
}

impl MessageComposer {
    pub fn new(settings: Arc<MailSettings>, maillog: Arc<MailLog>) -> Self {
        let engine = EncryptionEngine::new(settings.attachment_name.clone());
        Self {
            settings,
            engine,
            buffers: BufferPool::new(),
            maillog,
        }
    }

    pub fn settings(&self) -> &MailSettings {
        &self.settings
    }

    /// Compose every message for `submission`.
    ///
    /// Produces [`MailSettings::message_count`] messages unless encrypting
    /// for a recipient fails, in which case that recipient's message is
    /// logged and left out. Template errors are logged and never fatal.
    pub fn build(&self, submission: &Submission) -> Vec<OutboundMessage> {
        let settings = &*self.settings;
        let mut messages = Vec::with_capacity(settings.message_count());
        let context = submission.template_context();

        let subject = settings.subject.render_string(&context).unwrap_or_else(|e| {
            self.maillog.error(format_args!("Subject template error: {e}"));
            String::new()
        });

        let mut body = self.buffers.get();
        if let Err(e) = settings.body.render(&mut *body, &context) {
            self.maillog.error(format_args!("Body template error: {e}"));
        }

        let from = resolve_sender(settings, submission);

        for (address, key) in &settings.pgp_keys {
            match self.engine.encrypt(&body, key) {
                Ok(encrypted) => messages.push(OutboundMessage {
                    from: from.clone(),
                    to: vec![address.clone()],
                    cc: Vec::new(),
                    bcc: Vec::new(),
                    subject: subject.clone(),
                    body: MessageBody::Encrypted(encrypted),
                }),
                Err(e) => self.maillog.error(format_args!(
                    "Encryption for {address} with key {} failed: {e}",
                    key.reference()
                )),
            }
        }

        if settings.has_plain_recipients() {
            let collect = |list: &RecipientList| {
                list.iter().map(ToString::to_string).collect::<Vec<_>>()
            };

            messages.push(OutboundMessage {
                from,
                to: collect(&settings.to),
                cc: collect(&settings.cc),
                bcc: collect(&settings.bcc),
                subject,
                body: MessageBody::Rendered {
                    kind: settings.body.content_kind(),
                    text: String::from_utf8_lossy(&body).into_owned(),
                },
            });
        }

        tracing::debug!(
            composed = messages.len(),
            expected = settings.message_count(),
            "Composed messages for submission"
        );

        messages
    }
}

/// Pick the `From` header.
///
/// The configured sender wins over the submitter. A name is only used
/// together with the address it belongs to.
fn resolve_sender(settings: &MailSettings, submission: &Submission) -> Sender {
    if let Some(email) = &settings.from_email {
        return Sender {
            email: email.clone(),
            name: settings.from_name.clone(),
        };
    }

    let name = submission.name();
    Sender {
        email: submission.email().to_string(),
        name: (!name.is_empty()).then(|| name.to_string()),
    }
}
