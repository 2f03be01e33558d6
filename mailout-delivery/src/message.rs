//! Transmit-ready messages and their RFC 5322 form.

use lettre::{
    Address, Message,
    address::Envelope,
    message::{Attachment, Mailbox, MultiPart, SinglePart, header::ContentType},
};

use crate::{encryption::EncryptedBody, error::MessageError};

/// Content type of a rendered body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Plain,
    Html,
}

impl ContentKind {
    fn header(self) -> ContentType {
        match self {
            Self::Plain => ContentType::TEXT_PLAIN,
            Self::Html => ContentType::TEXT_HTML,
        }
    }
}

/// The `From` header of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub email: String,
    pub name: Option<String>,
}

impl Sender {
    fn mailbox(&self) -> Result<Mailbox, MessageError> {
        Ok(Mailbox::new(
            self.name.clone(),
            self.email.parse::<Address>()?,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Rendered { kind: ContentKind, text: String },
    Encrypted(EncryptedBody),
}

/// One composed message, ready for the session worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub from: Sender,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: MessageBody,
}

impl OutboundMessage {
    /// Whether the body is encrypted for a single recipient.
    pub const fn is_encrypted(&self) -> bool {
        matches!(self.body, MessageBody::Encrypted(_))
    }

    /// Build the MIME message.
    ///
    /// # Errors
    ///
    /// Returns an error if an address does not parse or the message has no
    /// recipients.
    pub fn to_email(&self) -> Result<Message, MessageError> {
        let mut builder = Message::builder()
            .from(self.from.mailbox()?)
            .subject(self.subject.as_str());

        for address in &self.to {
            builder = builder.to(address.parse::<Mailbox>()?);
        }
        for address in &self.cc {
            builder = builder.cc(address.parse::<Mailbox>()?);
        }
        for address in &self.bcc {
            builder = builder.bcc(address.parse::<Mailbox>()?);
        }

        let message = match &self.body {
            MessageBody::Rendered { kind, text } => {
                builder.header(kind.header()).body(text.clone())?
            }
            MessageBody::Encrypted(encrypted) => builder.multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(encrypted.placeholder().to_string()))
                    .singlepart(
                        Attachment::new(encrypted.attachment_name.clone()).body(
                            encrypted.armored.clone(),
                            ContentType::parse("application/octet-stream")?,
                        ),
                    ),
            )?,
        };

        Ok(message)
    }

    /// SMTP envelope and RFC 5322 bytes of the message.
    ///
    /// # Errors
    ///
    /// See [`Self::to_email`].
    pub fn to_wire(&self) -> Result<(Envelope, Vec<u8>), MessageError> {
        let email = self.to_email()?;
        Ok((email.envelope().clone(), email.formatted()))
    }
}
