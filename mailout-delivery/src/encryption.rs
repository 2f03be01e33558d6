//! Per-recipient PGP encryption of rendered bodies.
//!
//! The encrypted payload travels as an attachment whose content is the
//! base64 ciphertext wrapped in fixed start and end markers, next to a short
//! placeholder text body.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use pgp::{Message, crypto::sym::SymmetricKeyAlgorithm, ser::Serialize, types::PublicKeyTrait};

use crate::{error::EncryptionError, keys::PublicKey};

/// Text body sent next to the encrypted attachment.
pub const PLACEHOLDER_BODY: &str =
    "This should be an OpenPGP/MIME encrypted message (RFC 4880 and 3156)";

/// Start marker of the attachment payload.
pub const PGP_START: &str = "-----BEGIN PGP SIGNATURE-----\n\n";

/// End marker of the attachment payload.
pub const PGP_END: &str = "\n-----END PGP SIGNATURE-----";

/// An encrypted body ready to be attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBody {
    pub attachment_name: String,
    /// Markers plus base64 ciphertext
    pub armored: String,
}

impl EncryptedBody {
    /// The text body shown by clients that do not open the attachment.
    pub const fn placeholder(&self) -> &'static str {
        PLACEHOLDER_BODY
    }

    /// The base64 ciphertext between the markers.
    pub fn ciphertext(&self) -> &str {
        self.armored
            .strip_prefix(PGP_START)
            .and_then(|rest| rest.strip_suffix(PGP_END))
            .unwrap_or_default()
    }
}

/// Encrypts one body for one public key.
#[derive(Debug, Clone)]
pub struct EncryptionEngine {
    attachment_name: String,
}

impl EncryptionEngine {
    #[must_use]
    pub fn new(attachment_name: impl Into<String>) -> Self {
        Self {
            attachment_name: attachment_name.into(),
        }
    }

    pub fn attachment_name(&self) -> &str {
        &self.attachment_name
    }

    /// Encrypt `body` for `key`.
    ///
    /// The first encryption-capable subkey is used when the key has one,
    /// otherwise the primary key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be used for encryption or the
    /// ciphertext cannot be serialized.
    pub fn encrypt(&self, body: &[u8], key: &PublicKey) -> Result<EncryptedBody, EncryptionError> {
        let message = Message::new_literal_bytes("", body);
        let mut rng = rand::thread_rng();
        let signed = key.signed();

        let encrypted = match signed
            .public_subkeys
            .iter()
            .find(|subkey| subkey.is_encryption_key())
        {
            Some(subkey) => {
                message.encrypt_to_keys_seipdv1(&mut rng, SymmetricKeyAlgorithm::AES128, &[subkey])?
            }
            None => {
                message.encrypt_to_keys_seipdv1(&mut rng, SymmetricKeyAlgorithm::AES128, &[signed])?
            }
        };

        let ciphertext = BASE64.encode(encrypted.to_bytes()?);

        let mut armored =
            String::with_capacity(PGP_START.len() + ciphertext.len() + PGP_END.len());
        armored.push_str(PGP_START);
        armored.push_str(&ciphertext);
        armored.push_str(PGP_END);

        Ok(EncryptedBody {
            attachment_name: self.attachment_name.clone(),
            armored,
        })
    }
}
