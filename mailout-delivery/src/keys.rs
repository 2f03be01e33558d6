//! Loading recipients' PGP public keys at startup.
//!
//! A key reference is either an `http(s)://` URL fetched once with a short
//! timeout or a path on local disk. Either may be written as `ENV:NAME`.
//! Keys are parsed once and shared read-only afterwards.

use std::{path::PathBuf, time::Duration};

use mailout_common::{env, tracing};
use pgp::{Deserializable, SignedPublicKey, SignedSecretKey, types::PublicKeyTrait};

use crate::error::KeyError;

/// Timeout for fetching a remote key.
const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

const PRIVATE_KEY_MARKER: &str = "PRIVATE KEY BLOCK";

/// A parsed public key that is guaranteed to carry no secret material.
#[derive(Debug, Clone)]
pub struct PublicKey {
    key: SignedPublicKey,
    reference: String,
}

impl PublicKey {
    /// Parse an ASCII-armored public key.
    ///
    /// `reference` names where the key came from and is only used in errors
    /// and logs.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::PrivateKey`] if the block contains secret key
    /// material and [`KeyError::Parse`] if it is not a valid public key.
    pub fn parse(armored: &str, reference: &str) -> Result<Self, KeyError> {
        if armored.contains(PRIVATE_KEY_MARKER) || SignedSecretKey::from_string(armored).is_ok() {
            return Err(KeyError::PrivateKey(reference.to_string()));
        }

        let parse_error = |reason: String| KeyError::Parse {
            reference: reference.to_string(),
            reason,
        };

        let (key, _headers) =
            SignedPublicKey::from_string(armored).map_err(|e| parse_error(e.to_string()))?;
        key.verify().map_err(|e| parse_error(e.to_string()))?;

        Ok(Self {
            key,
            reference: reference.to_string(),
        })
    }

    /// Where the key was loaded from.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Whether the key has a dedicated encryption subkey.
    pub fn has_encryption_subkey(&self) -> bool {
        self.key
            .public_subkeys
            .iter()
            .any(PublicKeyTrait::is_encryption_key)
    }

    pub(crate) const fn signed(&self) -> &SignedPublicKey {
        &self.key
    }
}

/// Resolves key references to parsed keys.
#[derive(Debug, Clone)]
pub struct KeyLoader {
    client: reqwest::Client,
}

impl KeyLoader {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new() -> Result<Self, KeyError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(KeyError::Client)?;

        Ok(Self::with_client(client))
    }

    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Load and parse the key behind `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be fetched or read, or if it is not
    /// a public key.
    pub async fn load(&self, reference: &str) -> Result<PublicKey, KeyError> {
        let reference = env::resolve(reference);

        let armored = if reference.starts_with("http") {
            self.fetch(&reference).await?
        } else {
            read_local(&reference)?
        };

        let key = PublicKey::parse(&armored, &reference)?;
        tracing::debug!(reference = %reference, "Loaded PGP public key");
        Ok(key)
    }

    async fn fetch(&self, url: &str) -> Result<String, KeyError> {
        let fetch_error = |source| KeyError::Fetch {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(fetch_error)?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(KeyError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(fetch_error)
    }
}

fn read_local(reference: &str) -> Result<String, KeyError> {
    let path = PathBuf::from(reference);
    if !path.is_file() {
        return Err(KeyError::NotFound(path));
    }

    let armored = std::fs::read_to_string(&path).map_err(|source| KeyError::Read {
        path: path.clone(),
        source,
    })?;

    if armored.trim().is_empty() {
        return Err(KeyError::NotFound(path));
    }

    Ok(armored)
}
