//! Email address validation and recipient list parsing.
//!
//! The pattern is deliberately permissive: a local part, an `@`, and a domain
//! with at least one dot. Deliverability is the SMTP server's problem.

use std::{fmt, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de};

use crate::error::ConfigError;

static EMAIL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$").ok()
});

/// Returns `true` if `email` looks like a routable address.
pub fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || email.len() > 254 {
        return false;
    }

    let Some(re) = EMAIL.as_ref() else {
        return false;
    };

    if !re.is_match(email) {
        return false;
    }

    email
        .split_once('@')
        .is_some_and(|(local, _)| local.len() <= 64)
}

/// Split a comma separated list of addresses, trimming whitespace around
/// each entry.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidAddress`] naming the whole input if any entry
/// fails validation.
pub fn split_email_addresses(input: &str) -> Result<Vec<String>, ConfigError> {
    input
        .split(',')
        .map(str::trim)
        .map(|address| {
            if is_valid_email(address) {
                Ok(address.to_string())
            } else {
                Err(ConfigError::InvalidAddress(input.to_string()))
            }
        })
        .collect()
}

/// A configured set of recipients.
///
/// Accepts either a list of addresses or a single comma separated string in
/// the configuration file. Order is preserved for header rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecipientList(Vec<String>);

impl RecipientList {
    /// Build a list, validating every entry.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] for the first invalid entry.
    pub fn new<I, S>(addresses: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        addresses
            .into_iter()
            .map(|address| {
                let address = address.as_ref().trim();
                if is_valid_email(address) {
                    Ok(address.to_string())
                } else {
                    Err(ConfigError::InvalidAddress(address.to_string()))
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.0.iter().any(|a| a.eq_ignore_ascii_case(address))
    }

    /// Drop every occurrence of `address` (case-insensitive).
    pub fn remove(&mut self, address: &str) {
        self.0.retain(|a| !a.eq_ignore_ascii_case(address));
    }
}

impl fmt::Display for RecipientList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

impl<'de> Deserialize<'de> for RecipientList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Joined(String),
            List(Vec<String>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Joined(joined) if joined.trim().is_empty() => Ok(Self::default()),
            Raw::Joined(joined) => split_email_addresses(&joined)
                .map(Self)
                .map_err(de::Error::custom),
            Raw::List(list) => Self::new(list).map_err(de::Error::custom),
        }
    }
}
