// src/domain/topic.rs

//! Topic identity.
//!
//! A [`Topic`] names one logical class of message as a `(namespace, subject)`
//! pair. It is the registry key, the unit of type binding, and (formatted as
//! `namespace.subject`) the token carried on the wire by every transport.
//!
//! The separator is reserved: neither half may contain it, and neither may a
//! recipient token, client name or group name. That keeps every composed
//! address (`ns.subj`, `ns.subj.recipient`) unambiguous to split.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ProtonError, Result};

/// Reserved separator used in every wire encoding.
pub const SEPARATOR: char = '.';

/// Immutable `(namespace, subject)` identity of a message class.
///
/// Equality and hashing are structural.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Topic {
    // ---
    namespace: String,
    subject: String,
}

impl Topic {
    // ---
    /// Create a topic, rejecting the reserved separator in either half.
    pub fn new(namespace: impl Into<String>, subject: impl Into<String>) -> Result<Self> {
        // ---
        let namespace = namespace.into();
        let subject = subject.into();
        validate(&namespace, &subject)?;
        Ok(Self { namespace, subject })
    }

    /// Parse the `namespace.subject` wire form.
    ///
    /// # Errors
    ///
    /// [`ProtonError::MalformedTopic`] unless the token splits into exactly
    /// two parts.
    pub fn parse(token: &str) -> Result<Self> {
        // ---
        let mut parts = token.split(SEPARATOR);

        match (parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(subject), None) => Ok(Self {
                namespace: namespace.to_string(),
                subject: subject.to_string(),
            }),
            _ => Err(ProtonError::MalformedTopic(token.to_string())),
        }
    }

    /// Render the `namespace.subject` wire form.
    pub fn format(&self) -> String {
        format!("{}{SEPARATOR}{}", self.namespace, self.subject)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.namespace, self.subject)
    }
}

impl FromStr for Topic {
    type Err = ProtonError;

    fn from_str(s: &str) -> Result<Self> {
        Topic::parse(s)
    }
}

/// Check a `(namespace, subject)` pair for the reserved separator.
pub fn validate(namespace: &str, subject: &str) -> Result<()> {
    // ---
    if namespace.contains(SEPARATOR) || subject.contains(SEPARATOR) {
        return Err(ProtonError::InvalidTopic(format!(
            "{namespace:?}/{subject:?} cannot contain `{SEPARATOR}`"
        )));
    }
    Ok(())
}

/// Check a recipient token (client or group name) for use on the wire.
pub fn validate_recipient(recipient: &str) -> Result<()> {
    // ---
    if recipient.is_empty() {
        return Err(ProtonError::InvalidRecipient(
            "recipient cannot be empty".into(),
        ));
    }
    if recipient.contains(SEPARATOR) {
        return Err(ProtonError::InvalidRecipient(format!(
            "{recipient:?} cannot contain `{SEPARATOR}`"
        )));
    }
    Ok(())
}
