// src/domain/address.rs

//! Address derivation for both wire contracts.
//!
//! ## Broker contract
//!
//! Two header exchanges, both matching with `x-match = all`:
//!
//! | exchange           | binding attributes                   |
//! |--------------------|--------------------------------------|
//! | `proton.direct`    | `recipient = <token>`, `topic = ns.subj` |
//! | `proton.broadcast` | `topic = ns.subj`                    |
//!
//! Published messages carry `x-senderName`, `x-senderID`, `recipient`
//! (empty for broadcast) and `topic` as headers; the body is the JSON payload.
//! Because several queues may bind the same `(recipient, topic)` pair, a
//! directed publish to a group token fans in to every member.
//!
//! ## Channel contract
//!
//! No broker-side matching: the address *is* the channel name,
//! `ns.subj.<recipient>` with an empty recipient for broadcast. The body is
//! [`ChannelPayload`] as JSON; topic and recipient are recovered from the
//! channel name.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::topic::{Topic, SEPARATOR};
use super::transport::Envelope;
use crate::{ProtonError, Result};

pub const DIRECT_EXCHANGE: &str = "proton.direct";
pub const BROADCAST_EXCHANGE: &str = "proton.broadcast";

pub const HEADER_MATCH: &str = "x-match";
pub const HEADER_SENDER_NAME: &str = "x-senderName";
pub const HEADER_SENDER_ID: &str = "x-senderID";
pub const HEADER_RECIPIENT: &str = "recipient";
pub const HEADER_TOPIC: &str = "topic";

/// String attributes attached to a binding or a published message.
pub type Attributes = BTreeMap<String, String>;

/// One of the two header exchanges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Exchange {
    Direct,
    Broadcast,
}

impl Exchange {
    // ---
    pub fn name(self) -> &'static str {
        match self {
            Exchange::Direct => DIRECT_EXCHANGE,
            Exchange::Broadcast => BROADCAST_EXCHANGE,
        }
    }

    /// Exchange an envelope is published to.
    pub fn for_envelope(env: &Envelope) -> Self {
        if env.is_broadcast() {
            Exchange::Broadcast
        } else {
            Exchange::Direct
        }
    }
}

/// A queue binding: every attribute must be present with an equal value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HeaderBinding {
    // ---
    pub exchange: Exchange,
    pub attributes: Attributes,
}

impl HeaderBinding {
    // ---
    /// Binding on the direct exchange for `(recipient, topic)`.
    pub fn recipient(topic: &Topic, recipient: &str) -> Self {
        // ---
        let mut attributes = Attributes::new();
        attributes.insert(HEADER_RECIPIENT.into(), recipient.into());
        attributes.insert(HEADER_TOPIC.into(), topic.format());
        Self {
            exchange: Exchange::Direct,
            attributes,
        }
    }

    /// Binding on the broadcast exchange for `topic`.
    pub fn broadcast(topic: &Topic) -> Self {
        // ---
        let mut attributes = Attributes::new();
        attributes.insert(HEADER_TOPIC.into(), topic.format());
        Self {
            exchange: Exchange::Broadcast,
            attributes,
        }
    }

    /// All-must-match test against a published message's headers.
    pub fn matches(&self, exchange: Exchange, headers: &Attributes) -> bool {
        // ---
        self.exchange == exchange
            && self
                .attributes
                .iter()
                .all(|(key, value)| headers.get(key) == Some(value))
    }
}

/// Headers attached to a published envelope.
pub fn publish_headers(env: &Envelope) -> Attributes {
    // ---
    let mut headers = Attributes::new();
    headers.insert(HEADER_SENDER_NAME.into(), env.sender_name.to_string());
    headers.insert(HEADER_SENDER_ID.into(), env.sender_id.to_string());
    headers.insert(HEADER_RECIPIENT.into(), env.recipient.to_string());
    headers.insert(HEADER_TOPIC.into(), env.topic.format());
    headers
}

/// Rebuild an envelope from received headers and body.
///
/// # Errors
///
/// [`ProtonError::MalformedTopic`] for an unparseable topic token,
/// [`ProtonError::Transport`] for a missing header or a bad sender id.
pub fn envelope_from_headers(headers: &Attributes, payload: Bytes) -> Result<Envelope> {
    // ---
    let get = |key: &str| {
        headers
            .get(key)
            .ok_or_else(|| ProtonError::Transport(format!("missing header {key}")))
    };

    let topic = Topic::parse(get(HEADER_TOPIC)?)?;
    let sender_id = get(HEADER_SENDER_ID)?;
    let sender_id = Uuid::parse_str(sender_id)
        .map_err(|e| ProtonError::Transport(format!("bad {HEADER_SENDER_ID} {sender_id:?}: {e}")))?;

    Ok(Envelope {
        sender_name: get(HEADER_SENDER_NAME)?.as_str().into(),
        sender_id,
        recipient: get(HEADER_RECIPIENT)?.as_str().into(),
        topic,
        payload,
    })
}

/// A pub/sub channel address: `ns.subj.<recipient>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelName {
    // ---
    pub topic: Topic,
    pub recipient: String,
}

impl ChannelName {
    // ---
    pub fn directed(topic: &Topic, recipient: &str) -> Self {
        Self {
            topic: topic.clone(),
            recipient: recipient.to_string(),
        }
    }

    pub fn broadcast(topic: &Topic) -> Self {
        Self::directed(topic, "")
    }

    /// Channel an envelope is published on.
    pub fn for_envelope(env: &Envelope) -> Self {
        Self::directed(&env.topic, &env.recipient)
    }

    pub fn format(&self) -> String {
        format!("{}{SEPARATOR}{}", self.topic.format(), self.recipient)
    }

    /// Split a channel name into exactly three parts.
    ///
    /// The trailing part may be empty (broadcast channel).
    pub fn parse(channel: &str) -> Result<Self> {
        // ---
        let parts: Vec<&str> = channel.split(SEPARATOR).collect();

        match parts.as_slice() {
            [namespace, subject, recipient] => Ok(Self {
                topic: Topic::parse(&format!("{namespace}{SEPARATOR}{subject}"))?,
                recipient: (*recipient).to_string(),
            }),
            _ => Err(ProtonError::MalformedTopic(channel.to_string())),
        }
    }
}

/// Body published on a pub/sub channel.
///
/// `data` holds the JSON-encoded payload bytes, serialised as a JSON array
/// of byte values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPayload {
    // ---
    #[serde(rename = "senderName")]
    pub sender_name: String,

    #[serde(rename = "senderID")]
    pub sender_id: Uuid,

    /// Payload bytes as a JSON array of signed bytes (-128..=127), the form
    /// JVM peers write. Unsigned values up to 255 are accepted on read.
    #[serde(with = "signed_bytes")]
    pub data: Vec<u8>,
}

mod signed_bytes {
    // ---
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(data.iter().map(|b| *b as i8))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        // ---
        Vec::<i64>::deserialize(deserializer)?
            .into_iter()
            .map(|v| match v {
                -128..=-1 => Ok(v as i8 as u8),
                0..=255 => Ok(v as u8),
                _ => Err(D::Error::custom(format!("byte value {v} out of range"))),
            })
            .collect()
    }
}

impl ChannelPayload {
    // ---
    pub fn from_envelope(env: &Envelope) -> Self {
        Self {
            sender_name: env.sender_name.to_string(),
            sender_id: env.sender_id,
            data: env.payload.to_vec(),
        }
    }

    /// Combine with the channel the body arrived on.
    pub fn into_envelope(self, channel: ChannelName) -> Envelope {
        // ---
        Envelope {
            sender_name: self.sender_name.into(),
            sender_id: self.sender_id,
            recipient: channel.recipient.into(),
            topic: channel.topic,
            payload: Bytes::from(self.data),
        }
    }
}
