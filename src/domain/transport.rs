// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the contract every backend fulfils: bind the addresses
//! a session listens on, publish to an address, and push inbound messages to
//! the session's delivery sink. It intentionally avoids any reference to
//! concrete protocols, brokers, or client libraries.
//!
//! Two addressing forms exist:
//!
//! - **directed**: `(topic, recipient token)`; reaches every session that
//!   bound that token for that topic (a client name or a shared group)
//! - **broadcast**: `(topic)`; reaches every session that bound the topic's
//!   broadcast address
//!
//! Concrete implementations of this interface live under `src/transport/`.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::identity::ClientIdentity;
use super::topic::Topic;
use crate::{log_warn, Result};

/// Channel on which a transport hands inbound envelopes to its session.
pub type DeliverySink = mpsc::Sender<Envelope>;

/// Receiving half of a [`DeliverySink`].
pub type DeliveryInbox = mpsc::Receiver<Envelope>;

/// Capacity of the delivery channel between a transport and its session.
pub const DELIVERY_CAPACITY: usize = 256;

/// Create a matched sink/inbox pair.
pub fn delivery_channel() -> (DeliverySink, DeliveryInbox) {
    mpsc::channel(DELIVERY_CAPACITY)
}

/// One message in transit.
///
/// The logical shape is the same on every transport; only the framing
/// differs (headers + body for the broker, channel name + wrapper for pub/sub).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    // ---
    /// Name of the sending session.
    pub sender_name: Arc<str>,

    /// Unique id of the sending session.
    pub sender_id: Uuid,

    /// Recipient token. Empty for a broadcast.
    pub recipient: Arc<str>,

    /// Message class.
    pub topic: Topic,

    /// JSON-encoded payload.
    pub payload: Bytes,
}

impl Envelope {
    // ---
    /// Envelope addressed to one recipient token.
    pub fn directed(
        sender: &ClientIdentity,
        recipient: impl Into<Arc<str>>,
        topic: Topic,
        payload: Bytes,
    ) -> Self {
        // ---
        Self {
            sender_name: sender.name_arc(),
            sender_id: sender.id(),
            recipient: recipient.into(),
            topic,
            payload,
        }
    }

    /// Envelope addressed to everyone bound to the topic.
    pub fn broadcast(sender: &ClientIdentity, topic: Topic, payload: Bytes) -> Self {
        // ---
        Self {
            sender_name: sender.name_arc(),
            sender_id: sender.id(),
            recipient: Arc::from(""),
            topic,
            payload,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_empty()
    }
}

/// Shared base state for all transport implementations.
///
/// Each concrete transport embeds this as a field named `base`:
///
/// ```ignore
/// struct BrokerTransport {
///     base: TransportBase,
///     // ... broker specific fields
/// }
///
/// impl Transport for BrokerTransport {
///     fn base(&self) -> &TransportBase { &self.base }
/// }
/// ```
#[derive(Clone, Debug)]
pub struct TransportBase {
    /// Identifier used in log lines (the owning session's client name).
    pub transport_id: String,
    /// Where inbound envelopes go.
    pub sink: DeliverySink,
}

impl TransportBase {
    /// Create a new TransportBase.
    pub fn new(transport_id: impl Into<String>, sink: DeliverySink) -> Self {
        Self {
            transport_id: transport_id.into(),
            sink,
        }
    }

    /// Hand an inbound envelope to the session.
    ///
    /// A closed sink means the session is tearing down; the envelope is
    /// dropped.
    pub async fn deliver(&self, env: Envelope) {
        // ---
        if self.sink.send(env).await.is_err() {
            log_warn!(
                "{}: session inbox closed, dropping delivery",
                self.transport_id
            );
        }
    }
}

/// Transport abstraction.
///
/// A `Transport` realises addressing on top of some broker primitive and
/// provides best-effort delivery. It owns its connection(s) exclusively; one
/// transport belongs to one session.
///
/// Implementations must ensure that:
/// - Binding the same address twice is harmless.
/// - Once a bind call returns, messages published *after* that point to the
///   bound address are delivered to the sink.
/// - A directed publish reaches every transport that bound the
///   `(recipient, topic)` pair, including the sender's own.
/// - `close()` is best-effort and tolerates an already broken connection.
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show explicit
/// lifetimes and a boxed `Future`. This is an implementation detail, consumers
/// should treat methods as normal `async fn`s.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Returns a reference to the shared base state.
    fn base(&self) -> &TransportBase;

    /// Returns the transport_id of the transport.
    fn transport_id(&self) -> &str {
        &self.base().transport_id
    }

    /// Make traffic addressed to `recipient` for `topic` reach this session.
    async fn bind_recipient(&self, topic: &Topic, recipient: &str) -> Result<()>;

    /// Make broadcast traffic for `topic` reach this session.
    async fn bind_broadcast(&self, topic: &Topic) -> Result<()>;

    /// Deliver to the sessions bound to `env.recipient` for `env.topic`.
    async fn send_directed(&self, env: Envelope) -> Result<()>;

    /// Deliver to every session bound to the broadcast address of `env.topic`.
    async fn send_broadcast(&self, env: Envelope) -> Result<()>;

    /// Close the transport and release any associated resources.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// Used to erase concrete transport types behind a stable domain interface.
pub type TransportPtr = Arc<dyn Transport>;
