//! Domain layer public interface.
//!
//! This module defines domain-level abstractions that are independent of
//! transport implementations, brokers, or host infrastructure.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod address;
mod identity;
mod scheduler;
mod topic;
mod transport;

// --- Topic & identity re-exports ---

pub use identity::ClientIdentity;
pub use topic::{validate as validate_topic, validate_recipient, Topic, SEPARATOR};

// --- Addressing re-exports ---

pub use address::{
    //
    envelope_from_headers,
    publish_headers,
    Attributes,
    ChannelName,
    ChannelPayload,
    Exchange,
    HeaderBinding,
    BROADCAST_EXCHANGE,
    DIRECT_EXCHANGE,
    HEADER_MATCH,
    HEADER_RECIPIENT,
    HEADER_SENDER_ID,
    HEADER_SENDER_NAME,
    HEADER_TOPIC,
};

// --- Transport domain re-exports ---

pub use transport::{
    //
    delivery_channel,
    DeliveryInbox,
    DeliverySink,
    Envelope,
    Transport,
    TransportBase,
    TransportPtr,
    DELIVERY_CAPACITY,
};

// --- Scheduler re-exports ---

pub use scheduler::{ExecutionLane, SchedulerAdapter, SchedulerPtr, Task};
