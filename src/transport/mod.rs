//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `Transport` trait. Network transports are hidden behind feature flags
//! and exposed only through constructor functions; a disabled transport's
//! constructor still exists and returns a transport error.
//!
//! Domain code must not depend on transport-specific types.

mod amqp;
mod memory;
mod redis;

use crate::{log_debug, Result, TransportBase, TransportPtr, TransportSettings};

pub use amqp::create_broker_transport;
pub use memory::{create_memory_transport, create_memory_transport_with_hub, global_hub, MemoryHub};
pub use redis::create_channel_transport;

/// Connect the transport selected by `settings`.
///
/// # Errors
///
/// Whatever the selected transport's constructor returns; connection
/// failures are fatal to session startup.
pub async fn create_transport(base: TransportBase, settings: &TransportSettings) -> Result<TransportPtr> {
    // ---
    log_debug!("{}: create {} transport", base.transport_id, settings.kind());

    match settings {
        TransportSettings::Memory(hub) => create_memory_transport_with_hub(base, hub.clone()).await,
        TransportSettings::RabbitMq(rabbit) => create_broker_transport(base, rabbit).await,
        TransportSettings::Redis(redis) => create_channel_transport(base, redis).await,
    }
}
