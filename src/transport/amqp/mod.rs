//! AMQP protocol transports.
//!
//! This module contains transport implementations for AMQP-based brokers.
//! Currently supports:
//! - lapin - AMQP 0-9-1 header exchanges (RabbitMQ)

#[cfg(feature = "transport_lapin")]
mod lapin;

#[cfg(feature = "transport_lapin")]
pub use lapin::create_transport as create_broker_transport;

#[cfg(not(feature = "transport_lapin"))]
pub async fn create_broker_transport(
    _base: crate::TransportBase,
    _settings: &crate::RabbitMqSettings,
) -> crate::Result<crate::TransportPtr> {
    Err(crate::ProtonError::Transport(
        "transport_lapin feature is not enabled".into(),
    ))
}
