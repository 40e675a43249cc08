//! Redis protocol transports.
//!
//! This module contains transport implementations for Redis.
//! Currently supports:
//! - redis - Redis pub/sub channels via the redis library (redis.rs)

#[cfg(feature = "transport_redis")]
#[allow(clippy::module_inception)]
mod redis;

#[cfg(feature = "transport_redis")]
pub use redis::create_transport as create_channel_transport;

#[cfg(not(feature = "transport_redis"))]
pub async fn create_channel_transport(
    _base: crate::TransportBase,
    _settings: &crate::RedisSettings,
) -> crate::Result<crate::TransportPtr> {
    Err(crate::ProtonError::Transport(
        "transport_redis feature is not enabled".into(),
    ))
}
