//! Session builder.
//!
//! Provides a fluent API for assembling a [`ProtonConfig`] and connecting a
//! [`ProtonSession`].

use std::sync::Arc;

use crate::{
    // ---
    Credentials,
    LaneScheduler,
    MemoryHub,
    ProtonConfig,
    ProtonSession,
    RabbitMqSettings,
    RedisSettings,
    Result,
    SchedulerPtr,
    TransportSettings,
};

/// Builder for [`ProtonSession`].
///
/// # Examples
///
/// ## In-memory session (tests, single process)
/// ```no_run
/// use proton::{MemoryHub, SessionBuilder};
///
/// # async fn example() -> proton::Result<()> {
/// let hub = MemoryHub::new();
/// let session = SessionBuilder::new("lobby-1")
///     .group("lobbies")
///     .memory(hub)
///     .connect()
///     .await?;
/// # Ok(())
/// # }
/// ```
///
/// ## RabbitMQ with credentials
/// ```no_run
/// use proton::SessionBuilder;
///
/// # async fn example() -> proton::Result<()> {
/// let session = SessionBuilder::new("lobby-1")
///     .rabbitmq("mq.internal", 5672)
///     .virtual_host("games")
///     .credentials("proton", "secret")
///     .connect()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    // ---
    client_name: String,
    groups: Vec<String>,
    transport: TransportSettings,
    scheduler: Option<SchedulerPtr>,
}

impl SessionBuilder {
    /// Start a builder for a session named `client_name`.
    ///
    /// Default transport: the process-global in-memory hub.
    pub fn new(client_name: impl Into<String>) -> Self {
        // ---
        Self {
            client_name: client_name.into(),
            groups: Vec::new(),
            transport: TransportSettings::default(),
            scheduler: None,
        }
    }

    /// Start from an existing configuration.
    pub fn from_config(config: ProtonConfig) -> Self {
        Self {
            client_name: config.client_name,
            groups: config.groups,
            transport: config.transport,
            scheduler: None,
        }
    }

    /// Add a group this session answers to.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Add several groups.
    pub fn groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    /// Use an explicit in-memory hub.
    pub fn memory(mut self, hub: Arc<MemoryHub>) -> Self {
        self.transport = TransportSettings::Memory(hub);
        self
    }

    /// Use the AMQP broker transport.
    pub fn rabbitmq(mut self, host: impl Into<String>, port: u16) -> Self {
        self.transport = TransportSettings::RabbitMq(RabbitMqSettings {
            host: host.into(),
            port,
            ..RabbitMqSettings::default()
        });
        self
    }

    /// Set the broker virtual host. No effect on other transports.
    pub fn virtual_host(mut self, vhost: impl Into<String>) -> Self {
        if let TransportSettings::RabbitMq(settings) = &mut self.transport {
            settings.virtual_host = vhost.into();
        }
        self
    }

    /// Set broker credentials. No effect on other transports.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        if let TransportSettings::RabbitMq(settings) = &mut self.transport {
            settings.credentials = Some(Credentials {
                username: username.into(),
                password: password.into(),
            });
        }
        self
    }

    /// Use the Redis channel transport.
    pub fn redis(mut self, host: impl Into<String>, port: u16) -> Self {
        self.transport = TransportSettings::Redis(RedisSettings {
            host: host.into(),
            port,
            password: None,
        });
        self
    }

    /// Set the Redis password. No effect on other transports.
    pub fn redis_password(mut self, password: impl Into<String>) -> Self {
        if let TransportSettings::Redis(settings) = &mut self.transport {
            settings.password = Some(password.into());
        }
        self
    }

    /// Run handlers on `scheduler` instead of a new [`LaneScheduler`].
    pub fn scheduler(mut self, scheduler: SchedulerPtr) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// The configuration assembled so far.
    pub fn config(&self) -> ProtonConfig {
        ProtonConfig {
            client_name: self.client_name.clone(),
            groups: self.groups.clone(),
            transport: self.transport.clone(),
        }
    }

    /// Connect the session (consumes self).
    ///
    /// # Errors
    ///
    /// As [`ProtonSession::connect`]; also fails outside a tokio runtime when
    /// no scheduler was given.
    pub async fn connect(self) -> Result<ProtonSession> {
        // ---
        let scheduler = match self.scheduler.clone() {
            Some(scheduler) => scheduler,
            None => {
                let lanes: SchedulerPtr = LaneScheduler::new()?;
                lanes
            }
        };

        ProtonSession::connect(self.config(), scheduler).await
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn transport_specific_setters_apply_only_to_their_transport() {
        // ---
        let config = SessionBuilder::new("a")
            .redis("cache", 6380)
            .credentials("ignored", "ignored")
            .redis_password("pw")
            .groups(["g1", "g2"])
            .config();

        assert_eq!(config.groups, vec!["g1", "g2"]);
        match config.transport {
            TransportSettings::Redis(redis) => {
                assert_eq!(redis.host, "cache");
                assert_eq!(redis.port, 6380);
                assert_eq!(redis.password.as_deref(), Some("pw"));
            }
            other => panic!("expected redis, got {other:?}"),
        }
    }

    #[test]
    fn rabbitmq_settings() {
        // ---
        let config = SessionBuilder::new("a")
            .rabbitmq("mq", 5673)
            .virtual_host("games")
            .credentials("u", "p")
            .config();

        match config.transport {
            TransportSettings::RabbitMq(rabbit) => {
                assert_eq!(rabbit.virtual_host, "games");
                assert_eq!(rabbit.credentials.map(|c| c.username), Some("u".to_string()));
            }
            other => panic!("expected rabbitmq, got {other:?}"),
        }
    }
}
