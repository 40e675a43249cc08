//! Session configuration.
//!
//! [`ProtonConfig`] is the programmatic form: client identity plus the
//! selected transport and its connection parameters. It can be built
//! directly or read from any [`ConfigSource`], such as a YAML document via
//! [`YamlConfigSource`].

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde_yaml::Value;

use crate::{
    // ---
    transport::{global_hub, MemoryHub},
    ClientIdentity,
    ProtonError,
    Result,
};

/// Default configuration document.
///
/// `identification.clientName` is deliberately absent and must be supplied.
pub const DEFAULT_CONFIG: &str = r#"identification:
  # clientName: lobby-1
  groups: []
rabbitMQ:
  useRabbitMQ: true
  host: localhost
  virtualHost: /
  port: 5672
  authorization:
    useAuthorization: false
    username: guest
    password: guest
redis:
  useRedis: false
  host: localhost
  port: 6379
  usePassword: false
  password: ""
"#;

/// Read-only access to a hierarchical configuration by dotted path
/// (`rabbitMQ.authorization.username`).
pub trait ConfigSource: Send + Sync {
    /// String value at `path`. Scalars are rendered as strings.
    fn get_string(&self, path: &str) -> Option<String>;

    /// List of strings at `path`; empty when absent.
    fn get_string_list(&self, path: &str) -> Vec<String>;

    /// Boolean at `path`; `false` when absent.
    fn get_bool(&self, path: &str) -> bool;

    /// Integer at `path`.
    fn get_int(&self, path: &str) -> Option<i64>;
}

/// [`ConfigSource`] over a parsed YAML document.
#[derive(Debug, Clone)]
pub struct YamlConfigSource {
    // ---
    root: Value,
}

impl YamlConfigSource {
    // ---
    /// Parse a YAML document.
    ///
    /// # Errors
    ///
    /// [`ProtonError::Config`] if the text is not valid YAML.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let root = serde_yaml::from_str(text).map_err(|e| ProtonError::Config(format!("invalid YAML: {e}")))?;
        Ok(Self { root })
    }

    /// Read and parse a YAML file.
    ///
    /// # Errors
    ///
    /// [`ProtonError::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        // ---
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ProtonError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml(&text)
    }

    fn lookup(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.root, |node, key| node.get(key))
            .filter(|value| !value.is_null())
    }
}

impl Default for YamlConfigSource {
    fn default() -> Self {
        // DEFAULT_CONFIG is a constant known to parse.
        Self::from_yaml(DEFAULT_CONFIG).unwrap_or(Self { root: Value::Null })
    }
}

impl ConfigSource for YamlConfigSource {
    // ---
    fn get_string(&self, path: &str) -> Option<String> {
        match self.lookup(path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn get_string_list(&self, path: &str) -> Vec<String> {
        // ---
        let Some(Value::Sequence(items)) = self.lookup(path) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect()
    }

    fn get_bool(&self, path: &str) -> bool {
        match self.lookup(path) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    fn get_int(&self, path: &str) -> Option<i64> {
        match self.lookup(path)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Username/password pair for the broker.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection parameters for the AMQP broker transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RabbitMqSettings {
    // ---
    pub host: String,
    pub port: u16,
    pub virtual_host: String,

    /// `None` connects with the broker's default credentials.
    pub credentials: Option<Credentials>,
}

impl Default for RabbitMqSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5672,
            virtual_host: "/".into(),
            credentials: None,
        }
    }
}

/// Connection parameters for the Redis channel transport.
#[derive(Clone, PartialEq, Eq)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl fmt::Debug for RedisSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 6379,
            password: None,
        }
    }
}

/// Which transport a session uses.
#[derive(Clone)]
pub enum TransportSettings {
    /// In-process hub; sessions on the same hub see each other.
    Memory(Arc<MemoryHub>),
    RabbitMq(RabbitMqSettings),
    Redis(RedisSettings),
}

impl TransportSettings {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportSettings::Memory(_) => "memory",
            TransportSettings::RabbitMq(_) => "rabbitmq",
            TransportSettings::Redis(_) => "redis",
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        TransportSettings::Memory(global_hub())
    }
}

impl fmt::Debug for TransportSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSettings::Memory(_) => f.write_str("Memory"),
            TransportSettings::RabbitMq(s) => f.debug_tuple("RabbitMq").field(s).finish(),
            TransportSettings::Redis(s) => f.debug_tuple("Redis").field(s).finish(),
        }
    }
}

/// Everything needed to start a session.
#[derive(Debug, Clone)]
pub struct ProtonConfig {
    // ---
    /// Unique name of this session on the bus.
    pub client_name: String,

    /// Shared recipient tokens this session also answers to.
    pub groups: Vec<String>,

    pub transport: TransportSettings,
}

impl ProtonConfig {
    // ---
    /// Session on an in-memory hub.
    pub fn memory<I, S>(client_name: impl Into<String>, groups: I, hub: Arc<MemoryHub>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_transport(client_name, groups, TransportSettings::Memory(hub))
    }

    /// Session on an AMQP broker.
    pub fn rabbitmq<I, S>(client_name: impl Into<String>, groups: I, settings: RabbitMqSettings) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_transport(client_name, groups, TransportSettings::RabbitMq(settings))
    }

    /// Session on Redis pub/sub.
    pub fn redis<I, S>(client_name: impl Into<String>, groups: I, settings: RedisSettings) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_transport(client_name, groups, TransportSettings::Redis(settings))
    }

    fn with_transport<I, S>(client_name: impl Into<String>, groups: I, transport: TransportSettings) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            client_name: client_name.into(),
            groups: groups.into_iter().map(Into::into).collect(),
            transport,
        }
    }

    /// Read a configuration from `source`.
    ///
    /// When both transports are enabled RabbitMQ is used. Credentials are
    /// only read when their `use*` flag is set.
    ///
    /// # Errors
    ///
    /// - [`ProtonError::MissingConfig`] without `identification.clientName`
    /// - [`ProtonError::InvalidIdentity`] for a name or group containing `.`
    /// - [`ProtonError::ConfigConflict`] if neither transport is enabled
    /// - [`ProtonError::Config`] for an out-of-range port
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self> {
        // ---
        let client_name = source
            .get_string("identification.clientName")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ProtonError::MissingConfig("identification.clientName must be set".into()))?;
        let groups = source.get_string_list("identification.groups");

        // Fails fast on a bad name or group.
        ClientIdentity::new(client_name.as_str(), groups.iter().map(String::as_str))?;

        let use_rabbit = source.get_bool("rabbitMQ.useRabbitMQ");
        let use_redis = source.get_bool("redis.useRedis");

        let transport = if use_rabbit {
            TransportSettings::RabbitMq(rabbitmq_settings(source)?)
        } else if use_redis {
            TransportSettings::Redis(redis_settings(source)?)
        } else {
            return Err(ProtonError::ConfigConflict(
                "neither rabbitMQ.useRabbitMQ nor redis.useRedis is enabled".into(),
            ));
        };

        Ok(Self {
            client_name,
            groups,
            transport,
        })
    }

    /// Validated identity for a new session. Each call yields a fresh id.
    pub fn identity(&self) -> Result<ClientIdentity> {
        ClientIdentity::new(self.client_name.as_str(), self.groups.iter().map(String::as_str))
    }
}

fn rabbitmq_settings(source: &dyn ConfigSource) -> Result<RabbitMqSettings> {
    // ---
    let defaults = RabbitMqSettings::default();

    let credentials = if source.get_bool("rabbitMQ.authorization.useAuthorization") {
        Some(Credentials {
            username: source
                .get_string("rabbitMQ.authorization.username")
                .ok_or_else(|| ProtonError::MissingConfig("rabbitMQ.authorization.username".into()))?,
            password: source
                .get_string("rabbitMQ.authorization.password")
                .ok_or_else(|| ProtonError::MissingConfig("rabbitMQ.authorization.password".into()))?,
        })
    } else {
        None
    };

    Ok(RabbitMqSettings {
        host: source.get_string("rabbitMQ.host").unwrap_or(defaults.host),
        port: port(source, "rabbitMQ.port", defaults.port)?,
        virtual_host: source
            .get_string("rabbitMQ.virtualHost")
            .unwrap_or(defaults.virtual_host),
        credentials,
    })
}

fn redis_settings(source: &dyn ConfigSource) -> Result<RedisSettings> {
    // ---
    let defaults = RedisSettings::default();

    let password = if source.get_bool("redis.usePassword") {
        Some(
            source
                .get_string("redis.password")
                .ok_or_else(|| ProtonError::MissingConfig("redis.password".into()))?,
        )
    } else {
        None
    };

    Ok(RedisSettings {
        host: source.get_string("redis.host").unwrap_or(defaults.host),
        port: port(source, "redis.port", defaults.port)?,
        password,
    })
}

fn port(source: &dyn ConfigSource, path: &str, default: u16) -> Result<u16> {
    match source.get_int(path) {
        None => Ok(default),
        Some(value) => u16::try_from(value).map_err(|_| ProtonError::Config(format!("{path} out of range: {value}"))),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn source(yaml: &str) -> YamlConfigSource {
        YamlConfigSource::from_yaml(yaml).unwrap()
    }

    #[test]
    fn default_document_needs_a_client_name() {
        // ---
        let defaults = YamlConfigSource::default();
        assert_eq!(defaults.get_int("rabbitMQ.port"), Some(5672));
        assert!(defaults.get_bool("rabbitMQ.useRabbitMQ"));
        assert!(matches!(
            ProtonConfig::from_source(&defaults),
            Err(ProtonError::MissingConfig(_))
        ));
    }

    #[test]
    fn rabbitmq_with_authorization() {
        // ---
        let config = ProtonConfig::from_source(&source(
            r#"
identification:
  clientName: lobby-1
  groups: [lobbies, all]
rabbitMQ:
  useRabbitMQ: true
  host: mq.internal
  virtualHost: games
  port: 5673
  authorization:
    useAuthorization: true
    username: proton
    password: secret
redis:
  useRedis: true
"#,
        ))
        .unwrap();

        assert_eq!(config.client_name, "lobby-1");
        assert_eq!(config.groups, vec!["lobbies", "all"]);

        let TransportSettings::RabbitMq(rabbit) = &config.transport else {
            panic!("expected rabbitmq, got {:?}", config.transport);
        };
        assert_eq!(rabbit.host, "mq.internal");
        assert_eq!(rabbit.port, 5673);
        assert_eq!(rabbit.virtual_host, "games");
        assert_eq!(
            rabbit.credentials,
            Some(Credentials {
                username: "proton".into(),
                password: "secret".into()
            })
        );
    }

    #[test]
    fn redis_without_password_uses_defaults() {
        // ---
        let config = ProtonConfig::from_source(&source(
            r#"
identification:
  clientName: hub
rabbitMQ:
  useRabbitMQ: false
redis:
  useRedis: true
  usePassword: false
  password: ignored
"#,
        ))
        .unwrap();

        assert!(config.groups.is_empty());
        let TransportSettings::Redis(redis) = &config.transport else {
            panic!("expected redis, got {:?}", config.transport);
        };
        assert_eq!(*redis, RedisSettings::default());
    }

    #[test]
    fn rejects_bad_identity_and_missing_transport() {
        // ---
        let dotted = source("identification: {clientName: lobby.1}\nredis: {useRedis: true}");
        assert!(matches!(
            ProtonConfig::from_source(&dotted),
            Err(ProtonError::InvalidIdentity(_))
        ));

        let dotted_group = source("identification: {clientName: lobby, groups: [a.b]}\nredis: {useRedis: true}");
        assert!(matches!(
            ProtonConfig::from_source(&dotted_group),
            Err(ProtonError::InvalidIdentity(_))
        ));

        let none = source("identification: {clientName: lobby}");
        assert!(matches!(
            ProtonConfig::from_source(&none),
            Err(ProtonError::ConfigConflict(_))
        ));
    }

    #[test]
    fn bad_port_is_a_config_error() {
        // ---
        let yaml = source("identification: {clientName: a}\nredis: {useRedis: true, port: 70000}");
        assert!(matches!(ProtonConfig::from_source(&yaml), Err(ProtonError::Config(_))));
    }

    #[test]
    fn redacts_secrets_in_debug() {
        // ---
        let settings = RedisSettings {
            password: Some("hunter2".into()),
            ..RedisSettings::default()
        };
        assert!(!format!("{settings:?}").contains("hunter2"));
    }
}
