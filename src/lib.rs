//! Typed, topic-addressed messaging between server processes.
//!
//! Each process opens a [`ProtonSession`] with a unique client name and any
//! number of groups. Messages are classified by a [`Topic`]
//! (`namespace` + `subject`), carry a JSON-encoded payload, and are either
//! sent to one recipient token (a client name or a group) or broadcast to
//! every session that registered a handler for the topic.
//!
//! Transports:
//! - RabbitMQ header exchanges (`transport_lapin`)
//! - Redis pub/sub channels (`transport_redis`)
//! - an in-process [`MemoryHub`] (always available)
//!
//! ```no_run
//! use proton::{ExecutionLane, MessageAttributes, SessionBuilder};
//!
//! # async fn example() -> proton::Result<()> {
//! let session = SessionBuilder::new("lobby-1")
//!     .group("lobbies")
//!     .rabbitmq("localhost", 5672)
//!     .connect()
//!     .await?;
//!
//! session
//!     .register_handler("chat", "say", ExecutionLane::Foreground, |text: String, attrs: &MessageAttributes| {
//!         println!("<{}> {text}", attrs.sender_name());
//!     })
//!     .await?;
//!
//! session.send("chat", "say", &"hi".to_string(), "lobbies").await?;
//! session.broadcast("chat", "say", &"hello everyone".to_string()).await?;
//! session.tear_down().await;
//! # Ok(())
//! # }
//! ```

mod macros;
pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

mod dispatch;
mod domain;
mod error;
mod handler_set;
mod proton_config;
mod registry;
mod scheduler;
mod session;
mod session_builder;
mod transport;

pub use error::{ProtonError, Result};

pub use dispatch::{DispatchEngine, MessageAttributes};
pub use handler_set::HandlerSet;
pub use registry::{BindOutcome, HandlerRegistry, Payload, PayloadType, TopicBinding};
pub use scheduler::{LaneScheduler, FOREGROUND_THREAD};
pub use session::ProtonSession;
pub use session_builder::SessionBuilder;

pub use proton_config::{
    //
    ConfigSource,
    Credentials,
    ProtonConfig,
    RabbitMqSettings,
    RedisSettings,
    TransportSettings,
    YamlConfigSource,
    DEFAULT_CONFIG,
};

pub use transport::{
    //
    create_broker_transport,
    create_channel_transport,
    create_memory_transport,
    create_memory_transport_with_hub,
    create_transport,
    global_hub,
    MemoryHub,
};

// --- public re-exports
pub use domain::{
    //
    delivery_channel,
    envelope_from_headers,
    publish_headers,
    validate_recipient,
    validate_topic,
    Attributes,
    ChannelName,
    ChannelPayload,
    ClientIdentity,
    DeliveryInbox,
    DeliverySink,
    Envelope,
    Exchange,
    ExecutionLane,
    HeaderBinding,
    SchedulerAdapter,
    SchedulerPtr,
    Task,
    Topic,
    Transport,
    TransportBase,
    TransportPtr,
    BROADCAST_EXCHANGE,
    DELIVERY_CAPACITY,
    DIRECT_EXCHANGE,
    HEADER_MATCH,
    HEADER_RECIPIENT,
    HEADER_SENDER_ID,
    HEADER_SENDER_NAME,
    HEADER_TOPIC,
    SEPARATOR,
};
