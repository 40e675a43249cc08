use thiserror::Error;

/// Errors surfaced by a [`ProtonSession`](crate::ProtonSession) and its
/// collaborators.
///
/// Validation and registration errors are returned unwrapped so callers can
/// match on them. Anything that goes wrong after a message has been accepted
/// for sending is wrapped in [`ProtonError::SendFailed`].
#[derive(Error, Debug)]
pub enum ProtonError {
    // ---
    /// Namespace or subject contains the reserved separator.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// A wire token could not be split into a topic (or channel name).
    #[error("malformed topic token: {0:?}")]
    MalformedTopic(String),

    /// Recipient token is empty or contains the reserved separator.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Client name or group name is empty or contains the reserved separator.
    #[error("invalid client identity: {0}")]
    InvalidIdentity(String),

    /// A topic is already bound to a different payload type.
    #[error("topic {topic} already has defined data type {bound}, cannot register {requested}")]
    TypeConflict {
        topic: String,
        bound: &'static str,
        requested: &'static str,
    },

    /// Outbound payload type differs from the type bound to the topic.
    #[error("topic {topic} is bound to {bound}, refusing to send {sent}")]
    TypeMismatch {
        topic: String,
        bound: &'static str,
        sent: &'static str,
    },

    /// Sending a validated message failed.
    #[error("failed to send message: {0}")]
    SendFailed(#[source] Box<ProtonError>),

    /// Transport-level failure (connection, declare, bind, publish).
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A required configuration entry is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// Configuration entries contradict each other.
    #[error("configuration conflict: {0}")]
    ConfigConflict(String),

    /// The configuration document could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProtonError {
    // ---
    /// Wrap an error raised while sending.
    pub(crate) fn send_failed(err: ProtonError) -> Self {
        match err {
            already @ ProtonError::SendFailed(_) => already,
            other => ProtonError::SendFailed(Box::new(other)),
        }
    }
}

/// Result type alias for Proton operations
pub type Result<T> = std::result::Result<T, ProtonError>;
