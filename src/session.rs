//! Client session.
//!
//! A [`ProtonSession`] is one participant on the bus: an identity, one
//! exclusively owned transport, a handler registry and the dispatch task that
//! feeds inbound messages to handlers. It is created once at startup and
//! passed (cloned) to whatever needs to send or receive.
//!
//! Registering the first handler on a topic binds, on the transport, the
//! session's own name, each of its groups and the topic's broadcast address.
//! That is what makes a directed send to a group reach every member.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    // ---
    delivery_channel,
    dispatch::DispatchEngine,
    log_debug,
    log_info,
    log_warn,
    registry::{HandlerRegistry, Payload, PayloadType},
    transport::create_transport,
    validate_recipient,
    ClientIdentity,
    ConfigSource,
    Envelope,
    ExecutionLane,
    HandlerSet,
    MessageAttributes,
    ProtonConfig,
    ProtonError,
    Result,
    SchedulerPtr,
    Topic,
    TransportBase,
    TransportPtr,
};

/// Handle to a connected session. Cheap to clone.
#[derive(Clone)]
pub struct ProtonSession {
    // ---
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    identity: ClientIdentity,
    transport: TransportPtr,
    registry: Arc<HandlerRegistry>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = lock_ignore_poison(&self.dispatch).take() {
            handle.abort();
        }
    }
}

impl ProtonSession {
    // ---
    /// Connect a session described by `config`.
    ///
    /// Handlers run on `scheduler`; use
    /// [`LaneScheduler`](crate::LaneScheduler) when the host has no
    /// scheduler of its own.
    ///
    /// # Errors
    ///
    /// [`ProtonError::InvalidIdentity`] for a bad name or group, otherwise
    /// whatever the transport returns when it cannot connect.
    pub async fn connect(config: ProtonConfig, scheduler: SchedulerPtr) -> Result<Self> {
        // ---
        let identity = config.identity()?;
        let (sink, inbox) = delivery_channel();

        let base = TransportBase::new(identity.name(), sink);
        let transport = create_transport(base, &config.transport).await?;

        let registry = Arc::new(HandlerRegistry::new());
        let engine = DispatchEngine::new(
            identity.id(),
            identity.name(),
            Arc::clone(&registry),
            scheduler,
        );
        let dispatch = tokio::spawn(engine.run(inbox));

        log_info!(
            "connected to {} as '{}' with id {}",
            config.transport.kind(),
            identity.name(),
            identity.id()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                identity,
                transport,
                registry,
                dispatch: Mutex::new(Some(dispatch)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Read a [`ProtonConfig`] from `source` and connect.
    ///
    /// # Errors
    ///
    /// See [`ProtonConfig::from_source`] and [`ProtonSession::connect`].
    pub async fn connect_from_source(source: &dyn ConfigSource, scheduler: SchedulerPtr) -> Result<Self> {
        Self::connect(ProtonConfig::from_source(source)?, scheduler).await
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.inner.identity
    }

    pub fn client_name(&self) -> &str {
        self.inner.identity.name()
    }

    /// Random id of this session, used to recognise its own broadcasts.
    pub fn client_id(&self) -> Uuid {
        self.inner.identity.id()
    }

    pub fn client_groups(&self) -> Vec<&str> {
        self.inner.identity.groups().collect()
    }

    /// Payload type bound to a topic by a local registration, if any.
    pub fn bound_type(&self, namespace: &str, subject: &str) -> Option<PayloadType> {
        let topic = Topic::new(namespace, subject).ok()?;
        self.inner.registry.bound_type(&topic)
    }

    /// Register `callback` for messages on `(namespace, subject)`.
    ///
    /// The first registration on a topic binds it to `T` and makes the
    /// transport deliver the topic's traffic to this session. Further
    /// registrations must use the same type (primitives and their boxed forms
    /// count as the same type); every registered handler receives every
    /// matching message.
    ///
    /// ```no_run
    /// # use proton::{ExecutionLane, MessageAttributes, ProtonSession};
    /// # async fn example(session: ProtonSession) -> proton::Result<()> {
    /// session
    ///     .register_handler("chat", "say", ExecutionLane::Background, |text: String, attrs: &MessageAttributes| {
    ///         println!("{} says {text}", attrs.sender_name());
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// - [`ProtonError::InvalidTopic`] if either part contains `.`
    /// - [`ProtonError::TypeConflict`] if the topic is bound to another type
    /// - a transport error if binding fails; nothing is registered then
    pub async fn register_handler<T, F>(
        &self,
        namespace: &str,
        subject: &str,
        lane: ExecutionLane,
        callback: F,
    ) -> Result<()>
    where
        T: Payload,
        F: Fn(T, &MessageAttributes) + Send + Sync + 'static,
    {
        // ---
        self.ensure_open()?;
        let topic = Topic::new(namespace, subject)?;
        let registry = &self.inner.registry;

        if registry.check::<T>(&topic)? {
            self.bind_addresses(&topic).await?;
        }

        let _outcome = registry.bind::<T, F>(&topic, lane, callback)?;
        log_debug!(
            "{}: registered {} handler on {topic} ({_outcome:?}, {lane:?})",
            self.client_name(),
            PayloadType::of::<T>().name()
        );
        Ok(())
    }

    /// Register a handler that only needs the payload.
    ///
    /// # Errors
    ///
    /// As [`register_handler`](Self::register_handler).
    pub async fn register_handler_data<T, F>(
        &self,
        namespace: &str,
        subject: &str,
        lane: ExecutionLane,
        callback: F,
    ) -> Result<()>
    where
        T: Payload,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.register_handler(namespace, subject, lane, move |value: T, _: &MessageAttributes| {
            callback(value)
        })
        .await
    }

    /// Register every handler of each set, in order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing registration and returns its error; what
    /// was registered before it stays registered.
    pub async fn register_handlers(&self, sets: &[&dyn HandlerSet]) -> Result<()> {
        // ---
        for set in sets {
            set.register(self).await?;
        }
        Ok(())
    }

    /// Send `payload` to every session that answers to `recipient` (a client
    /// name or a group) and registered a handler on the topic.
    ///
    /// # Errors
    ///
    /// - [`ProtonError::InvalidTopic`] / [`ProtonError::InvalidRecipient`]
    ///   for bad input
    /// - [`ProtonError::TypeMismatch`] if a local registration bound the topic
    ///   to another type; nothing is sent
    /// - [`ProtonError::SendFailed`] for serialization or transport failures
    pub async fn send<T: Payload>(
        &self,
        namespace: &str,
        subject: &str,
        payload: &T,
        recipient: &str,
    ) -> Result<()> {
        // ---
        let topic = Topic::new(namespace, subject)?;
        validate_recipient(recipient)?;
        let bytes = self.encode(&topic, payload)?;

        let env = Envelope::directed(&self.inner.identity, recipient, topic, bytes);
        self.inner
            .transport
            .send_directed(env)
            .await
            .map_err(ProtonError::send_failed)
    }

    /// Send `payload` to every session that registered a handler on the
    /// topic, except this one.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), without the recipient check.
    pub async fn broadcast<T: Payload>(&self, namespace: &str, subject: &str, payload: &T) -> Result<()> {
        // ---
        let topic = Topic::new(namespace, subject)?;
        let bytes = self.encode(&topic, payload)?;

        let env = Envelope::broadcast(&self.inner.identity, topic, bytes);
        self.inner
            .transport
            .send_broadcast(env)
            .await
            .map_err(ProtonError::send_failed)
    }

    /// Close the transport and stop dispatching.
    ///
    /// Best-effort and idempotent: errors from an already broken connection
    /// are logged, never returned. Messages in flight may be dropped.
    pub async fn tear_down(&self) {
        // ---
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.inner.transport.close().await {
            log_warn!("{}: error while closing transport: {e}", self.client_name());
        }

        if let Some(handle) = lock_ignore_poison(&self.inner.dispatch).take() {
            handle.abort();
        }

        log_info!("{}: session closed", self.client_name());
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ProtonError::Transport("session is closed".into()));
        }
        Ok(())
    }

    async fn bind_addresses(&self, topic: &Topic) -> Result<()> {
        // ---
        let transport = &self.inner.transport;

        for token in self.inner.identity.recipient_tokens() {
            transport.bind_recipient(topic, token).await?;
        }
        transport.bind_broadcast(topic).await
    }

    /// Type check against the local binding, then JSON-encode.
    fn encode<T: Payload>(&self, topic: &Topic, payload: &T) -> Result<bytes::Bytes> {
        // ---
        if let Some(bound) = self.inner.registry.bound_type(topic) {
            let sent = PayloadType::of::<T>();
            if bound != sent {
                return Err(ProtonError::TypeMismatch {
                    topic: topic.format(),
                    bound: bound.name(),
                    sent: sent.name(),
                });
            }
        }

        self.ensure_open().map_err(ProtonError::send_failed)?;

        serde_json::to_vec(payload)
            .map(bytes::Bytes::from)
            .map_err(|e| ProtonError::send_failed(e.into()))
    }
}

/// Acquire mutex guard, ignoring poisoning
fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
