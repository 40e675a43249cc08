//! AMQP broker transport implementation using `lapin`.
//!
//! ## Concurrency model
//!
//! - A single background **actor task** owns the AMQP connection and channel
//!   and serializes every bind, publish and shutdown.
//! - A **consumer task** streams deliveries from the session's queue, turns
//!   message headers back into an [`Envelope`] and pushes it into the
//!   session's delivery sink.
//!
//! ## Broker topology
//!
//! - Two header exchanges, `proton.direct` and `proton.broadcast`, declared
//!   durable on connect (declaration is idempotent across sessions).
//! - One server-named, exclusive, auto-delete queue per session, consumed
//!   with automatic acknowledgement.
//! - Bindings use `x-match = all` over the attribute sets produced by
//!   [`HeaderBinding`]; routing keys are always empty.
//!
//! Messages carry `x-senderName`, `x-senderID`, `recipient` and `topic` as
//! string headers; the body is the JSON payload and nothing else.

use lapin::{
    //
    options::{
        //
        BasicConsumeOptions,
        BasicPublishOptions,
        ExchangeDeclareOptions,
        QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties,
    Channel,
    Connection,
    ConnectionProperties,
    ExchangeKind,
};

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::{
    //
    envelope_from_headers,
    log_debug,
    log_error,
    log_info,
    log_warn,
    publish_headers,
    Attributes,
    Envelope,
    Exchange,
    HeaderBinding,
    ProtonError,
    RabbitMqSettings,
    Result,
    Topic,
    Transport,
    TransportBase,
    TransportPtr,
    HEADER_MATCH,
};

//
// Actor commands
//

enum Cmd {
    //
    Bind {
        binding: HeaderBinding,
        resp: oneshot::Sender<Result<()>>,
    },
    Publish {
        env: Envelope,
        resp: oneshot::Sender<Result<()>>,
    },
    Close {
        resp: oneshot::Sender<Result<()>>,
    },
}

/// Header-exchange implementation of the `Transport` trait.
pub struct BrokerTransport {
    // ---
    base: TransportBase,
    cmd_tx: mpsc::Sender<Cmd>,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerTransport {
    // ---
    fn create(base: TransportBase, connection: Connection, channel: Channel, queue: String, consumer: JoinHandle<()>) -> TransportPtr {
        // ---
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let actor = Actor {
            transport_id: base.transport_id.clone(),
            connection,
            channel,
            queue,
            cmd_rx,
            bound: HashSet::new(),
            consumer,
        };

        let handle = tokio::spawn(actor.run());

        Arc::new(Self {
            base,
            cmd_tx,
            actor: Mutex::new(Some(handle)),
        })
    }

    async fn request(&self, make: impl FnOnce(oneshot::Sender<Result<()>>) -> Cmd) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();

        self.cmd_tx.send(make(tx)).await.map_err(|e| {
            let msg = format!("actor command channel closed:{e}");
            ProtonError::Transport(msg)
        })?;

        rx.await.map_err(|e| {
            let msg = format!("actor responder channel read failed:{e}");
            ProtonError::Transport(msg)
        })?
    }
}

/// Background actor task that owns the AMQP connection and channel.
struct Actor {
    // ---
    transport_id: String,
    connection: Connection,
    channel: Channel,
    queue: String,
    cmd_rx: mpsc::Receiver<Cmd>,
    bound: HashSet<HeaderBinding>,
    consumer: JoinHandle<()>,
}

impl Actor {
    async fn run(mut self) {
        // ---
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                Cmd::Bind { binding, resp } => {
                    let result = self.do_bind(binding).await;
                    let _ = resp.send(result);
                }
                Cmd::Publish { env, resp } => {
                    let result = self.do_publish(env).await;
                    let _ = resp.send(result);
                }
                Cmd::Close { resp } => {
                    self.shutdown().await;
                    let _ = resp.send(Ok(()));
                    return;
                }
            }
        }

        self.shutdown().await;
    }

    async fn do_bind(&mut self, binding: HeaderBinding) -> Result<()> {
        // ---
        if self.bound.contains(&binding) {
            return Ok(());
        }

        let mut arguments = field_table(&binding.attributes);
        arguments.insert(HEADER_MATCH.into(), long_string("all"));

        self.channel
            .queue_bind(
                self.queue.as_str().into(),
                binding.exchange.name().into(),
                "".into(),
                QueueBindOptions::default(),
                arguments,
            )
            .await
            .map_err(|e| ProtonError::Transport(format!("amqp: queue bind failed: {e}")))?;

        log_debug!(
            "[{}] bound {} on {} {:?}",
            self.transport_id,
            self.queue,
            binding.exchange.name(),
            binding.attributes
        );
        self.bound.insert(binding);
        Ok(())
    }

    async fn do_publish(&mut self, env: Envelope) -> Result<()> {
        // ---
        let exchange = Exchange::for_envelope(&env);
        let properties = BasicProperties::default().with_headers(field_table(&publish_headers(&env)));

        self.channel
            .basic_publish(
                exchange.name().into(),
                "".into(),
                BasicPublishOptions::default(),
                &env.payload,
                properties,
            )
            .await
            .map_err(|e| ProtonError::Transport(format!("amqp: publish failed: {e}")))?;

        log_debug!("[{}] published {} to {}", self.transport_id, env.topic, exchange.name());
        Ok(())
    }

    async fn shutdown(&mut self) {
        // ---
        self.consumer.abort();

        // Either may already be closed by the broker.
        if let Err(_e) = self.channel.close(200, "Normal shutdown".into()).await {
            log_debug!("[{}] channel close: {_e}", self.transport_id);
        }
        if let Err(_e) = self.connection.close(200, "Normal shutdown".into()).await {
            log_debug!("[{}] connection close: {_e}", self.transport_id);
        }

        log_info!("[{}] AMQP transport closed", self.transport_id);
    }
}

#[async_trait::async_trait]
impl Transport for BrokerTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn bind_recipient(&self, topic: &Topic, recipient: &str) -> Result<()> {
        let binding = HeaderBinding::recipient(topic, recipient);
        self.request(|resp| Cmd::Bind { binding, resp }).await
    }

    async fn bind_broadcast(&self, topic: &Topic) -> Result<()> {
        let binding = HeaderBinding::broadcast(topic);
        self.request(|resp| Cmd::Bind { binding, resp }).await
    }

    async fn send_directed(&self, env: Envelope) -> Result<()> {
        self.request(|resp| Cmd::Publish { env, resp }).await
    }

    async fn send_broadcast(&self, env: Envelope) -> Result<()> {
        self.request(|resp| Cmd::Publish { env, resp }).await
    }

    async fn close(&self) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();

        let _ = self.cmd_tx.send(Cmd::Close { resp: tx }).await;
        let _ = rx.await;

        if let Some(handle) = self.actor.lock().await.take() {
            let _ = handle.await;
        }

        Ok(())
    }
}

fn long_string(value: &str) -> AMQPValue {
    AMQPValue::LongString(LongString::from(value.to_string()))
}

fn field_table(attributes: &Attributes) -> FieldTable {
    // ---
    let mut table = FieldTable::default();
    for (key, value) in attributes {
        table.insert(ShortString::from(key.clone()), long_string(value));
    }
    table
}

/// String-valued headers of a delivery. Non-string values are skipped.
fn headers_of(properties: &BasicProperties) -> Attributes {
    // ---
    let mut headers = Attributes::new();
    let Some(table) = properties.headers() else {
        return headers;
    };

    for (key, value) in table.inner() {
        let text = match value {
            AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
            AMQPValue::ShortString(s) => s.as_str().to_string(),
            _ => continue,
        };
        headers.insert(key.as_str().to_string(), text);
    }
    headers
}

/// Streams the session queue into the delivery sink.
fn spawn_consumer(base: TransportBase, consumer: lapin::Consumer, queue: String) -> JoinHandle<()> {
    // ---
    tokio::spawn(async move {
        use futures_lite::stream::StreamExt;

        let transport_id = base.transport_id.clone();
        let mut consumer = consumer;

        while let Some(delivery) = consumer.next().await {
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(e) => {
                    log_error!("[{transport_id}] consumer error on {queue}: {e}");
                    break;
                }
            };

            let headers = headers_of(&delivery.properties);
            match envelope_from_headers(&headers, delivery.data.into()) {
                Ok(env) => base.deliver(env).await,
                Err(e) => log_warn!("[{transport_id}] dropping message on {queue}: {e}"),
            }
        }

        log_info!("[{transport_id}] consumer ended for queue {queue}");
    })
}

fn amqp_uri(settings: &RabbitMqSettings) -> String {
    // ---
    let vhost = settings.virtual_host.replace('%', "%25").replace('/', "%2f");
    match &settings.credentials {
        Some(creds) => format!(
            "amqp://{}:{}@{}:{}/{vhost}",
            creds.username, creds.password, settings.host, settings.port
        ),
        None => format!("amqp://{}:{}/{vhost}", settings.host, settings.port),
    }
}

/// Connects to the broker, declares the exchanges and the session queue,
/// and starts consuming.
///
/// # Errors
///
/// Returns a transport error if the connection, a declaration or the
/// consumer setup fails.
pub async fn create_transport(base: TransportBase, settings: &RabbitMqSettings) -> Result<TransportPtr> {
    // ---
    let transport_id = base.transport_id.clone();
    let fail = |what: &str, e: lapin::Error| {
        let msg = format!("amqp: {what} failed: {e}");
        log_error!("[{transport_id}] {msg}");
        ProtonError::Transport(msg)
    };

    log_info!(
        "[{transport_id}] connecting to AMQP broker {}:{} vhost {:?}",
        settings.host,
        settings.port,
        settings.virtual_host
    );

    let connection = Connection::connect(&amqp_uri(settings), ConnectionProperties::default())
        .await
        .map_err(|e| fail("connection", e))?;

    let channel = connection
        .create_channel()
        .await
        .map_err(|e| fail("channel creation", e))?;

    for exchange in [Exchange::Broadcast, Exchange::Direct] {
        channel
            .exchange_declare(
                exchange.name().into(),
                ExchangeKind::Headers,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| fail("exchange declare", e))?;
    }

    let queue = channel
        .queue_declare(
            "".into(),
            QueueDeclareOptions {
                exclusive: true,
                auto_delete: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| fail("queue declare", e))?;
    let queue = queue.name().as_str().to_string();

    let consumer = channel
        .basic_consume(
            queue.as_str().into(),
            format!("{transport_id}-consumer").as_str().into(),
            BasicConsumeOptions {
                no_ack: true,
                ..BasicConsumeOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| fail("consume", e))?;

    log_info!("[{transport_id}] declared queue {queue}");

    let consumer = spawn_consumer(base.clone(), consumer, queue.clone());
    Ok(BrokerTransport::create(base, connection, channel, queue, consumer))
}
