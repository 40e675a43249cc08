//! Redis pub/sub channel transport implementation using `redis`.
//!
//! ## Concurrency model
//!
//! - A single background **actor task** owns both Redis connections.
//! - The actor is responsible for:
//!   - publishing outbound messages via `publish_conn`,
//!   - subscribing to channels via `pubsub_sink`,
//!   - polling `pubsub_stream` for incoming messages,
//!   - clean shutdown of both connections.
//!
//! ## Two connections required
//!
//! A connection in pub/sub mode cannot issue `PUBLISH`, so two async
//! connections are kept:
//!
//! - `publish_conn`: `MultiplexedConnection`, used only for `PUBLISH`
//! - `pubsub_sink` / `pubsub_stream`: split from `aio::PubSub` so the sink
//!   can subscribe while the stream is polled in `select!`
//!
//! `PubSubSink::subscribe()` resolves only after the server confirmed the
//! subscription, so a bind is complete when the actor replies.
//!
//! ## Addressing
//!
//! No server-side matching: the channel name *is* the address,
//! `ns.subj.<recipient>` (empty recipient for broadcast). The body is a
//! [`ChannelPayload`] JSON object; topic and recipient come back from the
//! channel name, not from the body.

use futures_util::StreamExt;

use redis::aio::{MultiplexedConnection, PubSubSink, PubSubStream};

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    log_warn,
    ChannelName,
    ChannelPayload,
    Envelope,
    ProtonError,
    RedisSettings,
    Result,
    Topic,
    Transport,
    TransportBase,
    TransportPtr,
};

//
// Actor commands
//

enum Cmd {
    //
    Subscribe {
        channel: ChannelName,
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

enum ActorStep {
    //
    Continue,
    Stop,
}

impl Cmd {
    // ---

    /// Dispatches an actor command to the correct handler on the actor.
    async fn handle(self, actor: &mut RedisActor) -> ActorStep {
        // ---
        match self {
            Cmd::Subscribe { channel, resp } => {
                let _ = resp.send(actor.handle_subscribe(channel).await);
                ActorStep::Continue
            }
            Cmd::Publish { env, resp } => {
                let _ = resp.send(actor.handle_publish(env).await);
                ActorStep::Continue
            }
            Cmd::Close { resp } => {
                log_debug!("{}: disconnecting redis client", actor.base.transport_id);
                let _ = resp.send(Ok(()));
                ActorStep::Stop
            }
        }
    }
}

/// Channel-name implementation of the `Transport` trait.
pub struct ChannelTransport {
    // ---
    base: TransportBase,
    cmd_tx: mpsc::Sender<Cmd>,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelTransport {
    // ---

    /// Spawns the actor over already established connections.
    fn create(
        base: TransportBase,
        publish_conn: MultiplexedConnection,
        pubsub_sink: PubSubSink,
        pubsub_stream: PubSubStream,
    ) -> TransportPtr {
        // ---
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let actor = RedisActor {
            base: base.clone(),
            publish_conn,
            pubsub_sink,
            pubsub_stream,
            cmd_rx,
            subscribed: HashSet::new(),
        };

        let handle = tokio::task::spawn(actor.run());

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

struct RedisActor {
    // ---
    base: TransportBase,
    publish_conn: MultiplexedConnection,
    pubsub_sink: PubSubSink,
    pubsub_stream: PubSubStream,
    cmd_rx: mpsc::Receiver<Cmd>,
    subscribed: HashSet<String>,
}

impl RedisActor {
    // ---

    async fn run(mut self) {
        // ---
        let mut stream_open = true;

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if matches!(cmd.handle(&mut self).await, ActorStep::Stop) {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                maybe_msg = self.pubsub_stream.next(), if stream_open => {
                    match maybe_msg {
                        Some(msg) => self.handle_incoming(msg).await,
                        None => {
                            // Connection lost; publishes may still work on
                            // the multiplexed connection.
                            log_error!("{}: pubsub stream ended", self.base.transport_id);
                            stream_open = false;
                        }
                    }
                }
            }
        }

        log_info!("{}: redis transport closed", self.base.transport_id);
    }

    /// Publishes the envelope's wrapper on its channel.
    async fn handle_publish(&mut self, env: Envelope) -> Result<()> {
        // ---
        let channel = ChannelName::for_envelope(&env).format();
        let payload = serde_json::to_string(&ChannelPayload::from_envelope(&env))?;

        redis::cmd("PUBLISH")
            .arg(&channel)
            .arg(&payload)
            .query_async::<i64>(&mut self.publish_conn)
            .await
            .map(|_receivers| {
                log_debug!("{}: published on {channel} to {_receivers} receiver(s)", self.base.transport_id);
            })
            .map_err(|err| {
                let msg = format!("{}: publish failed on channel {channel}: {err}", self.base.transport_id);
                log_error!("{msg}");
                ProtonError::Transport(msg)
            })
    }

    /// Subscribes to a channel; repeated subscriptions are skipped.
    async fn handle_subscribe(&mut self, channel: ChannelName) -> Result<()> {
        // ---
        let channel = channel.format();
        if self.subscribed.contains(&channel) {
            return Ok(());
        }

        match self.pubsub_sink.subscribe(&channel).await {
            Ok(()) => {
                log_info!("{}: subscribed to channel {channel}", self.base.transport_id);
                self.subscribed.insert(channel);
                Ok(())
            }
            Err(err) => {
                let msg = format!(
                    "{}: failed to subscribe to channel {channel}: {err}",
                    self.base.transport_id
                );
                log_error!("{msg}");
                Err(ProtonError::Transport(msg))
            }
        }
    }

    /// Rebuilds an envelope from the channel name and wrapper body and hands
    /// it to the session. Malformed messages are dropped.
    async fn handle_incoming(&self, msg: redis::Msg) {
        // ---
        let transport_id = &self.base.transport_id;
        let channel_name = msg.get_channel_name().to_string();

        let channel = match ChannelName::parse(&channel_name) {
            Ok(channel) => channel,
            Err(e) => {
                log_warn!("{transport_id}: dropping message: {e}");
                return;
            }
        };

        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(err) => {
                log_warn!("{transport_id}: unreadable payload on {channel_name}: {err}");
                return;
            }
        };

        let wrapper = match serde_json::from_str::<ChannelPayload>(&payload) {
            Ok(wrapper) => wrapper,
            Err(err) => {
                log_warn!("{transport_id}: invalid message body on {channel_name}: {err}");
                return;
            }
        };

        self.base.deliver(wrapper.into_envelope(channel)).await;
    }
} // RedisActor

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    // ---

    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn bind_recipient(&self, topic: &Topic, recipient: &str) -> Result<()> {
        let channel = ChannelName::directed(topic, recipient);
        self.request(|resp| Cmd::Subscribe { channel, resp }).await
    }

    async fn bind_broadcast(&self, topic: &Topic) -> Result<()> {
        let channel = ChannelName::broadcast(topic);
        self.request(|resp| Cmd::Subscribe { channel, resp }).await
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

fn redis_url(settings: &RedisSettings) -> String {
    // ---
    match &settings.password {
        Some(password) => format!("redis://:{password}@{}:{}/", settings.host, settings.port),
        None => format!("redis://{}:{}/", settings.host, settings.port),
    }
}

/// Opens both Redis connections and starts the actor.
///
/// # Errors
///
/// Returns a transport error if the client cannot be created or either
/// connection fails (both are established eagerly).
pub async fn create_transport(base: TransportBase, settings: &RedisSettings) -> Result<TransportPtr> {
    // ---
    let transport_id = base.transport_id.clone();
    let endpoint = format!("{}:{}", settings.host, settings.port);
    let fail = |what: &str, err: redis::RedisError| {
        let msg = format!("redis: {what} to {endpoint} failed: {err}");
        log_error!("{transport_id}: {msg}");
        ProtonError::Transport(msg)
    };

    let client = redis::Client::open(redis_url(settings)).map_err(|err| fail("client open", err))?;

    let publish_conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|err| fail("publish connection", err))?;

    let (pubsub_sink, pubsub_stream) = client
        .get_async_pubsub()
        .await
        .map_err(|err| fail("pubsub connection", err))?
        .split();

    log_info!("{transport_id}: connected to Redis at {endpoint}");

    Ok(ChannelTransport::create(base, publish_conn, pubsub_sink, pubsub_stream))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn url_includes_password_only_when_set() {
        // ---
        let mut settings = RedisSettings {
            host: "cache".into(),
            port: 6379,
            password: None,
        };
        assert_eq!(redis_url(&settings), "redis://cache:6379/");

        settings.password = Some("hunter2".into());
        assert_eq!(redis_url(&settings), "redis://:hunter2@cache:6379/");
    }
}
