//! In-memory transport implementation.
//!
//! A pure in-process stand-in for the header-exchange broker. It is intended
//! for tests and single-process deployments, and serves as the reference for
//! the addressing semantics the network transports must reproduce.
//!
//! ## Reference Semantics
//!
//! - Every transport owns one anonymous "queue" on the hub.
//! - `bind_*` records a [`HeaderBinding`] for that queue; binding the same
//!   attributes twice is a no-op.
//! - A publish computes the message headers and delivers **one copy per
//!   queue** that has at least one matching binding, including the
//!   publisher's own queue.
//! - Once a bind call returns, later publishes to that address are
//!   deliverable. Delivery order per publisher is preserved.
//! - `close()` removes only the closing transport's queue. Dropping the
//!   transport does the same, and a queue whose inbox has gone away is
//!   pruned on the next publish that reaches it.
//!
//! ## Non-Goals
//!
//! No persistence, no redelivery, no emulation of broker failure modes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::RwLock;

use crate::{
    // ---
    log_debug,
    publish_headers,
    DeliverySink,
    Envelope,
    Exchange,
    HeaderBinding,
    Result,
    Topic,
    Transport,
    TransportBase,
    TransportPtr,
};

type QueueId = u64;

struct Queue {
    // ---
    owner: String,
    sink: DeliverySink,
    bindings: HashSet<HeaderBinding>,
}

/// Shared message bus for the in-memory transport.
///
/// All transports created on the same hub see each other's traffic, exactly
/// as sessions connected to the same broker would. Tests that run in
/// parallel should each construct their own hub.
///
/// ```
/// # use proton::{MemoryHub, ProtonConfig};
/// let hub = MemoryHub::new();
/// let server = ProtonConfig::memory("server", ["workers"], hub.clone());
/// let client = ProtonConfig::memory("client", Vec::<String>::new(), hub);
/// # let _ = (server, client);
/// ```
pub struct MemoryHub {
    // ---
    next_queue: AtomicU64,
    queues: RwLock<HashMap<QueueId, Queue>>,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of live queues (open transports) on the hub.
    pub async fn queue_count(&self) -> usize {
        self.queues.read().await.len()
    }

    async fn open_queue(&self, owner: &str, sink: DeliverySink) -> QueueId {
        // ---
        let id = self.next_queue.fetch_add(1, Ordering::Relaxed);
        log_debug!("{owner}: open memory queue #{id}");

        let queue = Queue {
            owner: owner.to_string(),
            sink,
            bindings: HashSet::new(),
        };
        self.queues.write().await.insert(id, queue);
        id
    }

    async fn bind(&self, queue: QueueId, binding: HeaderBinding) {
        // ---
        let mut queues = self.queues.write().await;
        if let Some(q) = queues.get_mut(&queue) {
            if q.bindings.insert(binding) {
                log_debug!("{}: bound queue #{queue}", q.owner);
            }
        }
    }

    async fn publish(&self, env: Envelope) {
        // ---
        let exchange = Exchange::for_envelope(&env);
        let headers = publish_headers(&env);

        // Collect sinks first so no lock is held while a full inbox applies
        // backpressure.
        let targets: Vec<(QueueId, String, DeliverySink)> = {
            let queues = self.queues.read().await;
            let mut matched: Vec<(&QueueId, &Queue)> = queues
                .iter()
                .filter(|(_, q)| q.bindings.iter().any(|b| b.matches(exchange, &headers)))
                .collect();
            matched.sort_by_key(|(id, _)| **id);
            matched
                .into_iter()
                .map(|(id, q)| (*id, q.owner.clone(), q.sink.clone()))
                .collect()
        };

        log_debug!(
            "{}: publish {} to {} queue(s) on {}",
            env.sender_name,
            env.topic,
            targets.len(),
            exchange.name()
        );

        let mut dead = Vec::new();
        for (id, _owner, sink) in targets {
            if sink.send(env.clone()).await.is_err() {
                log_debug!("{_owner}: inbox closed, dropping copy");
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut queues = self.queues.write().await;
            for id in dead {
                queues.remove(&id);
            }
        }
    }

    async fn close_queue(&self, queue: QueueId) {
        // ---
        if let Some(q) = self.queues.write().await.remove(&queue) {
            log_debug!("{}: closed memory queue #{queue}", q.owner);
        }
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        // ---
        Self {
            next_queue: AtomicU64::new(0),
            queues: RwLock::new(HashMap::new()),
        }
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

/// The hub shared by every session that does not name its own.
pub fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport.
struct MemoryTransport {
    // ---
    base: TransportBase,
    hub: Arc<MemoryHub>,
    queue: QueueId,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn bind_recipient(&self, topic: &Topic, recipient: &str) -> Result<()> {
        self.hub
            .bind(self.queue, HeaderBinding::recipient(topic, recipient))
            .await;
        Ok(())
    }

    async fn bind_broadcast(&self, topic: &Topic) -> Result<()> {
        self.hub
            .bind(self.queue, HeaderBinding::broadcast(topic))
            .await;
        Ok(())
    }

    async fn send_directed(&self, env: Envelope) -> Result<()> {
        self.hub.publish(env).await;
        Ok(())
    }

    async fn send_broadcast(&self, env: Envelope) -> Result<()> {
        self.hub.publish(env).await;
        Ok(())
    }

    /// Remove this transport's queue and bindings. Other transports on the
    /// same hub are unaffected.
    async fn close(&self) -> Result<()> {
        self.hub.close_queue(self.queue).await;
        Ok(())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        // ---
        if let Ok(mut queues) = self.hub.queues.try_write() {
            if queues.remove(&self.queue).is_some() {
                log_debug!("{}: dropped memory queue #{}", self.base.transport_id, self.queue);
            }
            return;
        }

        // Lock is busy; finish the removal on the runtime if there is one,
        // otherwise the next publish to this queue prunes it.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let hub = Arc::clone(&self.hub);
            let queue = self.queue;
            handle.spawn(async move { hub.close_queue(queue).await });
        }
    }
}

/// Create a new in-memory transport on the process-global hub.
///
/// # Errors
///
/// Currently infallible.
pub async fn create_memory_transport(base: TransportBase) -> Result<TransportPtr> {
    create_memory_transport_with_hub(base, global_hub()).await
}

/// Create a new in-memory transport on `hub`.
///
/// # Errors
///
/// Currently infallible.
pub async fn create_memory_transport_with_hub(
    base: TransportBase,
    hub: Arc<MemoryHub>,
) -> Result<TransportPtr> {
    // ---
    let queue = hub.open_queue(&base.transport_id, base.sink.clone()).await;

    Ok(Arc::new(MemoryTransport { base, hub, queue }))
}
