//! Inbound message dispatch.
//!
//! Transports push envelopes into the session inbox; a single dispatch task
//! drains it and calls [`DispatchEngine::dispatch`] for each one. Dispatch
//! itself never runs user code: every handler invocation is submitted to the
//! session's [`SchedulerAdapter`] on the handler's lane.
//!
//! Per envelope:
//!
//! 1. a broadcast that this session sent itself is dropped
//! 2. a topic with no registered handler is logged and dropped
//! 3. the payload is decoded once with the topic's bound type; a decode
//!    failure drops the message
//! 4. every handler gets its own task, in registration order
//!
//! A panicking handler is contained inside its task and cannot affect other
//! handlers or later messages.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use uuid::Uuid;

use crate::{
    // ---
    log_debug,
    log_error,
    log_warn,
    registry::HandlerRegistry,
    DeliveryInbox,
    Envelope,
    SchedulerPtr,
    Task,
    Topic,
};

/// Metadata handed to every handler alongside the payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageAttributes {
    // ---
    namespace: String,
    subject: String,
    sender_name: Arc<str>,
    sender_id: Uuid,
}

impl MessageAttributes {
    // ---
    pub fn new(topic: &Topic, sender_name: impl Into<Arc<str>>, sender_id: Uuid) -> Self {
        Self {
            namespace: topic.namespace().to_string(),
            subject: topic.subject().to_string(),
            sender_name: sender_name.into(),
            sender_id,
        }
    }

    fn from_envelope(env: &Envelope) -> Self {
        Self::new(&env.topic, Arc::clone(&env.sender_name), env.sender_id)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Client name of the sending session.
    pub fn sender_name(&self) -> &str {
        &self.sender_name
    }

    /// Per-session id of the sender.
    pub fn sender_id(&self) -> Uuid {
        self.sender_id
    }
}

/// Routes inbound envelopes to registered handlers.
pub struct DispatchEngine {
    // ---
    own_id: Uuid,
    transport_id: String,
    registry: Arc<HandlerRegistry>,
    scheduler: SchedulerPtr,
}

impl DispatchEngine {
    // ---
    pub fn new(
        own_id: Uuid,
        transport_id: impl Into<String>,
        registry: Arc<HandlerRegistry>,
        scheduler: SchedulerPtr,
    ) -> Self {
        Self {
            own_id,
            transport_id: transport_id.into(),
            registry,
            scheduler,
        }
    }

    /// Drain `inbox` until every sender is dropped.
    pub async fn run(self, mut inbox: DeliveryInbox) {
        // ---
        while let Some(env) = inbox.recv().await {
            self.dispatch(env);
        }
        log_debug!("{}: dispatch loop finished", self.transport_id);
    }

    /// Dispatch one envelope.
    pub fn dispatch(&self, env: Envelope) {
        // ---
        if env.is_broadcast() && env.sender_id == self.own_id {
            log_debug!(
                "{}: ignoring own broadcast on {}",
                self.transport_id,
                env.topic
            );
            return;
        }

        let Some(binding) = self.registry.lookup(&env.topic) else {
            log_warn!(
                "{}: no handler registered for topic {}, dropping message from {}",
                self.transport_id,
                env.topic,
                env.sender_name
            );
            return;
        };

        let decoded = match binding.decode(&env.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                log_error!(
                    "{}: cannot decode {} payload on {}: {}",
                    self.transport_id,
                    binding.payload_type().name(),
                    env.topic,
                    e
                );
                return;
            }
        };

        let attrs = MessageAttributes::from_envelope(&env);

        for handler in binding.handlers() {
            // ---
            let task = match handler.prepare(&decoded, attrs.clone()) {
                Ok(task) => task,
                Err(e) => {
                    log_error!(
                        "{}: handler on {} cannot decode payload: {}",
                        self.transport_id,
                        env.topic,
                        e
                    );
                    continue;
                }
            };

            handler
                .lane
                .submit(self.scheduler.as_ref(), contain_panic(task, &env.topic));
        }
    }
}

fn contain_panic(task: Task, topic: &Topic) -> Task {
    // ---
    let topic = topic.format();
    Box::new(move || {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            log_error!("handler for {} panicked", topic);
        }
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{ClientIdentity, ExecutionLane, SchedulerAdapter};
    use bytes::Bytes;
    use std::sync::Mutex;

    /// Runs every task immediately and records which lane it came through.
    #[derive(Default)]
    struct InlineScheduler {
        lanes: Mutex<Vec<ExecutionLane>>,
    }

    impl SchedulerAdapter for InlineScheduler {
        fn run_task(&self, task: Task) {
            self.lanes.lock().unwrap().push(ExecutionLane::Foreground);
            task();
        }

        fn run_task_asynchronously(&self, task: Task) {
            self.lanes.lock().unwrap().push(ExecutionLane::Background);
            task();
        }
    }

    struct Fixture {
        me: ClientIdentity,
        other: ClientIdentity,
        registry: Arc<HandlerRegistry>,
        scheduler: Arc<InlineScheduler>,
        engine: DispatchEngine,
    }

    fn fixture() -> Fixture {
        // ---
        let me = ClientIdentity::new("client1", ["commonGroup"]).unwrap();
        let other = ClientIdentity::new("client2", ["commonGroup"]).unwrap();
        let registry = Arc::new(HandlerRegistry::new());
        let scheduler = Arc::new(InlineScheduler::default());
        let engine = DispatchEngine::new(
            me.id(),
            me.name(),
            Arc::clone(&registry),
            scheduler.clone(),
        );
        Fixture {
            me,
            other,
            registry,
            scheduler,
            engine,
        }
    }

    fn topic() -> Topic {
        Topic::new("test-namespace", "test-subject").unwrap()
    }

    fn record(registry: &HandlerRegistry, lane: ExecutionLane) -> Arc<Mutex<Vec<(String, String)>>> {
        // ---
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry
            .bind(&topic(), lane, move |text: String, attrs: &MessageAttributes| {
                sink.lock().unwrap().push((text, attrs.sender_name().to_string()));
            })
            .unwrap();
        seen
    }

    fn payload(text: &str) -> Bytes {
        Bytes::from(serde_json::to_vec(text).unwrap())
    }

    #[test]
    fn own_broadcast_is_suppressed_but_own_directed_is_not() {
        // ---
        let f = fixture();
        let seen = record(&f.registry, ExecutionLane::Background);

        f.engine
            .dispatch(Envelope::broadcast(&f.me, topic(), payload("echo")));
        assert!(seen.lock().unwrap().is_empty());

        f.engine
            .dispatch(Envelope::directed(&f.me, "client1", topic(), payload("self")));
        f.engine
            .dispatch(Envelope::broadcast(&f.other, topic(), payload("hello")));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("self".to_string(), "client1".to_string()),
                ("hello".to_string(), "client2".to_string()),
            ]
        );
    }

    #[test]
    fn every_handler_runs_once_on_its_lane() {
        // ---
        let f = fixture();
        let a = record(&f.registry, ExecutionLane::Foreground);
        let b = record(&f.registry, ExecutionLane::Background);

        f.engine
            .dispatch(Envelope::directed(&f.other, "commonGroup", topic(), payload("x")));

        assert_eq!(a.lock().unwrap().len(), 1);
        assert_eq!(b.lock().unwrap().len(), 1);
        assert_eq!(
            *f.scheduler.lanes.lock().unwrap(),
            vec![ExecutionLane::Foreground, ExecutionLane::Background]
        );
    }

    #[test]
    fn unknown_topic_and_bad_payload_are_dropped() {
        // ---
        let f = fixture();
        let seen = record(&f.registry, ExecutionLane::Background);

        let elsewhere = Topic::new("test-namespace", "other").unwrap();
        f.engine
            .dispatch(Envelope::broadcast(&f.other, elsewhere, payload("x")));
        f.engine.dispatch(Envelope::broadcast(
            &f.other,
            topic(),
            Bytes::from_static(b"{not json"),
        ));

        assert!(seen.lock().unwrap().is_empty());
        assert!(f.scheduler.lanes.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_handler_does_not_stop_the_next() {
        // ---
        let f = fixture();
        f.registry
            .bind(&topic(), ExecutionLane::Background, |_: String, _| {
                panic!("handler failure");
            })
            .unwrap();
        let seen = record(&f.registry, ExecutionLane::Background);

        f.engine
            .dispatch(Envelope::broadcast(&f.other, topic(), payload("still here")));
        f.engine
            .dispatch(Envelope::broadcast(&f.other, topic(), payload("and again")));

        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn run_drains_inbox_until_closed() {
        // ---
        let f = fixture();
        let seen = record(&f.registry, ExecutionLane::Background);
        let (sink, inbox) = crate::delivery_channel();

        let task = tokio::spawn(f.engine.run(inbox));
        sink.send(Envelope::broadcast(&f.other, topic(), payload("one")))
            .await
            .unwrap();
        drop(sink);
        task.await.unwrap();

        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
