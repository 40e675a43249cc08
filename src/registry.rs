//! Per-session handler registry.
//!
//! Maps each [`Topic`] to the one payload type it is bound to and the ordered
//! list of handlers registered for it. Entries are append-only: a topic is
//! never unbound or rebound to another type for the lifetime of a session.
//!
//! ## Type binding
//!
//! The first registration on a topic fixes its [`PayloadType`]. Later
//! registrations must use the same canonical type or are rejected with
//! [`ProtonError::TypeConflict`], leaving the registry untouched. Primitive
//! numerics, `bool` and `char` canonicalise through `Box`/`Arc`, so a handler
//! taking `i32` and one taking `Box<i32>` can share a topic.
//!
//! ## Concurrency
//!
//! Registration (API callers) and lookup (the dispatch task) run
//! concurrently. The topic map sits behind an `RwLock`; each entry's handler
//! list sits behind its own lock and is fully built before it is published
//! into the map, so a lookup never observes a half-made entry.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{ExecutionLane, MessageAttributes, ProtonError, Result, Task, Topic};

/// Types that can travel as a message payload.
///
/// Blanket-implemented; payloads are JSON-encoded with `serde_json`.
pub trait Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Explicit descriptor of a payload type, used for the single-type-per-topic
/// check on registration and on send.
#[derive(Clone, Copy)]
pub struct PayloadType {
    // ---
    id: TypeId,
    name: &'static str,
}

impl PayloadType {
    // ---
    /// Canonical descriptor for `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        // ---
        let id = TypeId::of::<T>();
        canonical_primitive(id).unwrap_or(Self {
            id,
            name: type_name::<T>(),
        })
    }

    /// Readable type name, for diagnostics only.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for PayloadType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PayloadType {}

impl fmt::Debug for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

fn canonical_primitive(id: TypeId) -> Option<PayloadType> {
    // ---
    macro_rules! canonical {
        ($($p:ty),* $(,)?) => {
            $(
                if id == TypeId::of::<$p>()
                    || id == TypeId::of::<Box<$p>>()
                    || id == TypeId::of::<Arc<$p>>()
                {
                    return Some(PayloadType {
                        id: TypeId::of::<$p>(),
                        name: type_name::<$p>(),
                    });
                }
            )*
        };
    }

    canonical!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool, char);
    None
}

/// Payload decoded once per message with the topic's bound type.
pub(crate) struct Decoded<'a> {
    pub raw: &'a [u8],
    pub value: Arc<dyn Any + Send + Sync>,
}

type Decoder = fn(&[u8]) -> serde_json::Result<Arc<dyn Any + Send + Sync>>;

fn decode_as<T: Payload>(raw: &[u8]) -> serde_json::Result<Arc<dyn Any + Send + Sync>> {
    Ok(Arc::new(serde_json::from_slice::<T>(raw)?))
}

type Prepare = dyn Fn(&Decoded<'_>, MessageAttributes) -> serde_json::Result<Task> + Send + Sync;

/// One registered callback plus the lane it runs on.
pub(crate) struct HandlerSlot {
    // ---
    pub lane: ExecutionLane,
    prepare: Box<Prepare>,
}

impl HandlerSlot {
    // ---
    fn new<T, F>(lane: ExecutionLane, callback: F) -> Self
    where
        T: Payload,
        F: Fn(T, &MessageAttributes) + Send + Sync + 'static,
    {
        // ---
        let callback = Arc::new(callback);

        let prepare = move |decoded: &Decoded<'_>, attrs: MessageAttributes| {
            // A canonical sibling (e.g. Box<i32> on an i32 topic) re-decodes
            // from the raw bytes; the JSON form is identical.
            let payload: T = match decoded.value.downcast_ref::<T>() {
                Some(value) => value.clone(),
                None => serde_json::from_slice(decoded.raw)?,
            };

            let callback = Arc::clone(&callback);
            let task: Task = Box::new(move || callback(payload, &attrs));
            Ok(task)
        };

        Self {
            lane,
            prepare: Box::new(prepare),
        }
    }

    /// Build the task that invokes this handler for one message.
    pub(crate) fn prepare(
        &self,
        decoded: &Decoded<'_>,
        attrs: MessageAttributes,
    ) -> serde_json::Result<Task> {
        (self.prepare)(decoded, attrs)
    }
}

/// Registry entry for one topic.
pub struct TopicBinding {
    // ---
    payload_type: PayloadType,
    decode: Decoder,
    handlers: RwLock<Vec<Arc<HandlerSlot>>>,
}

impl TopicBinding {
    // ---
    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    pub fn handler_count(&self) -> usize {
        read_ignore_poison(&self.handlers).len()
    }

    pub(crate) fn decode<'a>(&self, raw: &'a [u8]) -> serde_json::Result<Decoded<'a>> {
        Ok(Decoded {
            raw,
            value: (self.decode)(raw)?,
        })
    }

    /// Snapshot of the handlers in registration order.
    pub(crate) fn handlers(&self) -> Vec<Arc<HandlerSlot>> {
        read_ignore_poison(&self.handlers).clone()
    }
}

/// Result of a successful [`HandlerRegistry::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// First handler on this topic; transport addresses must be bound.
    NewTopic,
    /// Added to an existing topic.
    Appended,
}

/// Topic → (payload type, handlers) map.
#[derive(Default)]
pub struct HandlerRegistry {
    // ---
    topics: RwLock<HashMap<Topic, Arc<TopicBinding>>>,
}

impl HandlerRegistry {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload type bound to `topic`, if any.
    pub fn bound_type(&self, topic: &Topic) -> Option<PayloadType> {
        read_ignore_poison(&self.topics)
            .get(topic)
            .map(|binding| binding.payload_type)
    }

    /// Check that `T` may be registered on `topic` without committing.
    ///
    /// Returns `true` if the topic is not bound yet.
    pub fn check<T: Payload>(&self, topic: &Topic) -> Result<bool> {
        // ---
        let requested = PayloadType::of::<T>();
        match self.bound_type(topic) {
            None => Ok(true),
            Some(bound) if bound == requested => Ok(false),
            Some(bound) => Err(conflict(topic, bound, requested)),
        }
    }

    /// Register `callback` for `topic`.
    ///
    /// # Errors
    ///
    /// [`ProtonError::TypeConflict`] if the topic is bound to another type;
    /// nothing is committed in that case.
    pub fn bind<T, F>(&self, topic: &Topic, lane: ExecutionLane, callback: F) -> Result<BindOutcome>
    where
        T: Payload,
        F: Fn(T, &MessageAttributes) + Send + Sync + 'static,
    {
        // ---
        let requested = PayloadType::of::<T>();
        let slot = Arc::new(HandlerSlot::new::<T, F>(lane, callback));

        let mut topics = write_ignore_poison(&self.topics);

        if let Some(binding) = topics.get(topic) {
            if binding.payload_type != requested {
                return Err(conflict(topic, binding.payload_type, requested));
            }
            write_ignore_poison(&binding.handlers).push(slot);
            return Ok(BindOutcome::Appended);
        }

        let binding = TopicBinding {
            payload_type: requested,
            decode: decode_as::<T>,
            handlers: RwLock::new(vec![slot]),
        };
        topics.insert(topic.clone(), Arc::new(binding));
        Ok(BindOutcome::NewTopic)
    }

    /// Entry for `topic`, if any handler is registered.
    pub fn lookup(&self, topic: &Topic) -> Option<Arc<TopicBinding>> {
        read_ignore_poison(&self.topics).get(topic).cloned()
    }

    /// Topics with at least one handler.
    pub fn topics(&self) -> Vec<Topic> {
        read_ignore_poison(&self.topics).keys().cloned().collect()
    }
}

fn conflict(topic: &Topic, bound: PayloadType, requested: PayloadType) -> ProtonError {
    ProtonError::TypeConflict {
        topic: topic.format(),
        bound: bound.name(),
        requested: requested.name(),
    }
}

/// Acquire read guard, ignoring poisoning
fn read_ignore_poison<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Acquire write guard, ignoring poisoning
fn write_ignore_poison<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Greeting {
        text: String,
    }

    fn topic() -> Topic {
        Topic::new("chat", "greeting").unwrap()
    }

    #[test]
    fn boxed_primitives_are_canonical() {
        // ---
        assert_eq!(PayloadType::of::<i32>(), PayloadType::of::<Box<i32>>());
        assert_eq!(PayloadType::of::<bool>(), PayloadType::of::<Arc<bool>>());
        assert_eq!(PayloadType::of::<Box<char>>().name(), "char");
        assert_ne!(PayloadType::of::<i32>(), PayloadType::of::<i64>());
        assert_ne!(PayloadType::of::<String>(), PayloadType::of::<Box<String>>());
    }

    #[test]
    fn first_bind_is_new_then_appends() {
        // ---
        let registry = HandlerRegistry::new();

        let first = registry.bind(&topic(), ExecutionLane::Background, |_: Greeting, _| {});
        let second = registry.bind(&topic(), ExecutionLane::Foreground, |_: Greeting, _| {});

        assert_eq!(first.unwrap(), BindOutcome::NewTopic);
        assert_eq!(second.unwrap(), BindOutcome::Appended);

        let binding = registry.lookup(&topic()).unwrap();
        assert_eq!(binding.handler_count(), 2);
        assert_eq!(binding.payload_type(), PayloadType::of::<Greeting>());

        let lanes: Vec<_> = binding.handlers().iter().map(|h| h.lane).collect();
        assert_eq!(lanes, vec![ExecutionLane::Background, ExecutionLane::Foreground]);
    }

    #[test]
    fn conflicting_type_is_rejected_without_side_effects() {
        // ---
        let registry = HandlerRegistry::new();
        registry
            .bind(&topic(), ExecutionLane::Background, |_: i32, _| {})
            .unwrap();

        let err = registry
            .bind(&topic(), ExecutionLane::Background, |_: char, _| {})
            .unwrap_err();

        assert!(matches!(err, ProtonError::TypeConflict { bound: "i32", requested: "char", .. }));
        assert!(matches!(registry.check::<char>(&topic()), Err(ProtonError::TypeConflict { .. })));
        assert_eq!(registry.lookup(&topic()).unwrap().handler_count(), 1);
        assert_eq!(registry.bound_type(&topic()), Some(PayloadType::of::<i32>()));
    }

    #[test]
    fn boxed_and_plain_share_a_topic() {
        // ---
        let registry = HandlerRegistry::new();
        registry
            .bind(&topic(), ExecutionLane::Background, |_: i32, _| {})
            .unwrap();

        assert!(!registry.check::<Box<i32>>(&topic()).unwrap());
        assert_eq!(
            registry
                .bind(&topic(), ExecutionLane::Background, |_: Box<i32>, _| {})
                .unwrap(),
            BindOutcome::Appended
        );
    }

    #[test]
    fn decode_feeds_every_canonical_sibling() {
        // ---
        use std::sync::atomic::{AtomicI64, Ordering};

        let registry = HandlerRegistry::new();
        let sum = Arc::new(AtomicI64::new(0));

        let s1 = Arc::clone(&sum);
        registry
            .bind(&topic(), ExecutionLane::Background, move |v: i32, _| {
                s1.fetch_add(v as i64, Ordering::SeqCst);
            })
            .unwrap();
        let s2 = Arc::clone(&sum);
        registry
            .bind(&topic(), ExecutionLane::Background, move |v: Box<i32>, _| {
                s2.fetch_add(*v as i64 * 10, Ordering::SeqCst);
            })
            .unwrap();

        let binding = registry.lookup(&topic()).unwrap();
        let decoded = binding.decode(b"4").unwrap();
        let attrs = MessageAttributes::new(&topic(), "sender", uuid::Uuid::nil());

        for slot in binding.handlers() {
            slot.prepare(&decoded, attrs.clone()).unwrap()();
        }
        assert_eq!(sum.load(Ordering::SeqCst), 44);

        assert!(binding.decode(b"\"not a number\"").is_err());
    }

    #[test]
    fn check_on_unbound_topic_is_new() {
        // ---
        let registry = HandlerRegistry::new();
        assert!(registry.check::<Greeting>(&topic()).unwrap());
        assert!(registry.lookup(&topic()).is_none());
        assert!(registry.topics().is_empty());
    }
    #[test]
    fn lookups_during_concurrent_binds_see_whole_entries() {
        // ---
        const WRITERS: usize = 8;
        let registry = Arc::new(HandlerRegistry::new());
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let reader = {
            let registry = Arc::clone(&registry);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut last = 0;
                while !done.load(std::sync::atomic::Ordering::SeqCst) {
                    if let Some(binding) = registry.lookup(&topic()) {
                        assert_eq!(binding.payload_type(), PayloadType::of::<Greeting>());
                        let count = binding.handlers().len();
                        assert!(count >= 1 && count >= last, "count went from {last} to {count}");
                        last = count;
                    }
                }
            })
        };

        let writers: Vec<_> = (0..WRITERS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry
                        .bind::<Greeting, _>(&topic(), ExecutionLane::Background, |_, _| {})
                        .unwrap();
                    // A conflicting type never replaces the entry.
                    assert!(registry
                        .bind::<i32, _>(&topic(), ExecutionLane::Background, |_, _| {})
                        .is_err());
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, std::sync::atomic::Ordering::SeqCst);
        reader.join().unwrap();

        let binding = registry.lookup(&topic()).unwrap();
        assert_eq!(binding.handler_count(), WRITERS);
        assert_eq!(binding.payload_type(), PayloadType::of::<Greeting>());
    }
}
