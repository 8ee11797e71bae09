//! # Event Bus
//!
//! Topic-keyed in-process publish/subscribe. Mutation resolvers publish
//! events after a successful write; the subscription engine installs one
//! handler per `(topic, subscription instance)`.
//!
//! Delivery is synchronous with respect to the publisher: `publish` returns
//! only after every handler registered at entry has been invoked. A handler
//! registered during a publish does not receive that publication. One
//! failing handler never prevents invocation of the others and never
//! propagates to the publisher.
//!
//! The bus is owned by the server root and handed out as two narrow
//! capabilities: [`Publisher`] for mutation resolvers, [`Subscriber`] for
//! the engine.

pub mod errors;
pub mod event;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::error;

pub use errors::{BusError, BusResult};
pub use event::{Event, EventPayload, Topic};

/// A bus handler. Invoked synchronously for every matching publication.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Detach handle returned by `subscribe`. The only way to remove a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerToken {
    topic: Topic,
    id: u64,
}

impl HandlerToken {
    /// Topic the handler was registered on
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

/// Per-topic handler table and publication lock.
struct TopicChannel {
    /// Handlers in registration order
    handlers: RwLock<Vec<(u64, Handler)>>,

    /// Serializes publications on this topic
    dispatch: Mutex<()>,
}

impl TopicChannel {
    fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            dispatch: Mutex::new(()),
        }
    }
}

/// In-process event bus over the declared topic set.
pub struct EventBus {
    channels: HashMap<Topic, TopicChannel>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with a channel per declared topic
    pub fn new() -> Self {
        let channels = Topic::ALL
            .into_iter()
            .map(|t| (t, TopicChannel::new()))
            .collect();

        Self {
            channels,
            next_id: AtomicU64::new(1),
        }
    }

    fn channel(&self, topic: Topic) -> &TopicChannel {
        // Every Topic variant has an entry; the map is built from Topic::ALL.
        &self.channels[&topic]
    }

    /// Register a handler on a topic.
    pub fn subscribe(&self, topic: Topic, handler: Handler) -> HandlerToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut handlers) = self.channel(topic).handlers.write() {
            handlers.push((id, handler));
        }
        HandlerToken { topic, id }
    }

    /// Detach a handler. Idempotent.
    ///
    /// After this returns, the handler is not invoked for any subsequent
    /// publication. A publication already mid-dispatch may still invoke it.
    pub fn unsubscribe(&self, token: HandlerToken) {
        if let Ok(mut handlers) = self.channel(token.topic).handlers.write() {
            handlers.retain(|(id, _)| *id != token.id);
        }
    }

    /// Publish an event to every handler on its topic.
    ///
    /// Never fails. Handler panics are caught and logged.
    pub fn publish(&self, event: &Event) {
        let channel = self.channel(event.topic());

        // Publications on one topic are serialized; handlers see per-topic
        // publication order.
        let _order = match channel.dispatch.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let snapshot: Vec<(u64, Handler)> = match channel.handlers.read() {
            Ok(handlers) => handlers.clone(),
            Err(_) => return,
        };

        for (id, handler) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(
                    topic = %event.topic(),
                    handler = id,
                    "subscription handler panicked during dispatch"
                );
            }
        }
    }

    /// Number of handlers currently registered on a topic
    pub fn handler_count(&self, topic: Topic) -> usize {
        self.channel(topic)
            .handlers
            .read()
            .map(|h| h.len())
            .unwrap_or(0)
    }
}

/// Split a shared bus into its two capabilities.
pub fn split(bus: &Arc<EventBus>) -> (Publisher, Subscriber) {
    (
        Publisher {
            bus: Arc::clone(bus),
        },
        Subscriber {
            bus: Arc::clone(bus),
        },
    )
}

/// Publish-only capability, handed to mutation resolvers.
///
/// Contract: publish exactly one event per successful write, after the
/// write completes; publish nothing on failure.
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<EventBus>,
}

impl Publisher {
    /// Publish an event to its topic
    pub fn publish(&self, event: &Event) {
        self.bus.publish(event);
    }
}

/// Subscribe-only capability, handed to the subscription engine.
#[derive(Clone)]
pub struct Subscriber {
    bus: Arc<EventBus>,
}

impl Subscriber {
    /// Register a handler on a topic
    pub fn subscribe(&self, topic: Topic, handler: Handler) -> HandlerToken {
        self.bus.subscribe(topic, handler)
    }

    /// Detach a handler. Idempotent.
    pub fn unsubscribe(&self, token: HandlerToken) {
        self.bus.unsubscribe(token)
    }

    /// Number of handlers currently registered on a topic
    pub fn handler_count(&self, topic: Topic) -> usize {
        self.bus.handler_count(topic)
    }
}
