//! # Subscription Engine
//!
//! The orchestrator between the wire protocol and the event bus. The
//! connection manager hands it `start`, `stop`, and disconnect signals; it
//! resolves each start against the schema, installs filtered bus handlers,
//! and enqueues `data` frames on the connection's sink.
//!
//! Per-subscription failures surface as `error` frames bearing the client's
//! subscription id and never disturb other subscriptions or the connection.

pub mod errors;
pub mod registry;
pub mod sink;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::{Event, Handler, Subscriber};
use crate::protocol::{ServerFrame, StartPayload};
use crate::schema::{parse_subscription, ProjectionFn, SubscriptionSchema};

pub use errors::{StartError, StartResult};
pub use registry::{ReserveError, SubscriptionInstance, SubscriptionRegistry, SubscriptionState};
pub use sink::{DeliveryGate, FrameSink};

/// The write side of one connection, as the engine sees it.
#[derive(Clone)]
pub struct ConnectionHandle {
    /// Stable connection id
    pub connection_id: Uuid,

    /// Outbound frame queue
    pub sink: Arc<FrameSink>,
}

impl ConnectionHandle {
    /// Create a handle for a connection's sink
    pub fn new(connection_id: Uuid, sink: Arc<FrameSink>) -> Self {
        Self {
            connection_id,
            sink,
        }
    }
}

/// Orchestrates subscription lifecycle between connections and the bus.
pub struct SubscriptionEngine {
    subscriber: Subscriber,
    schema: Arc<SubscriptionSchema>,
    registry: SubscriptionRegistry,
}

impl SubscriptionEngine {
    /// Create an engine over a bus subscriber capability and a schema.
    pub fn new(
        subscriber: Subscriber,
        schema: Arc<SubscriptionSchema>,
        max_subscriptions_per_connection: usize,
    ) -> Self {
        Self {
            subscriber,
            schema,
            registry: SubscriptionRegistry::new(max_subscriptions_per_connection),
        }
    }

    /// Handle a `start` frame.
    ///
    /// On failure an `error` frame bearing `client_sub_id` is enqueued and
    /// no handlers are left installed.
    pub fn on_start(&self, conn: &ConnectionHandle, client_sub_id: &str, payload: &StartPayload) {
        if let Err(err) = self.try_start(conn, client_sub_id, payload) {
            debug!(
                connection = %conn.connection_id,
                subscription = client_sub_id,
                error = %err,
                "start rejected"
            );
            conn.sink.enqueue(ServerFrame::subscription_error(
                client_sub_id,
                err.kind(),
                err.to_string(),
            ));
        }
    }

    fn try_start(
        &self,
        conn: &ConnectionHandle,
        client_sub_id: &str,
        payload: &StartPayload,
    ) -> StartResult {
        let operation = parse_subscription(&payload.query, payload.operation_name.as_deref())?;
        let definition = self.schema.definition(&operation.field)?;
        let variables = definition.validate_variables(payload.variables.as_ref())?;

        let gate = self
            .registry
            .reserve(conn.connection_id, client_sub_id, definition.name)
            .map_err(|err| match err {
                ReserveError::Duplicate => {
                    StartError::DuplicateSubscription(client_sub_id.to_string())
                }
                ReserveError::CapReached(max) => StartError::TooManySubscriptions(max),
            })?;

        let filters = match catch_unwind(AssertUnwindSafe(|| (definition.setup)(&variables))) {
            Ok(filters) => filters,
            Err(_) => {
                warn!(
                    subscription = definition.name,
                    "subscription setup panicked"
                );
                self.registry.remove(conn.connection_id, client_sub_id);
                return Err(StartError::Internal);
            }
        };

        let mut tokens = Vec::with_capacity(filters.len());
        for (topic, filter) in filters {
            let handler = delivery_handler(
                Arc::clone(&conn.sink),
                Arc::clone(&gate),
                client_sub_id.to_string(),
                filter,
                definition.projection,
                definition.name,
            );
            tokens.push(self.subscriber.subscribe(topic, handler));
        }

        if !self.registry.activate(conn.connection_id, client_sub_id, tokens.clone()) {
            // The connection dropped between reserve and activation.
            for token in tokens {
                self.subscriber.unsubscribe(token);
            }
            return Ok(());
        }

        debug!(
            connection = %conn.connection_id,
            subscription = client_sub_id,
            name = definition.name,
            "subscription started"
        );
        Ok(())
    }

    /// Handle a `stop` frame. Idempotent: unknown ids are ignored.
    ///
    /// After this returns, no further `data` frame for the id is enqueued;
    /// `complete` is the last frame bearing it.
    pub fn on_stop(&self, conn: &ConnectionHandle, client_sub_id: &str) {
        let Some(mut instance) = self.registry.remove(conn.connection_id, client_sub_id) else {
            return;
        };

        for token in instance.handlers() {
            self.subscriber.unsubscribe(*token);
        }
        conn.sink.complete(instance.gate(), client_sub_id);
        instance.mark_terminated();

        debug!(
            connection = %conn.connection_id,
            subscription = client_sub_id,
            "subscription stopped"
        );
    }

    /// Tear down every subscription of a closed connection. No frames are
    /// emitted. Called exactly once per connection.
    pub fn on_disconnect(&self, connection_id: Uuid) {
        let instances = self.registry.remove_all(connection_id);
        let count = instances.len();

        for mut instance in instances {
            for token in instance.handlers() {
                self.subscriber.unsubscribe(*token);
            }
            instance.mark_terminated();
        }

        if count > 0 {
            debug!(connection = %connection_id, subscriptions = count, "connection cleaned up");
        }
    }

    /// Number of live subscriptions on a connection
    pub fn subscription_count(&self, connection_id: Uuid) -> usize {
        self.registry.count(connection_id)
    }
}

/// Build the bus handler for one `(topic, instance)` pair: evaluate the
/// filter, project on match, enqueue through the gate. Filter and
/// projection failures are logged and dropped; they never reach the
/// publisher.
fn delivery_handler(
    sink: Arc<FrameSink>,
    gate: Arc<DeliveryGate>,
    client_sub_id: String,
    filter: crate::schema::FilterFn,
    projection: ProjectionFn,
    name: &'static str,
) -> Handler {
    Arc::new(move |event: &Event| {
        let matched = catch_unwind(AssertUnwindSafe(|| filter(event.payload()))).unwrap_or_else(
            |_| {
                warn!(subscription = name, topic = %event.topic(), "filter panicked; event dropped");
                false
            },
        );
        if !matched {
            return;
        }

        let payload: Value =
            match catch_unwind(AssertUnwindSafe(|| projection(event.payload()))) {
                Ok(value) => value,
                Err(_) => {
                    warn!(subscription = name, topic = %event.topic(), "projection panicked; event dropped");
                    return;
                }
            };

        sink.enqueue_data(&gate, &client_sub_id, payload);
    })
}
