//! # Subscription Registry
//!
//! The single authority for subscription lifecycle state. Keyed by
//! connection id, holding a map from client-chosen subscription id to
//! instance. All transitions for one connection are serialized behind one
//! structural lock; nothing slow runs under it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::bus::HandlerToken;

use super::sink::DeliveryGate;

/// Lifecycle state of a subscription instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Reserved; handlers not yet installed
    Pending,
    /// Handlers installed and delivering
    Active,
    /// Removed from the registry; handlers being detached
    Stopping,
    /// Fully torn down; no outstanding handlers
    Terminated,
}

/// A live binding of a subscription name to one connection and client id.
#[derive(Debug)]
pub struct SubscriptionInstance {
    connection_id: Uuid,
    client_sub_id: String,
    name: &'static str,
    state: SubscriptionState,
    handlers: Vec<HandlerToken>,
    gate: Arc<DeliveryGate>,
}

impl SubscriptionInstance {
    fn new(connection_id: Uuid, client_sub_id: String, name: &'static str) -> Self {
        Self {
            connection_id,
            client_sub_id,
            name,
            state: SubscriptionState::Pending,
            handlers: Vec::new(),
            gate: Arc::new(DeliveryGate::new()),
        }
    }

    /// Connection this instance is bound to
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Client-chosen subscription id
    pub fn client_sub_id(&self) -> &str {
        &self.client_sub_id
    }

    /// Declared subscription name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Installed bus handler tokens
    pub fn handlers(&self) -> &[HandlerToken] {
        &self.handlers
    }

    /// The delivery gate shared with this instance's bus handlers
    pub fn gate(&self) -> &Arc<DeliveryGate> {
        &self.gate
    }

    /// Mark the instance fully torn down. Called after every handler token
    /// has been detached from the bus.
    pub fn mark_terminated(&mut self) {
        self.state = SubscriptionState::Terminated;
    }
}

/// Registry of active subscription instances.
pub struct SubscriptionRegistry {
    connections: Mutex<HashMap<Uuid, HashMap<String, SubscriptionInstance>>>,
    max_per_connection: usize,
}

/// Structural failures of `reserve`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveError {
    /// A live instance already holds this `(connection, id)` pair
    Duplicate,
    /// The connection is at its subscription cap
    CapReached(usize),
}

impl SubscriptionRegistry {
    /// Create a registry with a per-connection instance cap
    pub fn new(max_per_connection: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            max_per_connection,
        }
    }

    /// Reserve `(connection_id, client_sub_id)` with a Pending instance and
    /// return its delivery gate.
    ///
    /// Fails if a live instance already holds the pair, or the connection is
    /// at its cap. Terminated instances never occupy the registry, so any
    /// present entry is live.
    pub fn reserve(
        &self,
        connection_id: Uuid,
        client_sub_id: &str,
        name: &'static str,
    ) -> Result<Arc<DeliveryGate>, ReserveError> {
        let mut connections = match self.connections.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let subs = connections.entry(connection_id).or_default();
        if subs.contains_key(client_sub_id) {
            return Err(ReserveError::Duplicate);
        }
        if subs.len() >= self.max_per_connection {
            return Err(ReserveError::CapReached(self.max_per_connection));
        }

        let instance = SubscriptionInstance::new(connection_id, client_sub_id.to_string(), name);
        let gate = Arc::clone(instance.gate());
        subs.insert(client_sub_id.to_string(), instance);

        Ok(gate)
    }

    /// Attach installed handler tokens and move the instance to Active.
    ///
    /// Returns false when the instance is gone (the connection dropped
    /// between reserve and activation); the caller must detach the tokens.
    pub fn activate(
        &self,
        connection_id: Uuid,
        client_sub_id: &str,
        handlers: Vec<HandlerToken>,
    ) -> bool {
        let mut connections = match self.connections.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match connections
            .get_mut(&connection_id)
            .and_then(|subs| subs.get_mut(client_sub_id))
        {
            Some(instance) => {
                instance.handlers = handlers;
                instance.state = SubscriptionState::Active;
                true
            }
            None => false,
        }
    }

    /// Remove one instance, marking it Stopping. Returns none for unknown
    /// ids.
    pub fn remove(&self, connection_id: Uuid, client_sub_id: &str) -> Option<SubscriptionInstance> {
        let mut connections = match self.connections.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut instance = connections
            .get_mut(&connection_id)?
            .remove(client_sub_id)?;
        instance.state = SubscriptionState::Stopping;
        Some(instance)
    }

    /// Atomic snapshot-and-clear of every instance bound to a connection.
    pub fn remove_all(&self, connection_id: Uuid) -> Vec<SubscriptionInstance> {
        let mut connections = match self.connections.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        connections
            .remove(&connection_id)
            .map(|subs| {
                subs.into_values()
                    .map(|mut instance| {
                        instance.state = SubscriptionState::Stopping;
                        instance
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of live instances bound to a connection
    pub fn count(&self, connection_id: Uuid) -> usize {
        self.connections
            .lock()
            .map(|c| c.get(&connection_id).map(|s| s.len()).unwrap_or(0))
            .unwrap_or(0)
    }
}
