//! # Subscription Schema
//!
//! The schema contract consumed from the resolver layer: for each declared
//! subscription name, an argument schema, a filter factory, and a payload
//! projection.
//!
//! Two subscriptions are declared:
//!
//! - `messageAdded(groupIds: [Int])`: listens on topic `messageAdded`;
//!   matches when the message's `groupId` is in `groupIds`.
//! - `groupAdded(userId: Int)`: listens on topic `groupAdded`; matches
//!   when the group's member list contains `userId`.

pub mod definition;
pub mod errors;
pub mod operation;

use std::collections::HashMap;

use crate::bus::{EventPayload, Topic};

pub use definition::{
    identity_projection, ArgKind, ArgValue, ArgumentDef, FilterFn, ProjectionFn, SetupFn,
    SubscriptionDefinition, Variables,
};
pub use errors::{SchemaError, SchemaResult};
pub use operation::{parse_subscription, SubscriptionOperation};

/// Registry of declared subscriptions, injected at engine construction.
pub struct SubscriptionSchema {
    definitions: HashMap<&'static str, SubscriptionDefinition>,
}

impl SubscriptionSchema {
    /// An empty schema
    pub fn new() -> Self {
        Self {
            definitions: HashMap::new(),
        }
    }

    /// The product schema: `messageAdded` and `groupAdded`
    pub fn builtin() -> Self {
        let mut schema = Self::new();
        schema.declare(message_added_definition());
        schema.declare(group_added_definition());
        schema
    }

    /// Declare a subscription. Later declarations replace earlier ones of
    /// the same name.
    pub fn declare(&mut self, definition: SubscriptionDefinition) {
        self.definitions.insert(definition.name, definition);
    }

    /// Look up a declared subscription by name
    pub fn definition(&self, name: &str) -> SchemaResult<&SubscriptionDefinition> {
        self.definitions
            .get(name)
            .ok_or_else(|| SchemaError::UnknownSubscription(name.to_string()))
    }

    /// Declared subscription names
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.definitions.keys().copied()
    }
}

impl Default for SubscriptionSchema {
    fn default() -> Self {
        Self::builtin()
    }
}

fn message_added_definition() -> SubscriptionDefinition {
    SubscriptionDefinition {
        name: "messageAdded",
        arguments: &[ArgumentDef {
            name: "groupIds",
            kind: ArgKind::IntList,
        }],
        setup: message_added_setup,
        projection: identity_projection,
    }
}

fn message_added_setup(vars: &Variables) -> HashMap<Topic, FilterFn> {
    let group_ids = vars.int_list("groupIds");

    let filter: FilterFn = Box::new(move |payload| {
        let Some(group_ids) = &group_ids else {
            return false;
        };
        match payload {
            EventPayload::Message(message) => group_ids.contains(&message.group_id),
            _ => false,
        }
    });

    HashMap::from([(Topic::MessageAdded, filter)])
}

fn group_added_definition() -> SubscriptionDefinition {
    SubscriptionDefinition {
        name: "groupAdded",
        arguments: &[ArgumentDef {
            name: "userId",
            kind: ArgKind::Int,
        }],
        setup: group_added_setup,
        projection: identity_projection,
    }
}

fn group_added_setup(vars: &Variables) -> HashMap<Topic, FilterFn> {
    let user_id = vars.int("userId");

    let filter: FilterFn = Box::new(move |payload| {
        let Some(user_id) = user_id else {
            return false;
        };
        match payload {
            EventPayload::Group(group) => group.users.iter().any(|u| u.id == user_id),
            _ => false,
        }
    });

    HashMap::from([(Topic::GroupAdded, filter)])
}
