//! # Bus Events
//!
//! Topics are a closed set: every event payload is one of the declared
//! variants, so filters and projections are total over the payload type.

use serde::Serialize;

use crate::model::{GroupRecord, MessageRecord};

use super::errors::BusError;

/// A named channel of the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// A message was added to a group
    MessageAdded,
    /// A group was created
    GroupAdded,
}

impl Topic {
    /// The declared topic set
    pub const ALL: [Topic; 2] = [Topic::MessageAdded, Topic::GroupAdded];

    /// Wire name of the topic
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::MessageAdded => "messageAdded",
            Topic::GroupAdded => "groupAdded",
        }
    }

    /// Resolve a topic from its wire name.
    ///
    /// Names outside the declared set are rejected.
    pub fn from_name(name: &str) -> Result<Topic, BusError> {
        Topic::ALL
            .into_iter()
            .find(|t| t.as_str() == name)
            .ok_or_else(|| BusError::InvalidTopic(name.to_string()))
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event payload, tagged by topic.
///
/// Serializes untagged: the wire payload of a `data` frame is the record
/// itself, matching what the client schema declares for each subscription.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Message(MessageRecord),
    Group(GroupRecord),
}

/// An event published on the bus. Immutable once published.
#[derive(Debug, Clone)]
pub struct Event {
    payload: EventPayload,
}

impl Event {
    /// An event on the `messageAdded` topic
    pub fn message_added(message: MessageRecord) -> Self {
        Self {
            payload: EventPayload::Message(message),
        }
    }

    /// An event on the `groupAdded` topic
    pub fn group_added(group: GroupRecord) -> Self {
        Self {
            payload: EventPayload::Group(group),
        }
    }

    /// The topic this event was published on
    pub fn topic(&self) -> Topic {
        match self.payload {
            EventPayload::Message(_) => Topic::MessageAdded,
            EventPayload::Group(_) => Topic::GroupAdded,
        }
    }

    /// The payload carried by this event
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }
}
