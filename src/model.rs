//! # Chat Domain Records
//!
//! The entity records carried in event payloads. Mutation resolvers publish
//! these after a successful write; the subscription layer filters and ships
//! them to clients verbatim.
//!
//! Wire shape is camelCase to match the client schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message sent to a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Unique id for the message
    pub id: i64,

    /// Group the message was sent to
    pub group_id: i64,

    /// Message text
    pub text: String,

    /// User who sent the message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,

    /// When the message was created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl MessageRecord {
    /// Create a message record with the required fields
    pub fn new(id: i64, group_id: i64, text: impl Into<String>) -> Self {
        Self {
            id,
            group_id,
            text: text.into(),
            user_id: None,
            created_at: None,
        }
    }

    /// Attach the sending user
    pub fn with_sender(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Attach the creation timestamp
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }
}

/// A group chat entity, carrying its member list.
///
/// The member list is attached by the mutation resolver before publishing so
/// subscription filters can test membership without a store round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecord {
    /// Unique id for the group
    pub id: i64,

    /// Name of the group
    pub name: String,

    /// Users in the group
    pub users: Vec<UserRef>,
}

impl GroupRecord {
    /// Create a group record
    pub fn new(id: i64, name: impl Into<String>, users: Vec<UserRef>) -> Self {
        Self {
            id,
            name: name.into(),
            users,
        }
    }
}

/// A reference to a user inside a group payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    /// Unique id for the user
    pub id: i64,

    /// Display name, when the resolver attaches it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl UserRef {
    /// Reference a user by id
    pub fn new(id: i64) -> Self {
        Self { id, username: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wire_shape() {
        let message = MessageRecord::new(100, 7, "hi");
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value, json!({"id": 100, "groupId": 7, "text": "hi"}));
    }

    #[test]
    fn test_message_with_sender() {
        let message = MessageRecord::new(1, 2, "x").with_sender(9);
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["userId"], 9);
        assert!(value.get("createdAt").is_none());
    }

    #[test]
    fn test_group_wire_shape() {
        let group = GroupRecord::new(5, "X", vec![UserRef::new(1), UserRef::new(42)]);
        let value = serde_json::to_value(&group).unwrap();

        assert_eq!(
            value,
            json!({"id": 5, "name": "X", "users": [{"id": 1}, {"id": 42}]})
        );
    }
}
