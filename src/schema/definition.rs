//! # Subscription Definitions
//!
//! Each declared subscription name binds an argument schema, a `setup`
//! that turns validated variables into per-topic filter predicates, and a
//! `projection` that shapes a matching payload for the wire.
//!
//! Definitions are plain records with function-typed fields; the engine
//! receives them through an injected [`super::SubscriptionSchema`], never a
//! process-global table.

use std::collections::HashMap;

use serde_json::Value;

use crate::bus::{EventPayload, Topic};
use crate::protocol::VariableMap;

use super::errors::{SchemaError, SchemaResult};

/// Semantic argument types understood by the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// A single integer
    Int,
    /// A list of integers
    IntList,
}

impl ArgKind {
    fn describe(&self) -> &'static str {
        match self {
            ArgKind::Int => "Int",
            ArgKind::IntList => "[Int]",
        }
    }
}

/// One declared argument of a subscription
#[derive(Debug, Clone, Copy)]
pub struct ArgumentDef {
    /// Variable name as the client supplies it
    pub name: &'static str,
    /// Semantic type
    pub kind: ArgKind,
}

/// A validated argument value
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Int(i64),
    IntList(Vec<i64>),
}

/// Validated variable bindings for one subscription instance.
///
/// Arguments are optional: a binding the client omitted (or bound to null)
/// is simply absent, and the subscription's filters treat it as matching
/// nothing.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    values: HashMap<&'static str, ArgValue>,
}

impl Variables {
    /// Look up an integer argument
    pub fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ArgValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Look up an integer-list argument
    pub fn int_list(&self, name: &str) -> Option<Vec<i64>> {
        match self.values.get(name) {
            Some(ArgValue::IntList(v)) => Some(v.clone()),
            _ => None,
        }
    }
}

/// Filter predicate over event payloads, parameterized by the instance's
/// arguments. Synchronous and side-effect free.
pub type FilterFn = Box<dyn Fn(&EventPayload) -> bool + Send + Sync>;

/// Builds the per-topic filter table for one subscription instance
pub type SetupFn = fn(&Variables) -> HashMap<Topic, FilterFn>;

/// Shapes a matching payload into the client-visible payload
pub type ProjectionFn = fn(&EventPayload) -> Value;

/// A schema-declared subscription.
#[derive(Debug)]
pub struct SubscriptionDefinition {
    /// Declared subscription name
    pub name: &'static str,

    /// Argument schema
    pub arguments: &'static [ArgumentDef],

    /// Filter factory
    pub setup: SetupFn,

    /// Payload shaping
    pub projection: ProjectionFn,
}

impl SubscriptionDefinition {
    /// Validate raw variable bindings against the argument schema.
    ///
    /// Unknown variable names and type mismatches are rejected; null and
    /// omitted bindings are accepted as absent.
    pub fn validate_variables(&self, raw: Option<&VariableMap>) -> SchemaResult<Variables> {
        let mut values = HashMap::new();

        let Some(raw) = raw else {
            return Ok(Variables { values });
        };

        for (key, value) in raw {
            let arg = self
                .arguments
                .iter()
                .find(|a| a.name == key.as_str())
                .ok_or_else(|| {
                    SchemaError::Validation(format!(
                        "unknown variable '{}' for subscription '{}'",
                        key, self.name
                    ))
                })?;

            if value.is_null() {
                continue;
            }

            let parsed = match arg.kind {
                ArgKind::Int => value.as_i64().map(ArgValue::Int),
                ArgKind::IntList => value.as_array().and_then(|items| {
                    items
                        .iter()
                        .map(Value::as_i64)
                        .collect::<Option<Vec<i64>>>()
                        .map(ArgValue::IntList)
                }),
            }
            .ok_or_else(|| {
                SchemaError::Validation(format!(
                    "variable '{}' of subscription '{}' must be {}",
                    key,
                    self.name,
                    arg.kind.describe()
                ))
            })?;

            values.insert(arg.name, parsed);
        }

        Ok(Variables { values })
    }
}

/// Projection used by both built-in subscriptions: the wire payload is the
/// event record itself.
pub fn identity_projection(payload: &EventPayload) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_definition() -> SubscriptionDefinition {
        SubscriptionDefinition {
            name: "messageAdded",
            arguments: &[ArgumentDef {
                name: "groupIds",
                kind: ArgKind::IntList,
            }],
            setup: |_| HashMap::new(),
            projection: identity_projection,
        }
    }

    fn raw(value: Value) -> VariableMap {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_validate_int_list() {
        let def = test_definition();
        let vars = def
            .validate_variables(Some(&raw(json!({"groupIds": [7, 9]}))))
            .unwrap();

        assert_eq!(vars.int_list("groupIds"), Some(vec![7, 9]));
    }

    #[test]
    fn test_missing_variables_are_absent() {
        let def = test_definition();

        let vars = def.validate_variables(None).unwrap();
        assert_eq!(vars.int_list("groupIds"), None);

        let vars = def
            .validate_variables(Some(&raw(json!({"groupIds": null}))))
            .unwrap();
        assert_eq!(vars.int_list("groupIds"), None);
    }

    #[test]
    fn test_unknown_variable_rejected() {
        let def = test_definition();
        let err = def
            .validate_variables(Some(&raw(json!({"userIds": [1]}))))
            .unwrap_err();

        assert!(matches!(err, SchemaError::Validation(_)));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let def = test_definition();

        let err = def
            .validate_variables(Some(&raw(json!({"groupIds": "7"}))))
            .unwrap_err();
        assert!(matches!(err, SchemaError::Validation(_)));

        let err = def
            .validate_variables(Some(&raw(json!({"groupIds": [7, "9"]}))))
            .unwrap_err();
        assert!(matches!(err, SchemaError::Validation(_)));

        let err = def
            .validate_variables(Some(&raw(json!({"groupIds": [7.5]}))))
            .unwrap_err();
        assert!(matches!(err, SchemaError::Validation(_)));
    }
}
