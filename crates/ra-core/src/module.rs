//! Module types
//!
//! A rule is composed of modules: triggers, conditions, and actions. Each
//! module carries a rule-unique ID, the UID of its module type, and a
//! configuration map. Conditions and actions additionally declare
//! connections that wire their named inputs to outputs of other modules
//! within the same rule.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::ValueMap;

/// The three module variants of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Trigger,
    Condition,
    Action,
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleKind::Trigger => write!(f, "trigger"),
            ModuleKind::Condition => write!(f, "condition"),
            ModuleKind::Action => write!(f, "action"),
        }
    }
}

/// A trigger module. Triggers start rule executions and publish named
/// output values that downstream modules can consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    /// Module ID, unique within the rule
    pub id: String,

    /// UID of the module type
    pub type_uid: String,

    /// Human-readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Configuration values
    #[serde(default)]
    pub configuration: ValueMap,
}

/// A condition module. All conditions of a rule must be satisfied for its
/// actions to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Module ID, unique within the rule
    pub id: String,

    /// UID of the module type
    pub type_uid: String,

    /// Human-readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Configuration values
    #[serde(default)]
    pub configuration: ValueMap,

    /// Input wiring to outputs of other modules in the rule
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<Connection>,
}

/// An action module. Actions execute in declared order and may publish
/// output values visible to subsequent actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Module ID, unique within the rule
    pub id: String,

    /// UID of the module type
    pub type_uid: String,

    /// Human-readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Configuration values
    #[serde(default)]
    pub configuration: ValueMap,

    /// Input wiring to outputs of other modules in the rule
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<Connection>,
}

/// Error type for invalid textual connections
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionParseError {
    #[error("connection must have the form 'input=module.output'")]
    InvalidFormat,

    #[error("connection input name cannot be empty")]
    EmptyInput,

    #[error("connection source cannot be empty")]
    EmptySource,
}

/// A directed link from a source module's named output to one of this
/// module's named inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    /// Name of the input being fed
    pub input_name: String,

    /// ID of the module within the same rule that produces the value
    pub source_module_id: String,

    /// Name of the source module's output
    pub output_name: String,
}

impl Connection {
    /// Create a new connection
    pub fn new(
        input_name: impl Into<String>,
        source_module_id: impl Into<String>,
        output_name: impl Into<String>,
    ) -> Self {
        Self {
            input_name: input_name.into(),
            source_module_id: source_module_id.into(),
            output_name: output_name.into(),
        }
    }
}

impl FromStr for Connection {
    type Err = ConnectionParseError;

    /// Parses the textual form `input=module.output`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (input, source) = s
            .split_once('=')
            .ok_or(ConnectionParseError::InvalidFormat)?;
        let input = input.trim();
        let source = source.trim();
        if input.is_empty() {
            return Err(ConnectionParseError::EmptyInput);
        }
        let (module, output) = source
            .split_once('.')
            .ok_or(ConnectionParseError::InvalidFormat)?;
        if module.is_empty() || output.is_empty() {
            return Err(ConnectionParseError::EmptySource);
        }
        Ok(Connection::new(input, module, output))
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}.{}",
            self.input_name, self.source_module_id, self.output_name
        )
    }
}

/// An owned module of any variant.
#[derive(Debug, Clone)]
pub enum Module {
    Trigger(Trigger),
    Condition(Condition),
    Action(Action),
}

impl Module {
    /// Borrowed view of this module
    pub fn as_ref(&self) -> ModuleRef<'_> {
        match self {
            Module::Trigger(t) => ModuleRef::Trigger(t),
            Module::Condition(c) => ModuleRef::Condition(c),
            Module::Action(a) => ModuleRef::Action(a),
        }
    }
}

/// A borrowed view over any module variant.
///
/// Handler factories receive modules through this type so a single factory
/// can serve triggers, conditions, and actions without three entry points.
#[derive(Debug, Clone, Copy)]
pub enum ModuleRef<'a> {
    Trigger(&'a Trigger),
    Condition(&'a Condition),
    Action(&'a Action),
}

impl ModuleRef<'_> {
    /// Module ID, unique within its rule
    pub fn id(&self) -> &str {
        match self {
            ModuleRef::Trigger(t) => &t.id,
            ModuleRef::Condition(c) => &c.id,
            ModuleRef::Action(a) => &a.id,
        }
    }

    /// UID of the module type
    pub fn type_uid(&self) -> &str {
        match self {
            ModuleRef::Trigger(t) => &t.type_uid,
            ModuleRef::Condition(c) => &c.type_uid,
            ModuleRef::Action(a) => &a.type_uid,
        }
    }

    /// Configuration values
    pub fn configuration(&self) -> &ValueMap {
        match self {
            ModuleRef::Trigger(t) => &t.configuration,
            ModuleRef::Condition(c) => &c.configuration,
            ModuleRef::Action(a) => &a.configuration,
        }
    }

    /// Which variant this module is
    pub fn kind(&self) -> ModuleKind {
        match self {
            ModuleRef::Trigger(_) => ModuleKind::Trigger,
            ModuleRef::Condition(_) => ModuleKind::Condition,
            ModuleRef::Action(_) => ModuleKind::Action,
        }
    }

    /// Deep copy into an owned [`Module`]
    pub fn to_owned(&self) -> Module {
        match self {
            ModuleRef::Trigger(t) => Module::Trigger((*t).clone()),
            ModuleRef::Condition(c) => Module::Condition((*c).clone()),
            ModuleRef::Action(a) => Module::Action((*a).clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_connection() {
        let conn: Connection = "temperature=sensor.value".parse().unwrap();
        assert_eq!(conn.input_name, "temperature");
        assert_eq!(conn.source_module_id, "sensor");
        assert_eq!(conn.output_name, "value");
        assert_eq!(conn.to_string(), "temperature=sensor.value");
    }

    #[test]
    fn test_parse_connection_invalid() {
        assert_eq!(
            "no_separator".parse::<Connection>().unwrap_err(),
            ConnectionParseError::InvalidFormat
        );
        assert_eq!(
            "input=no_dot".parse::<Connection>().unwrap_err(),
            ConnectionParseError::InvalidFormat
        );
        assert_eq!(
            "=module.output".parse::<Connection>().unwrap_err(),
            ConnectionParseError::EmptyInput
        );
        assert_eq!(
            "input=.output".parse::<Connection>().unwrap_err(),
            ConnectionParseError::EmptySource
        );
    }

    #[test]
    fn test_module_ref_accessors() {
        let trigger = Trigger {
            id: "t1".into(),
            type_uid: "timer:sunset".into(),
            label: None,
            configuration: [("offset".to_string(), json!(10))].into_iter().collect(),
        };
        let m = ModuleRef::Trigger(&trigger);
        assert_eq!(m.id(), "t1");
        assert_eq!(m.type_uid(), "timer:sunset");
        assert_eq!(m.kind(), ModuleKind::Trigger);
        assert_eq!(m.configuration().get("offset"), Some(&json!(10)));
    }

    #[test]
    fn test_condition_serde_defaults() {
        let condition: Condition = serde_json::from_value(json!({
            "id": "c1",
            "type_uid": "threshold"
        }))
        .unwrap();
        assert!(condition.configuration.is_empty());
        assert!(condition.connections.is_empty());
        assert!(condition.label.is_none());
    }
}
