//! Module-type schemas
//!
//! A module type describes the contract of a module: which inputs it
//! consumes, which outputs it produces, and preset configuration values.
//! Composite custom types (`"system:custom"`) refine a system type; their
//! preset configuration is merged under the configuration of modules that
//! reference them.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::module::ModuleKind;
use crate::uid::system_type;
use crate::ValueMap;

/// Data type wildcard compatible with every other data type.
pub const DATA_TYPE_ANY: &str = "any";

/// A named input declared by a module type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    /// Input name, referenced by connections
    pub name: String,

    /// Data type; `"any"` accepts every output type
    #[serde(default = "any_type")]
    pub data_type: String,

    /// Whether a connection must feed this input
    #[serde(default)]
    pub required: bool,
}

impl Input {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            required: false,
        }
    }
}

/// A named output declared by a module type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    /// Output name, referenced by connections
    pub name: String,

    /// Data type of the produced value
    #[serde(default = "any_type")]
    pub data_type: String,
}

impl Output {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

fn any_type() -> String {
    DATA_TYPE_ANY.to_string()
}

/// Schema of a module type, identified by its UID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleType {
    /// Type UID; either a system type or a composite `system:custom` pair
    pub uid: String,

    /// Which module variant this type describes
    pub kind: ModuleKind,

    /// Human-readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Tags for lookup
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub tags: HashSet<String>,

    /// Preset configuration values; for composite custom types these are
    /// baked into modules before the system factory sees them
    #[serde(default)]
    pub configuration: ValueMap,

    /// Declared inputs (conditions and actions)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Input>,

    /// Declared outputs (triggers and actions)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Output>,
}

impl ModuleType {
    /// Create a minimal module type with the given UID and kind.
    pub fn new(uid: impl Into<String>, kind: ModuleKind) -> Self {
        Self {
            uid: uid.into(),
            kind,
            label: None,
            description: None,
            tags: HashSet::new(),
            configuration: ValueMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// The system parent type responsible for handler creation.
    pub fn system_type(&self) -> &str {
        system_type(&self.uid)
    }

    /// Look up a declared input by name.
    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Look up a declared output by name.
    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.iter().find(|o| o.name == name)
    }
}

/// Whether a value of `output` type may feed an input of `input` type.
///
/// Types are compared textually; the `"any"` wildcard is compatible in
/// both directions.
pub fn data_types_compatible(output: &str, input: &str) -> bool {
    output == input || output == DATA_TYPE_ANY || input == DATA_TYPE_ANY
}
