//! Rule templates
//!
//! A template is a reusable rule body. A rule that references a template
//! supplies a configuration map; the engine materializes concrete modules
//! from the template, substituting `${name}` references in module
//! configurations with the rule's configuration values.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::module::{Action, Condition, Trigger};

/// A named, reusable rule body parametrized by configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTemplate {
    /// Template UID
    pub uid: String,

    /// Human-readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Tags for lookup
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub tags: HashSet<String>,

    /// Trigger modules of the template body
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<Trigger>,

    /// Condition modules of the template body
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Action modules of the template body
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
}
