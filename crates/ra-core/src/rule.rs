//! Rule definition
//!
//! A rule ties together triggers, conditions, and actions with a
//! configuration map and metadata. Rules are plain data here; the engine
//! keeps its own canonical copies and never shares state with callers.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, BTreeSet};
use thiserror::Error;

use crate::module::{Action, Condition, ModuleRef, Trigger};
use crate::ValueMap;

/// Errors raised by rule validation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("module with empty ID")]
    EmptyModuleId,

    #[error("module '{0}' has an empty type UID")]
    EmptyTypeUid(String),

    #[error("duplicate module ID '{0}'")]
    DuplicateModuleId(String),
}

/// A rule definition.
///
/// A rule is either self-contained (its modules are listed inline) or
/// template-bound (`template_uid` names a [`crate::RuleTemplate`] whose
/// modules are materialized with this rule's configuration when the
/// template becomes available).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rule {
    /// Unique rule UID; assigned by the engine when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// UID of the template this rule is derived from, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_uid: Option<String>,

    /// Triggers that start the rule
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<Trigger>,

    /// Conditions gating the actions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Actions executed when the conditions hold
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,

    /// Configuration values, also the substitution source for template
    /// references
    #[serde(default)]
    pub configuration: ValueMap,

    /// Tags for lookup; may be empty
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub tags: HashSet<String>,
}

impl Rule {
    /// Iterate over all modules of the rule as borrowed views, triggers
    /// first, then conditions, then actions.
    pub fn modules(&self) -> impl Iterator<Item = ModuleRef<'_>> {
        self.triggers
            .iter()
            .map(ModuleRef::Trigger)
            .chain(self.conditions.iter().map(ModuleRef::Condition))
            .chain(self.actions.iter().map(ModuleRef::Action))
    }

    /// Look up a module by its rule-unique ID.
    pub fn module(&self, id: &str) -> Option<ModuleRef<'_>> {
        self.modules().find(|m| m.id() == id)
    }

    /// The set of module-type UIDs this rule references, deduplicated.
    pub fn referenced_types(&self) -> BTreeSet<String> {
        self.modules().map(|m| m.type_uid().to_string()).collect()
    }

    /// Validates structural invariants: non-empty module IDs and type UIDs,
    /// and module IDs unique within the rule.
    ///
    /// Template-bound rules are allowed to have no inline modules; the
    /// template supplies them.
    pub fn validate(&self) -> Result<(), RuleError> {
        let mut seen = HashSet::new();
        for module in self.modules() {
            if module.id().is_empty() {
                return Err(RuleError::EmptyModuleId);
            }
            if module.type_uid().is_empty() {
                return Err(RuleError::EmptyTypeUid(module.id().to_string()));
            }
            if !seen.insert(module.id().to_string()) {
                return Err(RuleError::DuplicateModuleId(module.id().to_string()));
            }
        }
        Ok(())
    }
}
