//! Runtime rule model
//!
//! The engine keeps a canonical copy of every registered rule. When a rule
//! is successfully bound, its modules are materialized into runtime modules
//! that carry the attached handler, published output values, and the cached
//! dataflow resolution. Rebinding discards the activation and builds a
//! fresh one, so handler instances are never reused across activations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use ra_core::{
    Action, ActionHandler, Condition, ConditionHandler, ModuleRef, Rule, Trigger, TriggerHandler,
    ValueMap,
};

use crate::connection::{resolve_connections, OutputRef};

/// A trigger module bound into a rule activation.
pub(crate) struct RuntimeTrigger {
    pub module: Trigger,
    handler: RwLock<Option<Arc<dyn TriggerHandler>>>,
    outputs: Arc<Mutex<ValueMap>>,
}

impl RuntimeTrigger {
    fn new(module: Trigger) -> Self {
        Self {
            module,
            handler: RwLock::new(None),
            outputs: Arc::new(Mutex::new(ValueMap::new())),
        }
    }

    pub fn module_ref(&self) -> ModuleRef<'_> {
        ModuleRef::Trigger(&self.module)
    }

    pub fn handler(&self) -> Option<Arc<dyn TriggerHandler>> {
        self.handler.read().unwrap().clone()
    }

    /// Attach or detach the handler, returning the previous one.
    pub fn set_handler(
        &self,
        handler: Option<Arc<dyn TriggerHandler>>,
    ) -> Option<Arc<dyn TriggerHandler>> {
        std::mem::replace(&mut *self.handler.write().unwrap(), handler)
    }

    /// Replace the published output values with a fresh firing's outputs.
    pub fn set_outputs(&self, outputs: ValueMap) {
        *self.outputs.lock().unwrap() = outputs;
    }

    pub fn outputs_store(&self) -> Arc<Mutex<ValueMap>> {
        self.outputs.clone()
    }
}

/// A condition module bound into a rule activation.
pub(crate) struct RuntimeCondition {
    pub module: Condition,
    handler: RwLock<Option<Arc<dyn ConditionHandler>>>,
    resolved: Mutex<Option<HashMap<String, OutputRef>>>,
}

impl RuntimeCondition {
    fn new(module: Condition) -> Self {
        Self {
            module,
            handler: RwLock::new(None),
            resolved: Mutex::new(None),
        }
    }

    pub fn module_ref(&self) -> ModuleRef<'_> {
        ModuleRef::Condition(&self.module)
    }

    pub fn handler(&self) -> Option<Arc<dyn ConditionHandler>> {
        self.handler.read().unwrap().clone()
    }

    pub fn set_handler(
        &self,
        handler: Option<Arc<dyn ConditionHandler>>,
    ) -> Option<Arc<dyn ConditionHandler>> {
        std::mem::replace(&mut *self.handler.write().unwrap(), handler)
    }

    /// The input→output wiring of this condition, resolved on first use and
    /// cached for subsequent executions.
    pub fn connected_outputs(&self, activation: &Activation) -> HashMap<String, OutputRef> {
        let mut resolved = self.resolved.lock().unwrap();
        resolved
            .get_or_insert_with(|| {
                resolve_connections(&self.module.id, &self.module.connections, activation)
            })
            .clone()
    }
}

/// An action module bound into a rule activation.
pub(crate) struct RuntimeAction {
    pub module: Action,
    handler: RwLock<Option<Arc<dyn ActionHandler>>>,
    outputs: Arc<Mutex<ValueMap>>,
    resolved: Mutex<Option<HashMap<String, OutputRef>>>,
}

impl RuntimeAction {
    fn new(module: Action) -> Self {
        Self {
            module,
            handler: RwLock::new(None),
            outputs: Arc::new(Mutex::new(ValueMap::new())),
            resolved: Mutex::new(None),
        }
    }

    pub fn module_ref(&self) -> ModuleRef<'_> {
        ModuleRef::Action(&self.module)
    }

    pub fn handler(&self) -> Option<Arc<dyn ActionHandler>> {
        self.handler.read().unwrap().clone()
    }

    pub fn set_handler(
        &self,
        handler: Option<Arc<dyn ActionHandler>>,
    ) -> Option<Arc<dyn ActionHandler>> {
        std::mem::replace(&mut *self.handler.write().unwrap(), handler)
    }

    /// Publish output values returned by the handler.
    pub fn set_outputs(&self, outputs: ValueMap) {
        *self.outputs.lock().unwrap() = outputs;
    }

    pub fn outputs_store(&self) -> Arc<Mutex<ValueMap>> {
        self.outputs.clone()
    }

    pub fn connected_outputs(&self, activation: &Activation) -> HashMap<String, OutputRef> {
        let mut resolved = self.resolved.lock().unwrap();
        resolved
            .get_or_insert_with(|| {
                resolve_connections(&self.module.id, &self.module.connections, activation)
            })
            .clone()
    }
}

/// A value-producing module found while resolving connections.
pub(crate) struct SourceModule {
    pub store: Arc<Mutex<ValueMap>>,
    pub type_uid: String,
}

/// The bound form of a rule: its concrete modules with attached handlers.
///
/// For template-bound rules the modules here are the materialized ones, not
/// the (empty) module lists of the registered definition.
pub(crate) struct Activation {
    pub triggers: Vec<Arc<RuntimeTrigger>>,
    pub conditions: Vec<Arc<RuntimeCondition>>,
    pub actions: Vec<Arc<RuntimeAction>>,
}

impl Activation {
    pub fn new(triggers: Vec<Trigger>, conditions: Vec<Condition>, actions: Vec<Action>) -> Self {
        Self {
            triggers: triggers
                .into_iter()
                .map(|t| Arc::new(RuntimeTrigger::new(t)))
                .collect(),
            conditions: conditions
                .into_iter()
                .map(|c| Arc::new(RuntimeCondition::new(c)))
                .collect(),
            actions: actions
                .into_iter()
                .map(|a| Arc::new(RuntimeAction::new(a)))
                .collect(),
        }
    }

    /// Look up a trigger by module ID.
    pub fn trigger(&self, id: &str) -> Option<&Arc<RuntimeTrigger>> {
        self.triggers.iter().find(|t| t.module.id == id)
    }

    /// Whether any module of the activation has the given ID.
    pub fn contains(&self, id: &str) -> bool {
        self.triggers.iter().any(|t| t.module.id == id)
            || self.conditions.iter().any(|c| c.module.id == id)
            || self.actions.iter().any(|a| a.module.id == id)
    }

    /// Look up a value-producing module (trigger or action) by ID.
    pub fn source(&self, id: &str) -> Option<SourceModule> {
        if let Some(t) = self.triggers.iter().find(|t| t.module.id == id) {
            return Some(SourceModule {
                store: t.outputs_store(),
                type_uid: t.module.type_uid.clone(),
            });
        }
        if let Some(a) = self.actions.iter().find(|a| a.module.id == id) {
            return Some(SourceModule {
                store: a.outputs_store(),
                type_uid: a.module.type_uid.clone(),
            });
        }
        None
    }
}

/// A registered rule: the canonical definition plus the current activation.
pub(crate) struct RuntimeRule {
    pub definition: Rule,
    pub scope: Option<String>,
    pub activation: Option<Arc<Activation>>,
}

impl RuntimeRule {
    pub fn new(definition: Rule, scope: Option<String>) -> Self {
        Self {
            definition,
            scope,
            activation: None,
        }
    }
}
