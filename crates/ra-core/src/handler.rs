//! Handler contracts
//!
//! Handlers are the runtime implementations of modules. They are produced
//! by [`ModuleHandlerFactory`] providers, bound 1:1 to a module instance
//! within one rule activation, and returned to their factory when the
//! activation is torn down. Rebinding a rule produces fresh handler
//! instances.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::module::{ModuleKind, ModuleRef};
use crate::ValueMap;

/// Error raised by a handler during execution.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler execution failed: {0}")]
    Failed(String),

    #[error("missing input '{0}'")]
    MissingInput(String),

    #[error("invalid input '{name}': {message}")]
    InvalidInput { name: String, message: String },
}

/// Base contract shared by all handler variants.
pub trait ModuleHandler: Send + Sync {
    /// Release resources held by the handler. Called by factories when a
    /// handler is returned; the engine never calls it directly.
    fn dispose(&self) {}
}

/// Bridge through which trigger handlers notify the engine of firings.
///
/// The engine hands one callback per rule to each of the rule's trigger
/// handlers. The reference is non-owning; after the rule is torn down the
/// callback turns inert and firings are ignored.
pub trait TriggerCallback: Send + Sync {
    /// Report that the trigger identified by `trigger_id` fired with the
    /// given output values.
    fn triggered(&self, trigger_id: &str, outputs: ValueMap);
}

/// Runtime implementation of a trigger module.
pub trait TriggerHandler: ModuleHandler {
    /// Attach or detach the engine callback. Handlers must deliver
    /// firings to the most recently attached callback and stop delivering
    /// once detached.
    fn set_callback(&self, callback: Option<Arc<dyn TriggerCallback>>);
}

/// Runtime implementation of a condition module.
pub trait ConditionHandler: ModuleHandler {
    /// Evaluate the condition against the merged execution context, which
    /// contains the rule's accumulated output values plus this module's
    /// resolved inputs.
    fn is_satisfied(&self, context: &ValueMap) -> bool;
}

/// Runtime implementation of an action module.
pub trait ActionHandler: ModuleHandler {
    /// Execute the action against the merged execution context. A
    /// returned map is published as this module's outputs, visible to
    /// subsequent actions.
    fn execute(&self, context: &ValueMap) -> Result<Option<ValueMap>, HandlerError>;
}

/// A handler of any variant, as produced by a factory.
#[derive(Clone)]
pub enum Handler {
    Trigger(Arc<dyn TriggerHandler>),
    Condition(Arc<dyn ConditionHandler>),
    Action(Arc<dyn ActionHandler>),
}

impl Handler {
    /// Which module variant this handler serves.
    pub fn kind(&self) -> ModuleKind {
        match self {
            Handler::Trigger(_) => ModuleKind::Trigger,
            Handler::Condition(_) => ModuleKind::Condition,
            Handler::Action(_) => ModuleKind::Action,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler::{:?}", self.kind())
    }
}

/// A provider of handlers for one or more system module types.
///
/// Factories own the handlers they produce: every handler obtained through
/// [`create_handler`](Self::create_handler) must eventually be returned via
/// [`release_handler`](Self::release_handler).
pub trait ModuleHandlerFactory: Send + Sync {
    /// The system module-type UIDs this factory serves.
    fn module_types(&self) -> Vec<String>;

    /// Produce a handler for the given module within the given rule, or
    /// `None` when the factory cannot serve it.
    fn create_handler(&self, module: &ModuleRef<'_>, rule_uid: &str) -> Option<Handler>;

    /// Return a handler previously produced for this module and rule.
    fn release_handler(&self, module: &ModuleRef<'_>, rule_uid: &str, handler: Handler);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Trigger;

    struct NopTrigger;

    impl ModuleHandler for NopTrigger {}

    impl TriggerHandler for NopTrigger {
        fn set_callback(&self, _callback: Option<Arc<dyn TriggerCallback>>) {}
    }

    #[test]
    fn test_handler_kind() {
        let handler = Handler::Trigger(Arc::new(NopTrigger));
        assert_eq!(handler.kind(), ModuleKind::Trigger);
    }

    #[test]
    fn test_handler_kind_mismatch_is_observable() {
        // The engine relies on kind() to reject factories that hand back
        // the wrong variant for a module.
        let trigger = Trigger {
            id: "t".into(),
            type_uid: "timer".into(),
            label: None,
            configuration: ValueMap::new(),
        };
        let module = ModuleRef::Trigger(&trigger);
        let handler = Handler::Trigger(Arc::new(NopTrigger));
        assert_eq!(module.kind(), handler.kind());
    }
}
