//! Core types for the rule automation engine
//!
//! This crate provides the data model shared by the registries and the rule
//! engine: rules and their modules, module-type schemas, rule templates,
//! rule status, and the handler contracts implemented by module providers.
//!
//! # Architecture
//!
//! ```text
//! RULE = TRIGGERS → CONDITIONS → ACTIONS
//! ```
//!
//! - **Triggers**: event detectors that start a rule and publish outputs
//! - **Conditions**: gates evaluated in order at trigger time
//! - **Actions**: tasks executed in order when all conditions hold
//!
//! Modules are bound to [`handler`] implementations at runtime; the engine
//! locates the responsible [`handler::ModuleHandlerFactory`] through the
//! system half of the module's type UID (see [`uid`]).

pub mod handler;
pub mod module;
pub mod module_type;
pub mod rule;
pub mod status;
pub mod template;
pub mod uid;

pub use handler::{
    ActionHandler, ConditionHandler, Handler, HandlerError, ModuleHandler, ModuleHandlerFactory,
    TriggerCallback, TriggerHandler,
};
pub use module::{Action, Condition, Connection, Module, ModuleKind, ModuleRef, Trigger};
pub use module_type::{Input, ModuleType, Output};
pub use rule::{Rule, RuleError};
pub use status::{RuleStatus, RuleStatusDetail, RuleStatusInfo, StatusListener};
pub use template::RuleTemplate;
pub use uid::{system_type, MODULE_TYPE_SEPARATOR, RULE_UID_PREFIX};

/// Dynamic value map used for module configurations, outputs, and the
/// per-rule execution context.
pub type ValueMap = std::collections::HashMap<String, serde_json::Value>;
