//! Dynamic registries observed by the rule engine
//!
//! This crate provides the three registries whose contents come and go at
//! runtime:
//!
//! - [`ModuleTypeRegistry`]: module-type schemas
//! - [`TemplateRegistry`]: rule templates
//! - [`HandlerFactoryRegistry`]: handler factories
//!
//! Each registry supports listener subscriptions. Listeners are invoked
//! synchronously on the mutating thread, after the registry's own map
//! guards have been released, so a listener may freely query the registry
//! it is observing.

pub mod handler_factory_registry;
pub mod module_type_registry;
pub mod template_registry;

pub use handler_factory_registry::{FactoryId, FactoryListener, HandlerFactoryRegistry};
pub use module_type_registry::{ModuleTypeListener, ModuleTypeRegistry};
pub use template_registry::{TemplateListener, TemplateRegistry};

/// Handle identifying a listener subscription on a registry.
///
/// Returned by the `subscribe` methods; pass it back to `unsubscribe` to
/// close the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);
