//! Composite module-type handling
//!
//! A composite custom type `system:custom` refines a system type. Modules
//! referencing one are never handed to a factory directly; this
//! engine-owned factory rewrites them to their system parent type, merges
//! in the preset configuration of the custom type definition (the module's
//! own values win), and delegates handler creation to the parent's factory.
//! Release is routed back the same way.

use std::sync::Arc;

use ra_core::{system_type, Handler, Module, ModuleHandlerFactory, ModuleRef};
use ra_registries::ModuleTypeRegistry;

pub(crate) struct CompositeHandlerFactory {
    module_types: Arc<ModuleTypeRegistry>,
}

impl CompositeHandlerFactory {
    pub fn new(module_types: Arc<ModuleTypeRegistry>) -> Self {
        Self { module_types }
    }

    /// Create a handler for a composite-typed module through the factory
    /// of its system parent type.
    pub fn create(
        &self,
        module: &ModuleRef<'_>,
        rule_uid: &str,
        parent: &Arc<dyn ModuleHandlerFactory>,
    ) -> Option<Handler> {
        let derived = self.derive(module);
        parent.create_handler(&derived.as_ref(), rule_uid)
    }

    /// Return a handler previously created through [`create`](Self::create).
    pub fn release(
        &self,
        module: &ModuleRef<'_>,
        rule_uid: &str,
        parent: &Arc<dyn ModuleHandlerFactory>,
        handler: Handler,
    ) {
        let derived = self.derive(module);
        parent.release_handler(&derived.as_ref(), rule_uid, handler);
    }

    /// Rewrite a module to its system parent type with the custom type's
    /// preset configuration merged underneath the module's own values.
    fn derive(&self, module: &ModuleRef<'_>) -> Module {
        let type_uid = module.type_uid();
        let system = system_type(type_uid).to_string();

        let mut configuration = self
            .module_types
            .get(type_uid, None)
            .map(|mt| mt.configuration)
            .unwrap_or_default();
        configuration.extend(module.configuration().clone());

        let mut derived = module.to_owned();
        match &mut derived {
            Module::Trigger(t) => {
                t.type_uid = system;
                t.configuration = configuration;
            }
            Module::Condition(c) => {
                c.type_uid = system;
                c.configuration = configuration;
            }
            Module::Action(a) => {
                a.type_uid = system;
                a.configuration = configuration;
            }
        }
        derived
    }
}
