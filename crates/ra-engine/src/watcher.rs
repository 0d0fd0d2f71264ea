//! Registry watchers
//!
//! Thin listener adapters that forward registry events into the engine.
//! They hold weak references so that an engine dropped without a clean
//! `dispose()` cannot be resurrected by a late registry event.

use std::sync::{Arc, Weak};

use ra_core::{ModuleHandlerFactory, ModuleType, RuleTemplate};
use ra_registries::{FactoryListener, ModuleTypeListener, TemplateListener};

use crate::engine::RuleEngine;

pub(crate) struct FactoryWatcher {
    pub engine: Weak<RuleEngine>,
}

impl FactoryListener for FactoryWatcher {
    fn factory_added(&self, factory: &Arc<dyn ModuleHandlerFactory>) {
        if let Some(engine) = self.engine.upgrade() {
            engine.factory_added(factory);
        }
    }

    fn factory_removed(&self, factory: &Arc<dyn ModuleHandlerFactory>) {
        if let Some(engine) = self.engine.upgrade() {
            engine.factory_removed(factory);
        }
    }
}

pub(crate) struct ModuleTypeWatcher {
    pub engine: Weak<RuleEngine>,
}

impl ModuleTypeListener for ModuleTypeWatcher {
    fn module_types_updated(&self, module_types: &[ModuleType]) {
        if let Some(engine) = self.engine.upgrade() {
            engine.module_types_updated(module_types);
        }
    }
}

pub(crate) struct TemplateWatcher {
    pub engine: Weak<RuleEngine>,
}

impl TemplateListener for TemplateWatcher {
    fn templates_updated(&self, templates: &[RuleTemplate]) {
        if let Some(engine) = self.engine.upgrade() {
            engine.templates_updated(templates);
        }
    }
}
