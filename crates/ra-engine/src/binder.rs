//! Handler binding
//!
//! Initialization pipeline for a rule: materialize modules (expanding the
//! template if the rule is template-bound), locate the factory responsible
//! for each module's system type, attach handlers, validate the declared
//! connections, and register the trigger callback. Binding failures are
//! accumulated and reported through a single status update; the rule then
//! waits for a registry event to retry.

use std::sync::Arc;
use tracing::{debug, warn};

use ra_core::{
    system_type, Handler, ModuleRef, RuleStatus, RuleStatusDetail, RuleStatusInfo,
};

use crate::callback::EngineTriggerCallback;
use crate::connection::validate_connections;
use crate::engine::{EngineInner, RuleEngine};
use crate::runtime::Activation;
use crate::template::expand;

impl RuleEngine {
    /// Try to initialize a rule. Must be called with the engine lock held.
    ///
    /// On success the rule's triggers are registered and the rule goes
    /// `IDLE`; otherwise it stays `NOT_INITIALIZED` with a detail
    /// describing what is missing.
    pub(crate) fn set_rule_locked(&self, inner: &mut EngineInner, uid: &str) {
        if inner.disposed {
            return;
        }
        let Some(definition) = inner.rules.get(uid).map(|r| r.definition.clone()) else {
            return;
        };
        if self.current_status(uid) == Some(RuleStatus::Disabled) {
            return;
        }

        // Announce NOT_INITIALIZED on every attempt so the observer sees
        // binding retries, not only the final outcome.
        self.set_status_info(uid, RuleStatusInfo::new(RuleStatus::NotInitialized));

        let (triggers, conditions, actions) = if let Some(template_uid) =
            definition.template_uid.as_deref()
        {
            inner
                .template_index
                .entry(template_uid.to_string())
                .or_default()
                .insert(uid.to_string());

            let Some(template) = self.templates.get(template_uid) else {
                debug!(rule_uid = %uid, template_uid = %template_uid, "Rule template is not available");
                self.set_status_info(
                    uid,
                    RuleStatusInfo::with_detail(
                        RuleStatus::NotInitialized,
                        RuleStatusDetail::TemplateMissing,
                        format!("template '{}' is not available", template_uid),
                    ),
                );
                return;
            };
            match expand(&template, &definition.configuration) {
                Ok(parts) => parts,
                Err(e) => {
                    self.set_status_info(
                        uid,
                        RuleStatusInfo::with_detail(
                            RuleStatus::NotInitialized,
                            RuleStatusDetail::ConfigurationError,
                            e.to_string(),
                        ),
                    );
                    return;
                }
            }
        } else {
            (
                definition.triggers.clone(),
                definition.conditions.clone(),
                definition.actions.clone(),
            )
        };

        // Discard any stale activation before binding fresh handlers.
        self.unregister_locked(inner, uid);

        let activation = Arc::new(Activation::new(triggers, conditions, actions));
        let mut errors = Vec::new();

        for trigger in &activation.triggers {
            let module = trigger.module_ref();
            index_module_type(inner, module.type_uid(), uid);
            match self.create_handler_locked(inner, &module, uid) {
                Ok(Handler::Trigger(handler)) => {
                    trigger.set_handler(Some(handler));
                }
                Ok(other) => errors.push(self.reject_mismatched(inner, &module, uid, other)),
                Err(message) => errors.push(message),
            }
        }
        for condition in &activation.conditions {
            let module = condition.module_ref();
            index_module_type(inner, module.type_uid(), uid);
            match self.create_handler_locked(inner, &module, uid) {
                Ok(Handler::Condition(handler)) => {
                    condition.set_handler(Some(handler));
                }
                Ok(other) => errors.push(self.reject_mismatched(inner, &module, uid, other)),
                Err(message) => errors.push(message),
            }
        }
        for action in &activation.actions {
            let module = action.module_ref();
            index_module_type(inner, module.type_uid(), uid);
            match self.create_handler_locked(inner, &module, uid) {
                Ok(Handler::Action(handler)) => {
                    action.set_handler(Some(handler));
                }
                Ok(other) => errors.push(self.reject_mismatched(inner, &module, uid, other)),
                Err(message) => errors.push(message),
            }
        }

        errors.extend(validate_connections(&activation, &self.module_types));

        if errors.is_empty() {
            let callback = inner
                .callbacks
                .entry(uid.to_string())
                .or_insert_with(|| Arc::new(EngineTriggerCallback::new(self.self_ref.clone(), uid)))
                .clone();
            for trigger in &activation.triggers {
                if let Some(handler) = trigger.handler() {
                    handler.set_callback(Some(callback.clone()));
                }
            }
            if let Some(rule) = inner.rules.get_mut(uid) {
                rule.activation = Some(activation);
            }
            self.set_status_info(uid, RuleStatusInfo::new(RuleStatus::Idle));
            debug!(rule_uid = %uid, "Rule initialized");
        } else {
            self.release_activation_locked(inner, &activation, uid);
            self.set_status_info(
                uid,
                RuleStatusInfo::with_detail(
                    RuleStatus::NotInitialized,
                    RuleStatusDetail::HandlerInitializingError,
                    errors.join("\n"),
                ),
            );
            debug!(rule_uid = %uid, "Rule could not be initialized");
        }
    }

    /// Tear down a rule's activation: dispose its trigger callback, detach
    /// every handler, and return the handlers to their factories.
    pub(crate) fn unregister_locked(&self, inner: &mut EngineInner, uid: &str) {
        if let Some(callback) = inner.callbacks.remove(uid) {
            callback.dispose();
        }
        let activation = inner.rules.get_mut(uid).and_then(|r| r.activation.take());
        if let Some(activation) = activation {
            self.release_activation_locked(inner, &activation, uid);
        }
    }

    /// Detach and return every handler attached to an activation.
    pub(crate) fn release_activation_locked(
        &self,
        inner: &EngineInner,
        activation: &Activation,
        uid: &str,
    ) {
        for trigger in &activation.triggers {
            if let Some(handler) = trigger.set_handler(None) {
                handler.set_callback(None);
                self.release_handler_locked(
                    inner,
                    &trigger.module_ref(),
                    uid,
                    Handler::Trigger(handler),
                );
            }
        }
        for condition in &activation.conditions {
            if let Some(handler) = condition.set_handler(None) {
                self.release_handler_locked(
                    inner,
                    &condition.module_ref(),
                    uid,
                    Handler::Condition(handler),
                );
            }
        }
        for action in &activation.actions {
            if let Some(handler) = action.set_handler(None) {
                self.release_handler_locked(
                    inner,
                    &action.module_ref(),
                    uid,
                    Handler::Action(handler),
                );
            }
        }
    }

    /// Locate the responsible factory and request a handler for one module.
    /// Composite type UIDs are routed through the engine-owned composite
    /// factory, which delegates to the system parent's factory. Callers
    /// match on the returned variant and treat a mismatch as a binding
    /// error.
    fn create_handler_locked(
        &self,
        inner: &EngineInner,
        module: &ModuleRef<'_>,
        rule_uid: &str,
    ) -> Result<Handler, String> {
        let type_uid = module.type_uid();
        let system = system_type(type_uid);

        let Some(factory) = inner.factories.get(system) else {
            return Err(format!(
                "missing handler for module type '{}' (module '{}'): no factory for system type '{}'",
                type_uid,
                module.id(),
                system
            ));
        };

        let handler = if system == type_uid {
            factory.create_handler(module, rule_uid)
        } else {
            self.composite.create(module, rule_uid, factory)
        };
        handler.ok_or_else(|| {
            format!(
                "missing handler for module type '{}' (module '{}')",
                type_uid,
                module.id()
            )
        })
    }

    /// Return a handler whose kind does not match its module and describe
    /// the defect.
    fn reject_mismatched(
        &self,
        inner: &EngineInner,
        module: &ModuleRef<'_>,
        rule_uid: &str,
        handler: Handler,
    ) -> String {
        let message = format!(
            "handler kind mismatch for module '{}': expected {}, factory produced a {} handler",
            module.id(),
            module.kind(),
            handler.kind()
        );
        self.release_handler_locked(inner, module, rule_uid, handler);
        message
    }

    /// Return one handler to the factory that produced it, routing
    /// composite types back through the composite factory.
    fn release_handler_locked(
        &self,
        inner: &EngineInner,
        module: &ModuleRef<'_>,
        rule_uid: &str,
        handler: Handler,
    ) {
        let type_uid = module.type_uid();
        let system = system_type(type_uid);
        match inner.factories.get(system) {
            Some(factory) if system == type_uid => {
                factory.release_handler(module, rule_uid, handler)
            }
            Some(factory) => self.composite.release(module, rule_uid, factory, handler),
            None => {
                warn!(
                    type_uid = %type_uid,
                    rule_uid = %rule_uid,
                    "No factory to return handler to; dropping it"
                );
            }
        }
    }
}

/// Record that a rule references a module type, under both the full UID
/// and its system parent so the arrival of either re-drives binding.
fn index_module_type(inner: &mut EngineInner, type_uid: &str, rule_uid: &str) {
    inner
        .module_type_index
        .entry(type_uid.to_string())
        .or_default()
        .insert(rule_uid.to_string());
    let system = system_type(type_uid);
    if system != type_uid {
        inner
            .module_type_index
            .entry(system.to_string())
            .or_default()
            .insert(rule_uid.to_string());
    }
}
