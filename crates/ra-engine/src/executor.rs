//! Rule execution
//!
//! Entered when a trigger callback fires. The status gate (`IDLE` →
//! `RUNNING`) is taken under the engine lock; the condition and action
//! bodies run without it so a slow handler never blocks registration.
//! A firing that arrives while the rule is already `RUNNING` is dropped.

use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, warn};

use ra_core::{RuleStatus, RuleStatusInfo, ValueMap};

use crate::connection::input_values;
use crate::engine::RuleEngine;
use crate::runtime::Activation;

impl RuleEngine {
    /// Execute a rule in response to a trigger firing. Runs on the firing
    /// handler's thread.
    pub(crate) fn run_rule(&self, rule_uid: &str, trigger_id: &str, outputs: ValueMap) {
        let activation = {
            let inner = self.inner.lock().unwrap();
            if inner.disposed {
                return;
            }
            let Some(rule) = inner.rules.get(rule_uid) else {
                debug!(rule_uid = %rule_uid, "Dropping trigger firing: rule no longer exists");
                return;
            };
            let status = self.current_status(rule_uid);
            if status != Some(RuleStatus::Idle) {
                warn!(
                    rule_uid = %rule_uid,
                    status = ?status,
                    "Dropping trigger firing: rule is not idle"
                );
                return;
            }
            let Some(activation) = rule.activation.clone() else {
                warn!(rule_uid = %rule_uid, "Dropping trigger firing: rule has no activation");
                return;
            };
            self.set_status_info(rule_uid, RuleStatusInfo::new(RuleStatus::Running));
            activation
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.execute(rule_uid, trigger_id, outputs, &activation)
        }));
        if outcome.is_err() {
            error!(rule_uid = %rule_uid, "Rule execution panicked");
        }

        // A teardown may have forced a different status while the rule was
        // in flight; only the RUNNING → IDLE completion is ours to make.
        let _inner = self.inner.lock().unwrap();
        if self.current_status(rule_uid) == Some(RuleStatus::Running) {
            self.set_status_info(rule_uid, RuleStatusInfo::new(RuleStatus::Idle));
        }
    }

    fn execute(&self, rule_uid: &str, trigger_id: &str, outputs: ValueMap, activation: &Activation) {
        match activation.trigger(trigger_id) {
            Some(trigger) => {
                trigger.set_outputs(outputs.clone());
                self.update_context(rule_uid, trigger_id, &outputs);
            }
            None => {
                warn!(
                    rule_uid = %rule_uid,
                    trigger_id = %trigger_id,
                    "Firing names an unknown trigger module"
                );
            }
        }

        if self.check_conditions(rule_uid, activation) {
            self.run_actions(rule_uid, activation);
            debug!(rule_uid = %rule_uid, "Rule executed");
        } else {
            debug!(rule_uid = %rule_uid, "Conditions not satisfied; actions skipped");
        }
    }

    /// Evaluate conditions in declared order, stopping at the first that
    /// is not satisfied.
    fn check_conditions(&self, rule_uid: &str, activation: &Activation) -> bool {
        for condition in &activation.conditions {
            let resolved = condition.connected_outputs(activation);
            let inputs = input_values(&resolved);
            let mut context = self.context_snapshot(rule_uid);
            context.extend(inputs);

            let Some(handler) = condition.handler() else {
                warn!(
                    rule_uid = %rule_uid,
                    condition = %condition.module.id,
                    "Condition handler detached mid-flight; aborting execution"
                );
                return false;
            };
            if !handler.is_satisfied(&context) {
                debug!(
                    rule_uid = %rule_uid,
                    condition = %condition.module.id,
                    "Condition not satisfied"
                );
                return false;
            }
        }
        true
    }

    /// Execute actions in declared order. A failing action is logged and
    /// does not abort the rest of the rule.
    fn run_actions(&self, rule_uid: &str, activation: &Activation) {
        for action in &activation.actions {
            let resolved = action.connected_outputs(activation);
            let inputs = input_values(&resolved);
            let mut context = self.context_snapshot(rule_uid);
            context.extend(inputs);

            let Some(handler) = action.handler() else {
                warn!(
                    rule_uid = %rule_uid,
                    action = %action.module.id,
                    "Action handler detached mid-flight; skipping"
                );
                continue;
            };
            match handler.execute(&context) {
                Ok(Some(outputs)) => {
                    action.set_outputs(outputs.clone());
                    self.update_context(rule_uid, &action.module.id, &outputs);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        rule_uid = %rule_uid,
                        action = %action.module.id,
                        error = %e,
                        "Action execution failed"
                    );
                }
            }
        }
    }

    /// A copy of the rule's accumulated execution context.
    fn context_snapshot(&self, rule_uid: &str) -> ValueMap {
        self.contexts
            .get(rule_uid)
            .map(|context| context.clone())
            .unwrap_or_default()
    }

    /// Publish a module's outputs into the rule's execution context as
    /// `<moduleId>.<outputName>` entries.
    fn update_context(&self, rule_uid: &str, module_id: &str, outputs: &ValueMap) {
        let mut context = self.contexts.entry(rule_uid.to_string()).or_default();
        for (name, value) in outputs {
            context.insert(format!("{}.{}", module_id, name), value.clone());
        }
    }
}
