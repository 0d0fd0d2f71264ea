//! Per-rule trigger callback
//!
//! One callback is created per rule when its triggers are registered and
//! handed to every trigger handler of that rule. The callback holds a
//! non-owning reference to the engine; disposing it severs the bridge so
//! that firings delivered after teardown are ignored instead of reaching a
//! torn-down rule.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use tracing::debug;

use ra_core::{TriggerCallback, ValueMap};

use crate::engine::RuleEngine;

pub(crate) struct EngineTriggerCallback {
    engine: Weak<RuleEngine>,
    rule_uid: String,
    disposed: AtomicBool,
}

impl EngineTriggerCallback {
    pub fn new(engine: Weak<RuleEngine>, rule_uid: &str) -> Self {
        Self {
            engine,
            rule_uid: rule_uid.to_string(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Sever the bridge. Handlers may keep their reference; subsequent
    /// firings through it are dropped.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

impl TriggerCallback for EngineTriggerCallback {
    fn triggered(&self, trigger_id: &str, outputs: ValueMap) {
        if self.disposed.load(Ordering::Acquire) {
            debug!(
                rule_uid = %self.rule_uid,
                trigger_id = %trigger_id,
                "Ignoring firing on disposed callback"
            );
            return;
        }
        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        engine.run_rule(&self.rule_uid, trigger_id, outputs);
    }
}
