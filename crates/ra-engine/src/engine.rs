//! Engine core
//!
//! [`RuleEngine`] owns the canonical rule store, the index structures, the
//! status map, and the per-rule execution contexts. Registry-mutating
//! operations and registry-watcher callbacks serialize on a single
//! engine-wide lock; the bodies of condition and action execution run
//! without it so long handlers never block registration.

use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tracing::{debug, info};

use ra_core::{
    uid::rule_uid_suffix, ModuleHandlerFactory, ModuleType, Rule, RuleStatus, RuleStatusInfo,
    RuleTemplate, StatusListener, ValueMap, RULE_UID_PREFIX,
};
use ra_registries::{
    HandlerFactoryRegistry, ModuleTypeRegistry, SubscriptionId, TemplateRegistry,
};

use crate::callback::EngineTriggerCallback;
use crate::composite::CompositeHandlerFactory;
use crate::error::EngineError;
use crate::runtime::RuntimeRule;
use crate::watcher::{FactoryWatcher, ModuleTypeWatcher, TemplateWatcher};

/// State guarded by the engine-wide lock.
pub(crate) struct EngineInner {
    /// Canonical rules by UID
    pub rules: HashMap<String, RuntimeRule>,
    /// Module-type UID → rules referencing it
    pub module_type_index: HashMap<String, HashSet<String>>,
    /// Template UID → rules awaiting or derived from it
    pub template_index: HashMap<String, HashSet<String>>,
    /// System module-type UID → responsible factory
    pub factories: HashMap<String, Arc<dyn ModuleHandlerFactory>>,
    /// Rule UID → its trigger callback
    pub callbacks: HashMap<String, Arc<EngineTriggerCallback>>,
    /// Open registry subscriptions
    pub subscriptions: Vec<Subscription>,
    /// Next numeric suffix for generated rule UIDs
    pub next_rule_index: u64,
    /// Terminal flag set by `dispose`
    pub disposed: bool,
}

pub(crate) enum Subscription {
    ModuleTypes(SubscriptionId),
    Templates(SubscriptionId),
    Factories(SubscriptionId),
}

/// The rule engine.
///
/// Created with [`RuleEngine::new`] and activated with
/// [`RuleEngine::start`], which opens the registry subscriptions. All rule
/// exchanges across this boundary are deep copies; callers never share
/// state with the engine.
pub struct RuleEngine {
    pub(crate) self_ref: Weak<RuleEngine>,
    pub(crate) inner: Mutex<EngineInner>,
    pub(crate) status_map: DashMap<String, RuleStatusInfo>,
    pub(crate) contexts: DashMap<String, ValueMap>,
    pub(crate) status_listener: RwLock<Option<Arc<dyn StatusListener>>>,
    pub(crate) module_types: Arc<ModuleTypeRegistry>,
    pub(crate) templates: Arc<TemplateRegistry>,
    factory_registry: Arc<HandlerFactoryRegistry>,
    pub(crate) composite: CompositeHandlerFactory,
    started: AtomicBool,
}

impl RuleEngine {
    /// Create an engine observing the given registries. The engine is
    /// inert until [`start`](Self::start) is called.
    pub fn new(
        module_types: Arc<ModuleTypeRegistry>,
        templates: Arc<TemplateRegistry>,
        factories: Arc<HandlerFactoryRegistry>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            inner: Mutex::new(EngineInner {
                rules: HashMap::new(),
                module_type_index: HashMap::new(),
                template_index: HashMap::new(),
                factories: HashMap::new(),
                callbacks: HashMap::new(),
                subscriptions: Vec::new(),
                next_rule_index: 1,
                disposed: false,
            }),
            status_map: DashMap::new(),
            contexts: DashMap::new(),
            status_listener: RwLock::new(None),
            composite: CompositeHandlerFactory::new(module_types.clone()),
            module_types,
            templates,
            factory_registry: factories,
            started: AtomicBool::new(false),
        })
    }

    /// Open the registry subscriptions. Factories already present are
    /// replayed, so rules added before `start` still bind. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.inner.lock().unwrap().disposed {
            return;
        }

        let types = self.module_types.subscribe(Arc::new(ModuleTypeWatcher {
            engine: self.self_ref.clone(),
        }));
        let templates = self.templates.subscribe(Arc::new(TemplateWatcher {
            engine: self.self_ref.clone(),
        }));
        let factories = self.factory_registry.subscribe(Arc::new(FactoryWatcher {
            engine: self.self_ref.clone(),
        }));

        let mut inner = self.inner.lock().unwrap();
        inner.subscriptions = vec![
            Subscription::ModuleTypes(types),
            Subscription::Templates(templates),
            Subscription::Factories(factories),
        ];
        info!("Rule engine started");
    }

    /// Register a rule without a scope. See
    /// [`add_rule_scoped`](Self::add_rule_scoped).
    pub fn add_rule(&self, rule: Rule) -> Result<String, EngineError> {
        self.add_rule_scoped(rule, None)
    }

    /// Register a rule on behalf of the given scope and drive its
    /// initialization. Returns the rule's UID, generating `rule_<n>` when
    /// the rule carries none.
    pub fn add_rule_scoped(&self, rule: Rule, scope: Option<&str>) -> Result<String, EngineError> {
        rule.validate()?;
        let mut inner = self.inner.lock().unwrap();
        if inner.disposed {
            return Err(EngineError::Disposed);
        }

        let uid = match &rule.uid {
            Some(uid) => {
                if inner.rules.contains_key(uid) {
                    return Err(EngineError::DuplicateRule(uid.clone()));
                }
                // Keep generated UIDs ahead of explicitly supplied ones in
                // the same namespace.
                if let Some(n) = rule_uid_suffix(uid) {
                    inner.next_rule_index = inner.next_rule_index.max(n + 1);
                }
                uid.clone()
            }
            None => {
                let uid = format!("{}{}", RULE_UID_PREFIX, inner.next_rule_index);
                inner.next_rule_index += 1;
                uid
            }
        };

        let mut definition = rule;
        definition.uid = Some(uid.clone());
        inner
            .rules
            .insert(uid.clone(), RuntimeRule::new(definition, scope.map(str::to_string)));
        debug!(rule_uid = %uid, "Rule added");

        self.set_rule_locked(&mut inner, &uid);
        Ok(uid)
    }

    /// Replace a registered rule with a new definition. The previous
    /// activation is torn down before the new definition is bound.
    pub fn update_rule(&self, rule: Rule) -> Result<(), EngineError> {
        rule.validate()?;
        let uid = rule.uid.clone().ok_or(EngineError::MissingUid)?;

        let mut inner = self.inner.lock().unwrap();
        if inner.disposed {
            return Err(EngineError::Disposed);
        }
        if !inner.rules.contains_key(&uid) {
            return Err(EngineError::RuleNotFound(uid));
        }

        self.unregister_locked(&mut inner, &uid);
        prune_indexes(&mut inner, &uid);

        let scope = inner.rules.get(&uid).and_then(|r| r.scope.clone());
        inner.rules.insert(uid.clone(), RuntimeRule::new(rule, scope));
        debug!(rule_uid = %uid, "Rule updated");

        self.set_rule_locked(&mut inner, &uid);
        Ok(())
    }

    /// Remove a rule, tearing down its activation and every index entry.
    /// Returns whether a rule was removed.
    pub fn remove_rule(&self, uid: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.disposed || !inner.rules.contains_key(uid) {
            return false;
        }

        self.unregister_locked(&mut inner, uid);
        inner.rules.remove(uid);
        prune_indexes(&mut inner, uid);
        drop(inner);

        self.status_map.remove(uid);
        self.contexts.remove(uid);
        debug!(rule_uid = %uid, "Rule removed");
        true
    }

    /// A deep copy of the rule with the given UID.
    pub fn rule(&self, uid: &str) -> Option<Rule> {
        self.inner
            .lock()
            .unwrap()
            .rules
            .get(uid)
            .map(|r| r.definition.clone())
    }

    /// Deep copies of all registered rules.
    pub fn rules(&self) -> Vec<Rule> {
        self.inner
            .lock()
            .unwrap()
            .rules
            .values()
            .map(|r| r.definition.clone())
            .collect()
    }

    /// Rules carrying the given tag.
    pub fn rules_by_tag(&self, tag: &str) -> Vec<Rule> {
        self.inner
            .lock()
            .unwrap()
            .rules
            .values()
            .filter(|r| r.definition.tags.contains(tag))
            .map(|r| r.definition.clone())
            .collect()
    }

    /// Rules carrying any of the given tags.
    pub fn rules_by_tags(&self, tags: &HashSet<String>) -> Vec<Rule> {
        self.inner
            .lock()
            .unwrap()
            .rules
            .values()
            .filter(|r| r.definition.tags.iter().any(|t| tags.contains(t)))
            .map(|r| r.definition.clone())
            .collect()
    }

    /// Toggle a rule between enabled and disabled.
    ///
    /// Disabling tears the rule down; enabling a disabled rule drives
    /// initialization again. Enabling an already enabled rule is a no-op.
    pub fn set_enabled(&self, uid: &str, enabled: bool) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.disposed {
            return Err(EngineError::Disposed);
        }
        if !inner.rules.contains_key(uid) {
            return Err(EngineError::RuleNotFound(uid.to_string()));
        }

        if enabled {
            if self.current_status(uid) == Some(RuleStatus::Disabled) {
                self.set_status_info(uid, RuleStatusInfo::new(RuleStatus::NotInitialized));
                self.set_rule_locked(&mut inner, uid);
            } else {
                info!(rule_uid = %uid, "Rule is already enabled");
            }
        } else {
            self.unregister_locked(&mut inner, uid);
            self.set_status_info(uid, RuleStatusInfo::new(RuleStatus::Disabled));
        }
        Ok(())
    }

    /// The full status info of a rule.
    pub fn status_info(&self, uid: &str) -> Option<RuleStatusInfo> {
        self.status_map.get(uid).map(|info| info.clone())
    }

    /// The current status of a rule.
    pub fn status(&self, uid: &str) -> Option<RuleStatus> {
        self.current_status(uid)
    }

    /// The accumulated execution context of a rule: qualified
    /// `<moduleId>.<outputName>` entries from past firings.
    pub fn execution_context(&self, uid: &str) -> Option<ValueMap> {
        self.contexts.get(uid).map(|c| c.clone())
    }

    /// The distinct scope identifiers of all registered rules.
    pub fn scope_identifiers(&self) -> BTreeSet<String> {
        self.inner
            .lock()
            .unwrap()
            .rules
            .values()
            .filter_map(|r| r.scope.clone())
            .collect()
    }

    /// Attach or detach the status observer. At most one is active.
    ///
    /// The listener is invoked under the engine lock and must not call
    /// back into mutating engine APIs.
    pub fn set_status_listener(&self, listener: Option<Arc<dyn StatusListener>>) {
        *self.status_listener.write().unwrap() = listener;
    }

    /// Shut the engine down: close registry subscriptions, tear down every
    /// rule (returning handlers to their factories), and clear all state.
    /// Terminal; subsequent mutations fail with [`EngineError::Disposed`].
    pub fn dispose(&self) {
        let subscriptions = {
            let mut inner = self.inner.lock().unwrap();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            std::mem::take(&mut inner.subscriptions)
        };

        for subscription in subscriptions {
            match subscription {
                Subscription::ModuleTypes(id) => {
                    self.module_types.unsubscribe(id);
                }
                Subscription::Templates(id) => {
                    self.templates.unsubscribe(id);
                }
                Subscription::Factories(id) => {
                    self.factory_registry.unsubscribe(id);
                }
            }
        }

        let mut inner = self.inner.lock().unwrap();
        let uids: Vec<String> = inner.rules.keys().cloned().collect();
        for uid in &uids {
            self.unregister_locked(&mut inner, uid);
        }
        inner.rules.clear();
        inner.module_type_index.clear();
        inner.template_index.clear();
        inner.factories.clear();
        inner.callbacks.clear();
        drop(inner);

        self.status_map.clear();
        self.contexts.clear();
        *self.status_listener.write().unwrap() = None;
        info!("Rule engine disposed");
    }

    // ---- watcher entry points ------------------------------------------

    pub(crate) fn factory_added(&self, factory: &Arc<dyn ModuleHandlerFactory>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.disposed {
            return;
        }

        let types = factory.module_types();
        info!(types = ?types, "Handler factory available");

        let mut pending = BTreeSet::new();
        for type_uid in &types {
            inner.factories.insert(type_uid.clone(), factory.clone());
            if let Some(rules) = inner.module_type_index.get(type_uid) {
                for uid in rules {
                    if self.current_status(uid) == Some(RuleStatus::NotInitialized) {
                        pending.insert(uid.clone());
                    }
                }
            }
        }
        for uid in pending {
            self.set_rule_locked(&mut inner, &uid);
        }
    }

    pub(crate) fn factory_removed(&self, factory: &Arc<dyn ModuleHandlerFactory>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.disposed {
            return;
        }

        let types = factory.module_types();
        info!(types = ?types, "Handler factory disappeared");

        let mut affected: HashMap<String, Vec<String>> = HashMap::new();
        for type_uid in &types {
            if let Some(rules) = inner.module_type_index.get(type_uid) {
                for uid in rules {
                    if matches!(
                        self.current_status(uid),
                        Some(RuleStatus::Idle | RuleStatus::Running)
                    ) {
                        affected
                            .entry(uid.clone())
                            .or_default()
                            .push(type_uid.clone());
                    }
                }
            }
        }

        // Rules lose their activation while the factory is still mapped,
        // so their handlers can be returned to it.
        for (uid, missing) in affected {
            self.unregister_locked(&mut inner, &uid);
            let message = missing
                .iter()
                .map(|t| format!("missing handler for module type '{}'", t))
                .collect::<Vec<_>>()
                .join("\n");
            self.set_status_info(
                &uid,
                RuleStatusInfo::with_detail(
                    RuleStatus::NotInitialized,
                    ra_core::RuleStatusDetail::HandlerMissing,
                    message,
                ),
            );
        }

        for type_uid in &types {
            if inner
                .factories
                .get(type_uid)
                .is_some_and(|f| Arc::ptr_eq(f, factory))
            {
                inner.factories.remove(type_uid);
            }
        }
    }

    pub(crate) fn module_types_updated(&self, module_types: &[ModuleType]) {
        let mut inner = self.inner.lock().unwrap();
        if inner.disposed {
            return;
        }

        let mut pending = BTreeSet::new();
        for module_type in module_types {
            if let Some(rules) = inner.module_type_index.get(&module_type.uid) {
                for uid in rules {
                    if self.current_status(uid) == Some(RuleStatus::NotInitialized) {
                        pending.insert(uid.clone());
                    }
                }
            }
        }
        for uid in pending {
            self.set_rule_locked(&mut inner, &uid);
        }
    }

    pub(crate) fn templates_updated(&self, templates: &[RuleTemplate]) {
        let mut inner = self.inner.lock().unwrap();
        if inner.disposed {
            return;
        }

        let mut pending = BTreeSet::new();
        for template in templates {
            if let Some(rules) = inner.template_index.get(&template.uid) {
                for uid in rules {
                    if self.current_status(uid) == Some(RuleStatus::NotInitialized) {
                        pending.insert(uid.clone());
                    }
                }
            }
        }
        for uid in pending {
            self.set_rule_locked(&mut inner, &uid);
        }
    }

    // ---- status --------------------------------------------------------

    pub(crate) fn current_status(&self, uid: &str) -> Option<RuleStatus> {
        self.status_map.get(uid).map(|info| info.status)
    }

    /// Record a status transition and publish it to the observer. Callers
    /// hold the engine lock, which serializes transitions per rule.
    pub(crate) fn set_status_info(&self, uid: &str, info: RuleStatusInfo) {
        let previous = self.current_status(uid);
        if let Some(previous) = previous {
            if !previous.can_transition_to(info.status) {
                tracing::warn!(
                    rule_uid = %uid,
                    from = %previous,
                    to = %info.status,
                    "Unexpected rule status transition"
                );
            }
        }

        debug!(rule_uid = %uid, status = %info, "Rule status changed");
        self.status_map.insert(uid.to_string(), info.clone());

        let listener = self.status_listener.read().unwrap().clone();
        if let Some(listener) = listener {
            listener.status_changed(uid, &info);
        }
    }
}

/// Drop every index entry pointing at the given rule, removing emptied
/// index keys entirely.
pub(crate) fn prune_indexes(inner: &mut EngineInner, uid: &str) {
    inner.module_type_index.retain(|_, rules| {
        rules.remove(uid);
        !rules.is_empty()
    });
    inner.template_index.retain(|_, rules| {
        rules.remove(uid);
        !rules.is_empty()
    });
}
