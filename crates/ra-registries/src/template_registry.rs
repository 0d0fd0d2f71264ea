//! Template registry
//!
//! Holds the rule templates currently known to the runtime. Rules that
//! reference a template which has not been registered yet stay dormant;
//! the engine materializes them as soon as the template arrives.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

use ra_core::RuleTemplate;

use crate::SubscriptionId;

/// Observer of template changes.
pub trait TemplateListener: Send + Sync {
    /// Called with every batch of added or updated templates.
    fn templates_updated(&self, templates: &[RuleTemplate]);
}

/// Registry of rule templates keyed by template UID.
pub struct TemplateRegistry {
    templates: DashMap<String, RuleTemplate>,
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn TemplateListener>)>>,
    next_subscription: AtomicU64,
}

impl TemplateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            templates: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Add or update a template and notify listeners.
    pub fn add(&self, template: RuleTemplate) {
        debug!(uid = %template.uid, "Adding rule template");
        let notified = template.clone();
        self.templates.insert(template.uid.clone(), template);
        self.notify(&[notified]);
    }

    /// Remove a template. Returns the removed template, if any.
    pub fn remove(&self, uid: &str) -> Option<RuleTemplate> {
        let removed = self.templates.remove(uid).map(|(_, t)| t);
        if removed.is_some() {
            debug!(uid = %uid, "Removed rule template");
        }
        removed
    }

    /// Look up a template by UID.
    pub fn get(&self, uid: &str) -> Option<RuleTemplate> {
        self.templates.get(uid).map(|t| t.clone())
    }

    /// All registered templates.
    pub fn templates(&self) -> Vec<RuleTemplate> {
        self.templates
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Subscribe to template changes.
    pub fn subscribe(&self, listener: Arc<dyn TemplateListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().unwrap().push((id, listener));
        id
    }

    /// Close a subscription. Returns whether it was open.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().unwrap();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    fn notify(&self, templates: &[RuleTemplate]) {
        let listeners: Vec<_> = self
            .listeners
            .read()
            .unwrap()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener.templates_updated(templates);
        }
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
