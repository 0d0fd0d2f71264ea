//! Module-type registry
//!
//! Holds the module-type schemas currently known to the runtime. Providers
//! add and remove definitions at any time; the engine re-drives affected
//! rules when definitions it was waiting for appear.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

use ra_core::{ModuleKind, ModuleType};

use crate::SubscriptionId;

/// Observer of module-type definition changes.
pub trait ModuleTypeListener: Send + Sync {
    /// Called with every batch of added or updated definitions.
    fn module_types_updated(&self, module_types: &[ModuleType]);
}

/// Registry of module-type schemas keyed by type UID.
pub struct ModuleTypeRegistry {
    types: DashMap<String, ModuleType>,
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn ModuleTypeListener>)>>,
    next_subscription: AtomicU64,
}

impl ModuleTypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            types: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Add or update a module-type definition and notify listeners.
    pub fn add(&self, module_type: ModuleType) {
        debug!(uid = %module_type.uid, "Adding module type");
        let notified = module_type.clone();
        self.types.insert(module_type.uid.clone(), module_type);
        self.notify(&[notified]);
    }

    /// Add or update a batch of definitions, notifying listeners once.
    pub fn add_all(&self, module_types: Vec<ModuleType>) {
        for module_type in &module_types {
            self.types
                .insert(module_type.uid.clone(), module_type.clone());
        }
        debug!(count = module_types.len(), "Added module types");
        self.notify(&module_types);
    }

    /// Remove a definition. Returns the removed schema, if any.
    pub fn remove(&self, uid: &str) -> Option<ModuleType> {
        let removed = self.types.remove(uid).map(|(_, mt)| mt);
        if removed.is_some() {
            debug!(uid = %uid, "Removed module type");
        }
        removed
    }

    /// Look up a definition by UID. `locale` selects localized labels;
    /// definitions are currently served unlocalized.
    pub fn get(&self, uid: &str, _locale: Option<&str>) -> Option<ModuleType> {
        self.types.get(uid).map(|mt| mt.clone())
    }

    /// All definitions, optionally filtered by module kind.
    pub fn types(&self, kind: Option<ModuleKind>, _locale: Option<&str>) -> Vec<ModuleType> {
        self.types
            .iter()
            .filter(|entry| kind.is_none_or(|k| entry.kind == k))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// All definitions carrying the given tag.
    pub fn types_by_tag(&self, tag: &str, _locale: Option<&str>) -> Vec<ModuleType> {
        self.types
            .iter()
            .filter(|entry| entry.tags.contains(tag))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of registered definitions.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Subscribe to definition changes.
    pub fn subscribe(&self, listener: Arc<dyn ModuleTypeListener>) -> SubscriptionId {
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

    fn notify(&self, module_types: &[ModuleType]) {
        let listeners: Vec<_> = self
            .listeners
            .read()
            .unwrap()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener.module_types_updated(module_types);
        }
    }
}

impl Default for ModuleTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
