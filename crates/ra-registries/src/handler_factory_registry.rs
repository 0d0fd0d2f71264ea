//! Handler-factory registry
//!
//! Tracks the handler factories currently offered by module providers.
//! Subscribing replays `factory_added` for every factory already present,
//! so a late-starting engine observes the same sequence as one that was
//! running from the beginning.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

use ra_core::ModuleHandlerFactory;

use crate::SubscriptionId;

/// Handle identifying a registered factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FactoryId(u64);

/// Observer of factory appearance and disappearance.
pub trait FactoryListener: Send + Sync {
    /// A factory became available.
    fn factory_added(&self, factory: &Arc<dyn ModuleHandlerFactory>);

    /// A factory went away. Handlers it produced must no longer be used.
    fn factory_removed(&self, factory: &Arc<dyn ModuleHandlerFactory>);
}

/// Registry of live handler factories.
pub struct HandlerFactoryRegistry {
    factories: DashMap<u64, Arc<dyn ModuleHandlerFactory>>,
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn FactoryListener>)>>,
    next_factory: AtomicU64,
    next_subscription: AtomicU64,
}

impl HandlerFactoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            next_factory: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Register a factory and notify listeners.
    pub fn add(&self, factory: Arc<dyn ModuleHandlerFactory>) -> FactoryId {
        let id = FactoryId(self.next_factory.fetch_add(1, Ordering::SeqCst));
        debug!(types = ?factory.module_types(), "Registering handler factory");
        self.factories.insert(id.0, factory.clone());

        let listeners = self.current_listeners();
        for listener in listeners {
            listener.factory_added(&factory);
        }
        id
    }

    /// Unregister a factory and notify listeners. Returns whether a
    /// factory was removed.
    pub fn remove(&self, id: FactoryId) -> bool {
        let Some((_, factory)) = self.factories.remove(&id.0) else {
            return false;
        };
        debug!(types = ?factory.module_types(), "Unregistering handler factory");

        let listeners = self.current_listeners();
        for listener in listeners {
            listener.factory_removed(&factory);
        }
        true
    }

    /// All currently registered factories.
    pub fn factories(&self) -> Vec<Arc<dyn ModuleHandlerFactory>> {
        self.factories
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Subscribe to factory changes. The listener immediately receives
    /// `factory_added` for every factory already present.
    pub fn subscribe(&self, listener: Arc<dyn FactoryListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().unwrap().push((id, listener.clone()));

        for factory in self.factories() {
            listener.factory_added(&factory);
        }
        id
    }

    /// Close a subscription. Returns whether it was open.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().unwrap();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    fn current_listeners(&self) -> Vec<Arc<dyn FactoryListener>> {
        self.listeners
            .read()
            .unwrap()
            .iter()
            .map(|(_, l)| l.clone())
            .collect()
    }
}

impl Default for HandlerFactoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
