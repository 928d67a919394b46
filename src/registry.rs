use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionKind {
    Document,
    Collection,
}

/// A live realtime subscription: its kind plus the teardown closure that
/// detaches the underlying listener. Teardown closures are idempotent.
#[derive(Clone)]
pub struct SubscriptionHandle {
    kind: SubscriptionKind,
    unsubscribe: Arc<dyn Fn() + Send + Sync>,
}

impl SubscriptionHandle {
    pub fn new(kind: SubscriptionKind, unsubscribe: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self { kind, unsubscribe }
    }

    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    pub fn unsubscribe(&self) {
        (self.unsubscribe)();
    }
}

/// Bookkeeping for live subscriptions, keyed by `(owner id, resource id)`.
/// At most one handle exists per key.
///
/// The registry is a context-owned instance: each store receives one by
/// injection (tests hand every store a fresh registry), with a process-wide
/// default for callers that do not care. `remove` never tears a listener
/// down (teardown belongs to the caller), but `store` over a live entry
/// runs the previous handle's teardown before overwriting, so replacement
/// can never leak a listener.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<(String, String), SubscriptionHandle>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The process-wide default registry.
    pub fn global() -> Arc<Self> {
        static GLOBAL: Lazy<Arc<SubscriptionRegistry>> = Lazy::new(SubscriptionRegistry::new);
        Arc::clone(&GLOBAL)
    }

    /// Registers the handle for `(owner, resource)`. A previous live entry is
    /// unsubscribed first, then replaced.
    pub fn store(&self, owner: &str, resource: &str, handle: SubscriptionHandle) {
        let previous = {
            let mut entries = self.entries.lock().unwrap();
            entries.insert((owner.to_string(), resource.to_string()), handle)
        };
        if let Some(previous) = previous {
            log::debug!("replacing live subscription {owner}/{resource}; detaching previous listener");
            previous.unsubscribe();
        }
    }

    /// Pure lookup; no side effects.
    pub fn pick(&self, owner: &str, resource: &str) -> Option<SubscriptionHandle> {
        self.entries
            .lock()
            .unwrap()
            .get(&(owner.to_string(), resource.to_string()))
            .cloned()
    }

    /// Deletes the entry if present. Idempotent, and never invokes the
    /// handle's teardown.
    pub fn remove(&self, owner: &str, resource: &str) {
        self.entries
            .lock()
            .unwrap()
            .remove(&(owner.to_string(), resource.to_string()));
    }

    /// Drains every entry belonging to `owner`, returning the handles so the
    /// caller can tear them down.
    pub fn take_owner(&self, owner: &str) -> Vec<SubscriptionHandle> {
        let mut entries = self.entries.lock().unwrap();
        let keys: Vec<(String, String)> = entries
            .keys()
            .filter(|(entry_owner, _)| entry_owner == owner)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| entries.remove(&key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
