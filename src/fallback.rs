use std::sync::Mutex;

use serde_json::Value;

/// A simple key-value store used when the remote store is unreachable or
/// deliberately bypassed (offline mode). When a store is configured with one,
/// the mutation pipeline routes create/sync there instead of the remote
/// store.
pub trait FallbackStore: Send + Sync + 'static {
    fn key(&self) -> &str;
    fn get(&self) -> Option<Value>;
    fn set(&self, value: Value);
}

/// In-memory [`FallbackStore`] holding a single value under its key.
pub struct MemoryFallbackStore {
    key: String,
    slot: Mutex<Option<Value>>,
}

impl MemoryFallbackStore {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            slot: Mutex::new(None),
        }
    }
}

impl FallbackStore for MemoryFallbackStore {
    fn key(&self) -> &str {
        &self.key
    }

    fn get(&self) -> Option<Value> {
        self.slot.lock().unwrap().clone()
    }

    fn set(&self, value: Value) {
        *self.slot.lock().unwrap() = Some(value);
    }
}
