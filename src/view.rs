use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::model::FieldMap;
use crate::state::{StateCell, StoreState};

/// Two-tier accessor addressing document fields as if they were top-level
/// store fields.
///
/// `get` resolves against the active document first and falls through to the
/// store's attribute map; `set` mirrors that order. A view holds no state of
/// its own: every read and write lands in the store's state cell or its
/// shared attribute map.
///
/// Writes to document fields through a view bypass schema validation by
/// design; callers wanting validated writes go through the mutation
/// pipeline's `update` instead.
pub struct StoreView {
    state: Arc<StateCell<StoreState>>,
    attributes: Arc<Mutex<FieldMap>>,
}

impl StoreView {
    pub(crate) fn new(state: Arc<StateCell<StoreState>>, attributes: Arc<Mutex<FieldMap>>) -> Self {
        Self { state, attributes }
    }

    /// Returns the document field named `name`, or the store attribute of
    /// that name when the document does not declare it.
    pub fn get(&self, name: &str) -> Option<Value> {
        let from_doc = self.state.read(|state| state.doc.fields().get(name).cloned());
        if from_doc.is_some() {
            return from_doc;
        }
        self.attributes.lock().unwrap().get(name).cloned()
    }

    /// Writes through to the document field named `name` when one is
    /// declared, otherwise onto the store attributes.
    pub fn set(&self, name: &str, value: Value) {
        let is_doc_field = self.state.read(|state| state.doc.fields().contains_key(name));
        if is_doc_field {
            self.state.patch(|state| {
                state.doc.fields_mut().insert(name.to_string(), value);
            });
        } else {
            self.attributes.lock().unwrap().insert(name.to_string(), value);
        }
    }

    /// True when `name` resolves through either tier.
    pub fn contains(&self, name: &str) -> bool {
        self.state.read(|state| state.doc.fields().contains_key(name))
            || self.attributes.lock().unwrap().contains_key(name)
    }
}
