use std::sync::{Arc, Mutex};

use crate::model::{CollectionState, DocumentState};

/// The state slice owned by one store instance: the active document mirror
/// and the mirrored query result set.
#[derive(Clone, Debug, Default)]
pub struct StoreState {
    pub doc: DocumentState,
    pub collection: CollectionState,
}

pub type Observer<S> = Arc<dyn Fn(&S) + Send + Sync>;

pub type ObserverId = u64;

/// A named reactive state container: mutations go through [`patch`], which
/// applies the mutator atomically and then notifies every observer with the
/// resulting state.
///
/// [`patch`]: StateCell::patch
pub struct StateCell<S> {
    name: String,
    state: Mutex<S>,
    observers: Mutex<Vec<(ObserverId, Observer<S>)>>,
    next_observer_id: Mutex<ObserverId>,
}

impl<S: Clone> StateCell<S> {
    pub fn new(name: impl Into<String>, initial: S) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(initial),
            observers: Mutex::new(Vec::new()),
            next_observer_id: Mutex::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Applies `mutator` to the live state, then notifies observers with a
    /// copy taken after the mutation. The state lock is released before any
    /// observer runs.
    pub fn patch<R>(&self, mutator: impl FnOnce(&mut S) -> R) -> R {
        let (result, after) = {
            let mut state = self.state.lock().unwrap();
            let result = mutator(&mut state);
            (result, state.clone())
        };
        let observers: Vec<Observer<S>> = self
            .observers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer(&after);
        }
        result
    }

    /// Reads through a closure without notifying anyone.
    pub fn read<R>(&self, reader: impl FnOnce(&S) -> R) -> R {
        let state = self.state.lock().unwrap();
        reader(&state)
    }

    pub fn snapshot(&self) -> S {
        self.state.lock().unwrap().clone()
    }

    pub fn subscribe(&self, observer: Observer<S>) -> ObserverId {
        let mut next = self.next_observer_id.lock().unwrap();
        let id = *next;
        *next += 1;
        self.observers.lock().unwrap().push((id, observer));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        self.observers.lock().unwrap().retain(|(observer_id, _)| *observer_id != id);
    }
}
