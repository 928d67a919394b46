use std::sync::{Arc, Mutex};

use futures::channel::oneshot;

use crate::datastore::{
    unsubscribe_fn, ChangeKind, Datastore, DocumentChange, DocumentSnapshot, ListenCallback,
    ListenEvent, ListenerId, QueryDefinition,
};
use crate::error::{subscription_error, StoreResult};
use crate::model::{CollectionState, DocumentKey, DocumentState};
use crate::registry::{SubscriptionHandle, SubscriptionKind, SubscriptionRegistry};
use crate::state::{StateCell, StoreState};

/// Inspects an incoming document before it is merged. Errors are caught and
/// logged, never propagated into the reconciliation path.
pub type BeforeApplyHook = Arc<dyn Fn(&DocumentState) -> StoreResult<()> + Send + Sync>;

/// Receives the reconciled document after a merge.
pub type AfterApplyHook = Arc<dyn Fn(&DocumentState) + Send + Sync>;

#[derive(Clone, Default)]
pub struct BindOptions {
    pub before_apply: Option<BeforeApplyHook>,
    pub after_apply: Option<AfterApplyHook>,
}

impl BindOptions {
    pub fn with_before_apply(mut self, hook: BeforeApplyHook) -> Self {
        self.before_apply = Some(hook);
        self
    }

    pub fn with_after_apply(mut self, hook: AfterApplyHook) -> Self {
        self.after_apply = Some(hook);
        self
    }
}

/// Folds remote snapshots into the store's local state.
///
/// Each `bind_*` call opens exactly one realtime subscription, registers its
/// teardown handle under `(store_id, resource)`, and resolves once with the
/// first snapshot. Every later snapshot mutates the bound state in place.
pub struct SnapshotReconciler {
    store_id: String,
    db: Arc<dyn Datastore>,
    state: Arc<StateCell<StoreState>>,
    registry: Arc<SubscriptionRegistry>,
    /// Resource of the live document subscription. Tracked here rather than
    /// derived from document state, because a bind that resolved `None` has a
    /// live listener but never touched the state.
    active_document: Mutex<Option<String>>,
}

type FirstEmission<T> = Arc<Mutex<Option<oneshot::Sender<StoreResult<T>>>>>;

impl SnapshotReconciler {
    pub fn new(
        store_id: impl Into<String>,
        db: Arc<dyn Datastore>,
        state: Arc<StateCell<StoreState>>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            db,
            state,
            registry,
            active_document: Mutex::new(None),
        }
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Mirrors a single document into the store's document state.
    ///
    /// Resolves with the first snapshot's reconciled document, or `None` when
    /// the document does not exist. A listener error before the first
    /// snapshot rejects the bind; afterwards it is logged and the
    /// subscription is torn down, leaving state at its last known-good value.
    pub async fn bind_document(
        &self,
        key: &DocumentKey,
        options: &BindOptions,
    ) -> StoreResult<Option<DocumentState>> {
        let resource = key.path().canonical_string();
        let (sender, receiver) = oneshot::channel();
        let first: FirstEmission<Option<DocumentState>> = Arc::new(Mutex::new(Some(sender)));

        let state = Arc::clone(&self.state);
        let options = options.clone();
        let teardown = self.deferred_teardown(&resource);
        let first_in_callback = Arc::clone(&first);
        let callback: ListenCallback = Arc::new(move |event| match event {
            ListenEvent::Document(snapshot) => {
                if !snapshot.exists() {
                    if let Some(sender) = first_in_callback.lock().unwrap().take() {
                        let _ = sender.send(Ok(None));
                    }
                    return;
                }
                let incoming = materialize(&snapshot);
                if let Some(hook) = &options.before_apply {
                    if let Err(err) = hook(&incoming) {
                        log::warn!("before_apply hook failed for {}: {err}", incoming.path());
                    }
                }
                let reconciled = state.patch(|store_state| {
                    store_state.doc.merge(&incoming);
                    store_state.doc.clone()
                });
                if let Some(hook) = &options.after_apply {
                    hook(&reconciled);
                }
                if let Some(sender) = first_in_callback.lock().unwrap().take() {
                    let _ = sender.send(Ok(Some(reconciled)));
                }
            }
            ListenEvent::Collection(_) => {}
            ListenEvent::Error(err) => {
                match first_in_callback.lock().unwrap().take() {
                    Some(sender) => {
                        let _ = sender.send(Err(err));
                    }
                    None => {
                        log::warn!("document listener failed after first snapshot: {err}");
                        teardown();
                    }
                }
            }
        });

        let id = self.db.listen_document(key, callback)?;
        *self.active_document.lock().unwrap() = Some(resource.clone());
        self.finish_bind(&resource, SubscriptionKind::Document, id, receiver).await
    }

    /// Detaches the current document subscription, if any. A bind that
    /// resolved `None` still holds a live listener, so teardown goes through
    /// this slot and not through the document state's path.
    pub fn release_document(&self) {
        if let Some(resource) = self.active_document.lock().unwrap().take() {
            self.unbind(&resource);
        }
    }

    /// Mirrors an ordered query result set into the store's collection state.
    /// Resolves with the collection as of the first change batch.
    ///
    /// Binding starts from an empty collection: whatever a previously bound
    /// query left behind is cleared before the first batch rebuilds the
    /// mirror, so the server-reported indices always line up.
    pub async fn bind_collection(
        &self,
        query: &QueryDefinition,
        options: &BindOptions,
    ) -> StoreResult<Vec<DocumentState>> {
        let resource = query.canonical_string();
        let (sender, receiver) = oneshot::channel();
        let first: FirstEmission<Vec<DocumentState>> = Arc::new(Mutex::new(Some(sender)));

        self.state.patch(|store_state| store_state.collection.clear());

        let state = Arc::clone(&self.state);
        let options = options.clone();
        let teardown = self.deferred_teardown(&resource);
        let first_in_callback = Arc::clone(&first);
        let callback: ListenCallback = Arc::new(move |event| match event {
            ListenEvent::Collection(changes) => {
                if let Some(hook) = &options.before_apply {
                    for change in changes.iter().filter(|change| {
                        matches!(change.kind, ChangeKind::Added | ChangeKind::Modified)
                    }) {
                        let incoming = materialize(&change.snapshot);
                        if let Err(err) = hook(&incoming) {
                            log::warn!("before_apply hook failed for {}: {err}", incoming.path());
                        }
                    }
                }
                let documents = state.patch(|store_state| {
                    apply_changes(&mut store_state.collection, &changes, &options);
                    store_state.collection.documents().to_vec()
                });
                if let Some(sender) = first_in_callback.lock().unwrap().take() {
                    let _ = sender.send(Ok(documents));
                }
            }
            ListenEvent::Document(_) => {}
            ListenEvent::Error(err) => {
                match first_in_callback.lock().unwrap().take() {
                    Some(sender) => {
                        let _ = sender.send(Err(err));
                    }
                    None => {
                        log::warn!("collection listener failed after first snapshot: {err}");
                        teardown();
                    }
                }
            }
        });

        let id = self.db.listen_query(query, callback)?;
        self.finish_bind(&resource, SubscriptionKind::Collection, id, receiver).await
    }

    /// Detaches the listener bound to `resource` and removes its registry
    /// entry. A missing entry is a no-op.
    pub fn unbind(&self, resource: &str) {
        if let Some(handle) = self.registry.pick(&self.store_id, resource) {
            handle.unsubscribe();
            self.registry.remove(&self.store_id, resource);
        }
    }

    /// Registers the live handle and awaits the first emission. A rejected
    /// bind cleans its own bookkeeping up before returning the error.
    async fn finish_bind<T>(
        &self,
        resource: &str,
        kind: SubscriptionKind,
        id: ListenerId,
        receiver: oneshot::Receiver<StoreResult<T>>,
    ) -> StoreResult<T> {
        self.registry.store(
            &self.store_id,
            resource,
            SubscriptionHandle::new(kind, unsubscribe_fn(Arc::clone(&self.db), id)),
        );
        match receiver.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                self.unbind(resource);
                Err(err)
            }
            Err(_) => {
                self.unbind(resource);
                Err(subscription_error("listener dropped before delivering a first snapshot"))
            }
        }
    }

    /// Teardown closure usable from inside a listener callback, where the
    /// listener id is not known until after registration.
    fn deferred_teardown(&self, resource: &str) -> impl Fn() + Send + Sync {
        let registry = Arc::clone(&self.registry);
        let owner = self.store_id.clone();
        let resource = resource.to_string();
        move || {
            if let Some(handle) = registry.pick(&owner, &resource) {
                handle.unsubscribe();
                registry.remove(&owner, &resource);
            }
        }
    }
}

/// Materializes a document state from snapshot parts: `{id, path, metadata}`
/// plus fields. The reserved keys are present even for empty documents.
pub fn materialize(snapshot: &DocumentSnapshot) -> DocumentState {
    DocumentState::materialize(
        snapshot.id(),
        snapshot.key().path().canonical_string(),
        snapshot.metadata(),
        snapshot.data().cloned().unwrap_or_default(),
    )
}

/// Applies a change batch to collection state, synchronously and in delivery
/// order. An `added` change for an id that is already tracked moves that
/// entry to the reported position (and refreshes its data) instead of
/// inserting a duplicate.
pub(crate) fn apply_changes(
    collection: &mut CollectionState,
    changes: &[DocumentChange],
    options: &BindOptions,
) {
    for change in changes {
        match change.kind {
            ChangeKind::Added => {
                let incoming = materialize(&change.snapshot);
                let index = change.new_index.unwrap_or(collection.len());
                if collection.contains(incoming.id()) {
                    collection.move_to(index, incoming.id());
                    if let Some(position) = collection.position(incoming.id()) {
                        collection.replace_at(position, incoming.clone());
                    }
                } else {
                    collection.insert_at(index, incoming.clone());
                }
                if let Some(hook) = &options.after_apply {
                    hook(&incoming);
                }
            }
            ChangeKind::Modified => {
                let incoming = materialize(&change.snapshot);
                if let Some(index) = change.new_index {
                    collection.replace_at(index, incoming.clone());
                }
                if let Some(hook) = &options.after_apply {
                    hook(&incoming);
                }
            }
            ChangeKind::Removed => {
                if let Some(index) = change.old_index {
                    collection.remove_at(index);
                }
            }
        }
    }
}
