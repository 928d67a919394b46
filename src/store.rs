use std::future::Future;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::config::{PluginConfig, ResolvedHooks, StoreOptions};
use crate::datastore::{
    Datastore, FieldFilter, OrderDirection, QueryDefinition,
};
use crate::error::{configuration_error, invalid_argument, StoreResult};
use crate::lifecycle::{LifecycleController, LifecyclePhase};
use crate::model::{
    DocumentKey, DocumentState, FieldMap, FieldPath, ResourcePath,
};
use crate::mutation::{CreatedDocument, MutationPipeline};
use crate::reconcile::{BindOptions, SnapshotReconciler};
use crate::registry::SubscriptionRegistry;
use crate::schema::SchemaArc;
use crate::state::{StateCell, StoreState};
use crate::view::StoreView;

/// Query shape owned by the store, mutable between queries and translated to
/// a [`QueryDefinition`] at query time.
#[derive(Clone, Debug, Default)]
pub struct QueryDescriptor {
    order_by: Option<(FieldPath, OrderDirection)>,
    filter: Option<FieldFilter>,
}

/// A local mutable mirror of one remote collection and its active document.
///
/// The store owns its document, collection, query, and lifecycle state
/// exclusively; only the subscription registry is shared, keyed by
/// `store_id` so unrelated stores cannot collide.
pub struct Store {
    store_id: String,
    collection_path: ResourcePath,
    db: Arc<dyn Datastore>,
    schema: SchemaArc,
    state: Arc<StateCell<StoreState>>,
    registry: Arc<SubscriptionRegistry>,
    reconciler: Arc<SnapshotReconciler>,
    pipeline: MutationPipeline,
    lifecycle: LifecycleController,
    descriptor: Mutex<QueryDescriptor>,
    bound_query: Mutex<Option<String>>,
    attributes: Arc<Mutex<FieldMap>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("store_id", &self.store_id)
            .field("collection_path", &self.collection_path)
            .finish_non_exhaustive()
    }
}

impl Store {
    pub fn new(plugin: &PluginConfig, options: StoreOptions) -> StoreResult<Self> {
        if options.store_id.trim().is_empty() {
            return Err(configuration_error("store_id must not be empty"));
        }
        if options.collection_path.trim().is_empty() {
            return Err(configuration_error("collection_path must not be empty"));
        }
        let collection_path = ResourcePath::from_string(&options.collection_path)?;
        if collection_path.len() % 2 == 0 {
            return Err(configuration_error(format!(
                "'{}' does not name a collection",
                options.collection_path
            )));
        }

        let store_id = options.store_id.clone();
        let schema = options.schema.clone();
        let db = Arc::clone(&plugin.db);
        let registry = options
            .registry
            .clone()
            .unwrap_or_else(SubscriptionRegistry::global);

        let state = StateCell::new(
            store_id.clone(),
            StoreState {
                doc: DocumentState::new(schema.defaults()),
                collection: Default::default(),
            },
        );
        let reconciler = Arc::new(SnapshotReconciler::new(
            store_id.clone(),
            Arc::clone(&db),
            Arc::clone(&state),
            Arc::clone(&registry),
        ));
        let hooks = ResolvedHooks::resolve(plugin, &options);
        let pipeline = MutationPipeline::new(
            store_id.clone(),
            collection_path.clone(),
            Arc::clone(&db),
            schema.clone(),
            Arc::clone(&state),
            hooks,
            options.fallback.clone(),
            Arc::clone(&reconciler),
        );

        let mut attributes = FieldMap::new();
        attributes.insert("store_id".to_string(), json!(store_id));
        attributes.insert(
            "collection_path".to_string(),
            json!(collection_path.canonical_string()),
        );

        Ok(Self {
            store_id,
            collection_path,
            db,
            schema,
            state,
            registry,
            reconciler,
            pipeline,
            lifecycle: LifecycleController::new(),
            descriptor: Mutex::new(QueryDescriptor::default()),
            bound_query: Mutex::new(None),
            attributes: Arc::new(Mutex::new(attributes)),
        })
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn collection_path(&self) -> &ResourcePath {
        &self.collection_path
    }

    pub fn db(&self) -> Arc<dyn Datastore> {
        Arc::clone(&self.db)
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.lifecycle.phase()
    }

    /// Reads a projection of the current state without cloning the whole of
    /// it.
    pub fn read<R>(&self, reader: impl FnOnce(&StoreState) -> R) -> R {
        self.state.read(reader)
    }

    pub fn snapshot(&self) -> StoreState {
        self.state.snapshot()
    }

    /// Runs `init` at most once for this store; see
    /// [`LifecycleController::ensure_initialized`].
    pub async fn initialize<F, Fut>(&self, init: F) -> StoreResult<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoreResult<()>>,
    {
        self.lifecycle.ensure_initialized(init).await
    }

    /// Binds the store's document state to `collection_path/id`.
    ///
    /// Any previously fetched document is unbound first, so the store mirrors
    /// at most one document at a time. Resolves with the first snapshot, or
    /// `None` when the document does not exist.
    pub async fn fetch(&self, id: &str) -> StoreResult<Option<DocumentState>> {
        if id.trim().is_empty() {
            return Err(invalid_argument("fetch requires a document id"));
        }
        self.reconciler.release_document();
        let key = DocumentKey::from_path(self.collection_path.child([id]))?;
        self.reconciler.bind_document(&key, &BindOptions::default()).await
    }

    /// Sets the ordering used by the next [`query`](Store::query).
    pub fn order_by(&self, field: FieldPath, direction: OrderDirection) {
        self.descriptor.lock().unwrap().order_by = Some((field, direction));
    }

    /// Sets the filter used by the next [`query`](Store::query).
    pub fn filter(&self, filter: FieldFilter) {
        self.descriptor.lock().unwrap().filter = Some(filter);
    }

    pub fn clear_query(&self) {
        *self.descriptor.lock().unwrap() = QueryDescriptor::default();
    }

    /// Binds the store's collection state to the current query descriptor.
    ///
    /// A previously bound query on a different shape is unbound first; the
    /// registry handles replacement of the same shape. Resolves with the
    /// mirrored result set from the first change batch.
    pub async fn query(&self) -> StoreResult<Vec<DocumentState>> {
        let definition = {
            let descriptor = self.descriptor.lock().unwrap();
            let mut definition = QueryDefinition::new(self.collection_path.clone());
            if let Some((field, direction)) = &descriptor.order_by {
                definition = definition.with_order_by(field.clone(), *direction);
            }
            if let Some(filter) = &descriptor.filter {
                definition = definition.with_filter(filter.clone());
            }
            definition
        };

        let resource = definition.canonical_string();
        let stale = {
            let mut bound = self.bound_query.lock().unwrap();
            let stale = match bound.as_deref() {
                Some(previous) if previous != resource => bound.take(),
                _ => None,
            };
            *bound = Some(resource);
            stale
        };
        if let Some(stale) = stale {
            self.reconciler.unbind(&stale);
        }

        self.reconciler.bind_collection(&definition, &BindOptions::default()).await
    }

    pub async fn update(&self, path: &FieldPath, value: Value, should_sync: bool) -> StoreResult<bool> {
        self.pipeline.update(path, value, should_sync).await
    }

    pub async fn sync(&self, paths: &[FieldPath]) -> StoreResult<bool> {
        self.pipeline.sync(paths).await
    }

    pub async fn create(&self, override_data: FieldMap, id: Option<&str>) -> StoreResult<CreatedDocument> {
        self.pipeline.create(override_data, id).await
    }

    pub async fn delete_document(&self) -> StoreResult<bool> {
        self.pipeline.delete_document().await
    }

    pub async fn array_union(&self, path: &FieldPath, value: Value, should_sync: bool) -> StoreResult<bool> {
        self.pipeline.array_union(path, value, should_sync).await
    }

    pub async fn array_remove(&self, path: &FieldPath, value: Value, should_sync: bool) -> StoreResult<bool> {
        self.pipeline.array_remove(path, value, should_sync).await
    }

    pub async fn array_remove_index(&self, path: &FieldPath, index: usize, should_sync: bool) -> StoreResult<bool> {
        self.pipeline.array_remove_index(path, index, should_sync).await
    }

    pub async fn array_update_item(
        &self,
        path: &FieldPath,
        index: usize,
        value: Value,
        should_sync: bool,
    ) -> StoreResult<bool> {
        self.pipeline.array_update_item(path, index, value, should_sync).await
    }

    pub async fn array_update<F>(&self, path: &FieldPath, transform: F, should_sync: bool) -> StoreResult<bool>
    where
        F: FnOnce(&[Value]) -> Vec<Value>,
    {
        self.pipeline.array_update(path, transform, should_sync).await
    }

    pub fn schema(&self) -> &SchemaArc {
        &self.schema
    }

    /// A two-tier accessor over this store; see [`StoreView`].
    pub fn view(&self) -> StoreView {
        StoreView::new(Arc::clone(&self.state), Arc::clone(&self.attributes))
    }

    /// Tears down every subscription this store owns. Idempotent.
    pub fn close(&self) {
        for handle in self.registry.take_owner(&self.store_id) {
            handle.unsubscribe();
        }
        *self.bound_query.lock().unwrap() = None;
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{FilterOperator, InMemoryDatastore};
    use crate::schema::{FieldType, MapSchema};
    use serde_json::json;

    fn schema() -> SchemaArc {
        MapSchema::new()
            .field("title", FieldType::String, json!(""))
            .field("rank", FieldType::Number, json!(0))
            .into_arc()
    }

    async fn seed(db: &InMemoryDatastore, path: &str, data: Value) {
        db.set_document(
            &DocumentKey::from_string(path).unwrap(),
            data.as_object().cloned().unwrap(),
        )
        .await
        .unwrap();
    }

    fn store() -> (Store, Arc<InMemoryDatastore>) {
        let db = Arc::new(InMemoryDatastore::new());
        let plugin = PluginConfig::new(db.clone());
        let options = StoreOptions::new("widgets", "widgets", schema())
            .with_registry(SubscriptionRegistry::new());
        (Store::new(&plugin, options).unwrap(), db)
    }

    #[test]
    fn rejects_blank_identifiers() {
        let db = Arc::new(InMemoryDatastore::new());
        let plugin = PluginConfig::new(db.clone());

        let err = Store::new(&plugin, StoreOptions::new("", "widgets", schema())).unwrap_err();
        assert_eq!(err.code_str(), "mirrorstore/configuration");

        let err = Store::new(&plugin, StoreOptions::new("widgets", "  ", schema())).unwrap_err();
        assert_eq!(err.code_str(), "mirrorstore/configuration");

        // An even-length path names a document, not a collection.
        let err = Store::new(&plugin, StoreOptions::new("widgets", "widgets/abc", schema())).unwrap_err();
        assert_eq!(err.code_str(), "mirrorstore/configuration");
    }

    #[tokio::test]
    async fn fetch_rebinds_to_the_requested_document() {
        let (store, db) = store();
        seed(&db, "widgets/a", json!({"title": "A", "rank": 1})).await;
        seed(&db, "widgets/b", json!({"title": "B", "rank": 2})).await;

        let doc = store.fetch("a").await.unwrap().unwrap();
        assert_eq!(doc.id(), "a");

        let doc = store.fetch("b").await.unwrap().unwrap();
        assert_eq!(doc.id(), "b");
        assert_eq!(store.read(|s| s.doc.id().to_string()), "b");

        // The first document's subscription is gone; its writes no longer
        // land in this store.
        seed(&db, "widgets/a", json!({"title": "A2", "rank": 1})).await;
        assert_eq!(store.read(|s| s.doc.fields().get("title").cloned()), Some(json!("B")));
    }

    #[tokio::test]
    async fn fetch_of_missing_document_resolves_none() {
        let (store, _db) = store();
        assert!(store.fetch("nope").await.unwrap().is_none());
        let err = store.fetch("  ").await.unwrap_err();
        assert_eq!(err.code_str(), "mirrorstore/invalid-argument");
    }

    #[tokio::test]
    async fn query_follows_the_descriptor() {
        let (store, db) = store();
        seed(&db, "widgets/a", json!({"title": "A", "rank": 3})).await;
        seed(&db, "widgets/b", json!({"title": "B", "rank": 1})).await;
        seed(&db, "widgets/c", json!({"title": "C", "rank": 2})).await;

        store.order_by(FieldPath::from_dot_separated("rank").unwrap(), OrderDirection::Ascending);
        let docs = store.query().await.unwrap();
        assert_eq!(docs.iter().map(|d| d.id()).collect::<Vec<_>>(), ["b", "c", "a"]);

        store.filter(FieldFilter {
            field: FieldPath::from_dot_separated("rank").unwrap(),
            operator: FilterOperator::GreaterThan,
            value: json!(1),
        });
        let docs = store.query().await.unwrap();
        assert_eq!(docs.iter().map(|d| d.id()).collect::<Vec<_>>(), ["c", "a"]);
    }

    #[tokio::test]
    async fn changing_the_descriptor_unbinds_the_previous_query() {
        let (store, db) = store();
        seed(&db, "widgets/a", json!({"title": "A", "rank": 1})).await;

        store.query().await.unwrap();
        store.order_by(FieldPath::from_dot_separated("rank").unwrap(), OrderDirection::Descending);
        store.query().await.unwrap();

        // Only the new query subscription remains registered.
        store.close();
        seed(&db, "widgets/a", json!({"title": "A2", "rank": 1})).await;
        assert_eq!(
            store.read(|s| s.collection.documents().first().map(|d| d.fields().get("title").cloned())),
            Some(Some(json!("A")))
        );
    }

    #[tokio::test]
    async fn requery_rebuilds_the_collection_mirror() {
        let (store, db) = store();
        seed(&db, "widgets/a", json!({"title": "A", "rank": 1})).await;
        seed(&db, "widgets/b", json!({"title": "B", "rank": 2})).await;
        seed(&db, "widgets/c", json!({"title": "C", "rank": 99})).await;

        store.filter(FieldFilter {
            field: FieldPath::from_dot_separated("rank").unwrap(),
            operator: FilterOperator::LessThan,
            value: json!(50),
        });
        let docs = store.query().await.unwrap();
        assert_eq!(docs.len(), 2);

        // The new shape must not inherit documents from the previous one.
        store.filter(FieldFilter {
            field: FieldPath::from_dot_separated("rank").unwrap(),
            operator: FilterOperator::GreaterThan,
            value: json!(50),
        });
        let docs = store.query().await.unwrap();
        assert_eq!(docs.iter().map(|d| d.id()).collect::<Vec<_>>(), ["c"]);
        assert_eq!(store.read(|s| s.collection.len()), 1);
        assert_eq!(store.read(|s| s.collection.position("c")), Some(0));
    }

    #[tokio::test]
    async fn fetch_of_missing_document_releases_its_listener_on_refetch() {
        let (store, db) = store();
        seed(&db, "widgets/real", json!({"title": "R", "rank": 1})).await;

        assert!(store.fetch("ghost").await.unwrap().is_none());
        store.fetch("real").await.unwrap().unwrap();

        // The absent document appearing remotely must not clobber the
        // currently mirrored one.
        seed(&db, "widgets/ghost", json!({"title": "G", "rank": 2})).await;
        assert_eq!(store.read(|s| s.doc.id().to_string()), "real");
        assert_eq!(store.read(|s| s.doc.fields().get("title").cloned()), Some(json!("R")));
    }

    #[tokio::test]
    async fn initialize_runs_once() {
        let (store, _db) = store();
        assert!(store.initialize(|| async { Ok(()) }).await.unwrap());
        assert!(!store.initialize(|| async { Ok(()) }).await.unwrap());
        assert_eq!(store.phase(), LifecyclePhase::Initialized);
    }

    #[tokio::test]
    async fn close_stops_mirroring() {
        let (store, db) = store();
        seed(&db, "widgets/a", json!({"title": "A", "rank": 1})).await;
        store.fetch("a").await.unwrap();

        store.close();
        seed(&db, "widgets/a", json!({"title": "A2", "rank": 1})).await;
        assert_eq!(store.read(|s| s.doc.fields().get("title").cloned()), Some(json!("A")));

        // Second close is a no-op.
        store.close();
    }

    #[tokio::test]
    async fn view_reads_fields_and_attributes() {
        let (store, db) = store();
        seed(&db, "widgets/a", json!({"title": "A", "rank": 1})).await;
        store.fetch("a").await.unwrap();

        let view = store.view();
        assert_eq!(view.get("title"), Some(json!("A")));
        assert_eq!(view.get("store_id"), Some(json!("widgets")));
    }
}
