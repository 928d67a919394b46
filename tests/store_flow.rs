//! End-to-end flows through the public API against the in-memory datastore.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use mirrorstore::{
    Datastore, DocumentKey, FallbackStore, FieldFilter, FieldPath, FieldType, FilterOperator,
    InMemoryDatastore, LifecyclePhase, MapSchema, MemoryFallbackStore, OrderDirection,
    PluginConfig, SchemaArc, Store, StoreOptions, SubscriptionRegistry,
};

fn schema() -> SchemaArc {
    MapSchema::new()
        .field("title", FieldType::String, json!(""))
        .field("test_value", FieldType::Number, json!(50))
        .field("tags", FieldType::Array, json!([]))
        .into_arc()
}

fn path(p: &str) -> FieldPath {
    FieldPath::from_dot_separated(p).unwrap()
}

fn new_store(db: &Arc<InMemoryDatastore>) -> Store {
    let plugin = PluginConfig::new(db.clone());
    let options =
        StoreOptions::new("tasks", "tasks", schema()).with_registry(SubscriptionRegistry::new());
    Store::new(&plugin, options).unwrap()
}

async fn seed(db: &InMemoryDatastore, doc_path: &str, data: Value) {
    db.set_document(
        &DocumentKey::from_string(doc_path).unwrap(),
        data.as_object().cloned().unwrap(),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn create_update_echo_roundtrip() {
    let db = Arc::new(InMemoryDatastore::new());
    let store = new_store(&db);

    let created = store.create(Default::default(), Some("t1")).await.unwrap();
    assert_eq!(created.id, "t1");
    assert_eq!(created.data.get("test_value"), Some(&json!(50)));
    assert_eq!(store.read(|s| s.doc.id().to_string()), "t1");

    assert!(store.update(&path("title"), json!("write docs"), true).await.unwrap());

    // The remote write happened and its confirming snapshot echoed back,
    // clearing the pending-writes flag.
    let snapshot = db
        .get_document(&DocumentKey::from_string("tasks/t1").unwrap())
        .await
        .unwrap();
    assert_eq!(snapshot.data().unwrap().get("title"), Some(&json!("write docs")));
    assert!(!store.read(|s| s.doc.metadata().has_pending_writes()));

    // A local-only write keeps the pending flag until the next sync.
    assert!(store.update(&path("test_value"), json!(7), false).await.unwrap());
    assert!(store.read(|s| s.doc.metadata().has_pending_writes()));
    assert!(store.sync(&[path("test_value")]).await.unwrap());
    assert!(!store.read(|s| s.doc.metadata().has_pending_writes()));
}

#[tokio::test]
async fn fetched_document_mirrors_remote_writes() {
    let db = Arc::new(InMemoryDatastore::new());
    seed(&db, "tasks/t1", json!({"title": "draft", "test_value": 1})).await;
    let store = new_store(&db);

    let doc = store.fetch("t1").await.unwrap().unwrap();
    assert_eq!(doc.fields().get("title"), Some(&json!("draft")));

    // A write from elsewhere lands in the mirror without another fetch.
    seed(&db, "tasks/t1", json!({"title": "final", "test_value": 2})).await;
    assert_eq!(
        store.read(|s| s.doc.fields().get("title").cloned()),
        Some(json!("final"))
    );
}

#[tokio::test]
async fn two_stores_mirror_each_other_through_the_remote() {
    let db = Arc::new(InMemoryDatastore::new());
    let writer = new_store(&db);
    let reader = new_store(&db);

    writer.create(Default::default(), Some("shared")).await.unwrap();
    reader.fetch("shared").await.unwrap().unwrap();

    writer.update(&path("title"), json!("from writer"), true).await.unwrap();
    assert_eq!(
        reader.read(|s| s.doc.fields().get("title").cloned()),
        Some(json!("from writer"))
    );
}

#[tokio::test]
async fn collection_mirror_tracks_membership() {
    let db = Arc::new(InMemoryDatastore::new());
    seed(&db, "tasks/a", json!({"title": "a", "test_value": 3})).await;
    seed(&db, "tasks/b", json!({"title": "b", "test_value": 1})).await;
    let store = new_store(&db);

    store.order_by(path("test_value"), OrderDirection::Ascending);
    let docs = store.query().await.unwrap();
    assert_eq!(docs.iter().map(|d| d.id()).collect::<Vec<_>>(), ["b", "a"]);

    // Subsequent remote churn keeps the mirror ordered and consistent.
    seed(&db, "tasks/c", json!({"title": "c", "test_value": 2})).await;
    db.delete_document(&DocumentKey::from_string("tasks/b").unwrap())
        .await
        .unwrap();

    let ids = store.read(|s| {
        s.collection
            .documents()
            .iter()
            .map(|d| d.id().to_string())
            .collect::<Vec<_>>()
    });
    assert_eq!(ids, ["c", "a"]);
}

#[tokio::test]
async fn filtered_query_excludes_non_matching_documents() {
    let db = Arc::new(InMemoryDatastore::new());
    seed(&db, "tasks/a", json!({"title": "a", "test_value": 10})).await;
    seed(&db, "tasks/b", json!({"title": "b", "test_value": 99})).await;
    let store = new_store(&db);

    store.filter(FieldFilter {
        field: path("test_value"),
        operator: FilterOperator::LessThan,
        value: json!(50),
    });
    let docs = store.query().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id(), "a");
}

#[tokio::test]
async fn array_helpers_flow_through_sync() {
    let db = Arc::new(InMemoryDatastore::new());
    let store = new_store(&db);
    store.create(Default::default(), Some("t1")).await.unwrap();

    assert!(store.array_union(&path("tags"), json!("urgent"), true).await.unwrap());
    assert!(!store.array_union(&path("tags"), json!("urgent"), true).await.unwrap());
    assert!(store.array_union(&path("tags"), json!("later"), true).await.unwrap());
    assert!(store.array_remove(&path("tags"), json!("urgent"), true).await.unwrap());

    let snapshot = db
        .get_document(&DocumentKey::from_string("tasks/t1").unwrap())
        .await
        .unwrap();
    assert_eq!(snapshot.data().unwrap().get("tags"), Some(&json!(["later"])));
}

#[tokio::test]
async fn validation_failures_never_reach_the_remote() {
    let db = Arc::new(InMemoryDatastore::new());
    let rejected = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&rejected);

    let plugin = PluginConfig::new(db.clone());
    let options = StoreOptions::new("tasks", "tasks", schema())
        .with_registry(SubscriptionRegistry::new())
        .with_mutation_error(Arc::new(move |_store, _field, _message| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    let store = Store::new(&plugin, options).unwrap();
    store.create(Default::default(), Some("t1")).await.unwrap();

    assert!(!store.update(&path("test_value"), json!("NaN"), true).await.unwrap());
    assert_eq!(rejected.load(Ordering::SeqCst), 1);

    let snapshot = db
        .get_document(&DocumentKey::from_string("tasks/t1").unwrap())
        .await
        .unwrap();
    assert_eq!(snapshot.data().unwrap().get("test_value"), Some(&json!(50)));
}

#[tokio::test]
async fn store_hooks_override_plugin_hooks() {
    let db = Arc::new(InMemoryDatastore::new());
    let calls = Arc::new(Mutex::new(Vec::new()));

    let plugin_calls = Arc::clone(&calls);
    let plugin = PluginConfig::new(db.clone()).with_mutation_success(Arc::new(
        move |store_id, _field| plugin_calls.lock().unwrap().push(format!("plugin:{store_id}")),
    ));

    let local_calls = Arc::clone(&calls);
    let options = StoreOptions::new("tasks", "tasks", schema())
        .with_registry(SubscriptionRegistry::new())
        .with_mutation_success(Arc::new(move |store_id, _field| {
            local_calls.lock().unwrap().push(format!("local:{store_id}"))
        }));

    let store = Store::new(&plugin, options).unwrap();
    store.update(&path("title"), json!("x"), false).await.unwrap();

    assert_eq!(*calls.lock().unwrap(), vec!["local:tasks".to_string()]);
}

#[tokio::test]
async fn append_on_create_rides_along() {
    let db = Arc::new(InMemoryDatastore::new());
    let plugin = PluginConfig::new(db.clone()).with_append_to_created(Arc::new(|| {
        json!({
            "created_by": "suite",
            "created_at": Utc::now().to_rfc3339(),
        })
        .as_object()
        .cloned()
        .unwrap()
    }));
    let options =
        StoreOptions::new("tasks", "tasks", schema()).with_registry(SubscriptionRegistry::new());
    let store = Store::new(&plugin, options).unwrap();

    let created = store.create(Default::default(), Some("t1")).await.unwrap();
    assert_eq!(created.data.get("created_by"), Some(&json!("suite")));

    let snapshot = db
        .get_document(&DocumentKey::from_string("tasks/t1").unwrap())
        .await
        .unwrap();
    let data = snapshot.data().unwrap();
    assert_eq!(data.get("created_by"), Some(&json!("suite")));
    let stamp = data.get("created_at").and_then(Value::as_str).unwrap();
    assert!(DateTime::parse_from_rfc3339(stamp).is_ok());
}

#[tokio::test]
async fn offline_store_routes_to_fallback() {
    let db = Arc::new(InMemoryDatastore::new());
    let fallback = Arc::new(MemoryFallbackStore::new("tasks-offline"));

    let plugin = PluginConfig::new(db.clone());
    let options = StoreOptions::new("tasks", "tasks", schema())
        .with_registry(SubscriptionRegistry::new())
        .with_fallback(fallback.clone());
    let store = Store::new(&plugin, options).unwrap();

    store.create(Default::default(), Some("t1")).await.unwrap();
    store.update(&path("title"), json!("offline edit"), true).await.unwrap();

    let stored = fallback.get().unwrap();
    assert_eq!(stored.get("title"), Some(&json!("offline edit")));

    // Nothing was written remotely.
    let snapshot = db
        .get_document(&DocumentKey::from_string("tasks/t1").unwrap())
        .await
        .unwrap();
    assert!(!snapshot.exists());
}

#[tokio::test]
async fn delete_then_recreate() {
    let db = Arc::new(InMemoryDatastore::new());
    let store = new_store(&db);

    store.create(Default::default(), Some("t1")).await.unwrap();
    store.update(&path("title"), json!("doomed"), true).await.unwrap();
    assert!(store.delete_document().await.unwrap());

    // Local state is back at schema defaults with no identity.
    assert_eq!(store.read(|s| s.doc.id().to_string()), "");
    assert_eq!(store.read(|s| s.doc.fields().get("title").cloned()), Some(json!("")));

    let created = store.create(Default::default(), Some("t2")).await.unwrap();
    assert_eq!(created.id, "t2");
    assert_eq!(store.read(|s| s.doc.id().to_string()), "t2");
}

#[tokio::test]
async fn initialize_gates_setup_work() {
    let db = Arc::new(InMemoryDatastore::new());
    let store = Arc::new(new_store(&db));
    let runs = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let counter = Arc::clone(&runs);
        let store_inner = Arc::clone(&store);
        store
            .initialize(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                store_inner.create(Default::default(), Some("seeded")).await?;
                Ok(())
            })
            .await
            .unwrap();
    }

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(store.phase(), LifecyclePhase::Initialized);
    assert_eq!(store.read(|s| s.doc.id().to_string()), "seeded");
}

#[tokio::test]
async fn closing_a_store_severs_all_mirrors() {
    let db = Arc::new(InMemoryDatastore::new());
    seed(&db, "tasks/a", json!({"title": "a", "test_value": 1})).await;
    let store = new_store(&db);

    store.fetch("a").await.unwrap();
    store.query().await.unwrap();
    store.close();

    seed(&db, "tasks/a", json!({"title": "changed", "test_value": 1})).await;
    seed(&db, "tasks/b", json!({"title": "b", "test_value": 2})).await;

    assert_eq!(store.read(|s| s.doc.fields().get("title").cloned()), Some(json!("a")));
    assert_eq!(store.read(|s| s.collection.len()), 1);
}

#[tokio::test]
async fn view_spans_document_and_store_attributes() {
    let db = Arc::new(InMemoryDatastore::new());
    seed(&db, "tasks/a", json!({"title": "a", "test_value": 1})).await;
    let store = new_store(&db);
    store.fetch("a").await.unwrap();

    let view = store.view();
    assert_eq!(view.get("title"), Some(json!("a")));
    assert_eq!(view.get("store_id"), Some(json!("tasks")));

    view.set("title", json!("via view"));
    assert_eq!(
        store.read(|s| s.doc.fields().get("title").cloned()),
        Some(json!("via view"))
    );

    view.set("theme", json!("dark"));
    assert!(store.read(|s| !s.doc.fields().contains_key("theme")));
    assert_eq!(view.get("theme"), Some(json!("dark")));
}
