use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{internal_error, not_found, StoreResult};
use crate::model::{value_at_path, set_value_at_path, DocumentKey, FieldMap, FieldPath, SnapshotMetadata};

use super::{
    ChangeKind, Datastore, DocumentChange, DocumentSnapshot, FieldFilter, FilterOperator,
    ListenCallback, ListenEvent, ListenerId, OrderDirection, QueryDefinition,
};

enum ListenerTarget {
    Document(DocumentKey),
    Query {
        definition: QueryDefinition,
        previous: Mutex<Vec<DocumentSnapshot>>,
    },
}

struct Listener {
    target: ListenerTarget,
    callback: ListenCallback,
}

/// A realtime document store held entirely in memory.
///
/// Backs tests and demos: writes apply synchronously and listener events are
/// dispatched before the write call returns, which keeps the echo path of
/// optimistic writes deterministic.
#[derive(Clone, Default)]
pub struct InMemoryDatastore {
    documents: Arc<Mutex<BTreeMap<String, FieldMap>>>,
    listeners: Arc<Mutex<HashMap<ListenerId, Arc<Listener>>>>,
    next_listener_id: Arc<AtomicU64>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot_of(&self, key: &DocumentKey) -> DocumentSnapshot {
        let documents = self.documents.lock().unwrap();
        let data = documents.get(&key.path().canonical_string()).cloned();
        DocumentSnapshot::new(key.clone(), data, SnapshotMetadata::new(false, false))
    }

    fn evaluate_query(&self, query: &QueryDefinition) -> StoreResult<Vec<DocumentSnapshot>> {
        let documents = self.documents.lock().unwrap();
        let mut results = Vec::new();
        for (path, data) in documents.iter() {
            let key = DocumentKey::from_string(path)?;
            if !query.matches_collection(&key) {
                continue;
            }
            if let Some(filter) = query.filter() {
                if !document_satisfies_filter(data, filter) {
                    continue;
                }
            }
            results.push(DocumentSnapshot::new(
                key,
                Some(data.clone()),
                SnapshotMetadata::new(false, false),
            ));
        }
        drop(documents);

        if let Some((field, direction)) = query.order_by() {
            results.sort_by(|left, right| {
                let ordering = compare_snapshot_fields(left, right, field);
                match direction {
                    OrderDirection::Ascending => ordering,
                    OrderDirection::Descending => ordering.reverse(),
                }
            });
        }
        Ok(results)
    }

    fn register(&self, target: ListenerTarget, callback: ListenCallback) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, AtomicOrdering::SeqCst);
        let listener = Arc::new(Listener { target, callback });
        self.listeners.lock().unwrap().insert(id, listener);
        id
    }

    /// Fans a completed write out to every listener it affects. Locks are
    /// released before callbacks run so listeners may re-enter the store.
    fn dispatch(&self, changed: &DocumentKey) {
        let listeners: Vec<Arc<Listener>> = self.listeners.lock().unwrap().values().cloned().collect();
        let document_snapshot = self.snapshot_of(changed);

        for listener in listeners {
            match &listener.target {
                ListenerTarget::Document(key) => {
                    if key == changed {
                        (listener.callback)(ListenEvent::Document(document_snapshot.clone()));
                    }
                }
                ListenerTarget::Query { definition, previous } => {
                    if !definition.matches_collection(changed) {
                        continue;
                    }
                    let next = match self.evaluate_query(definition) {
                        Ok(next) => next,
                        Err(err) => {
                            (listener.callback)(ListenEvent::Error(err));
                            continue;
                        }
                    };
                    let changes = {
                        let mut slot = previous.lock().unwrap();
                        let changes = compute_changes(&slot, &next);
                        *slot = next;
                        changes
                    };
                    if !changes.is_empty() {
                        (listener.callback)(ListenEvent::Collection(changes));
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn get_document(&self, key: &DocumentKey) -> StoreResult<DocumentSnapshot> {
        let documents = self.documents.lock().unwrap();
        let data = documents.get(&key.path().canonical_string()).cloned();
        Ok(DocumentSnapshot::new(key.clone(), data, SnapshotMetadata::new(true, false)))
    }

    async fn set_document(&self, key: &DocumentKey, data: FieldMap) -> StoreResult<()> {
        {
            let mut documents = self.documents.lock().unwrap();
            documents.insert(key.path().canonical_string(), data);
        }
        self.dispatch(key);
        Ok(())
    }

    async fn update_document(
        &self,
        key: &DocumentKey,
        data: FieldMap,
        field_paths: Vec<FieldPath>,
    ) -> StoreResult<()> {
        {
            let mut documents = self.documents.lock().unwrap();
            let canonical = key.path().canonical_string();
            let mut fields = documents
                .get(&canonical)
                .cloned()
                .ok_or_else(|| not_found(format!("Document {canonical} does not exist")))?;
            for path in &field_paths {
                let value = value_at_path(&data, path).cloned().ok_or_else(|| {
                    internal_error(format!(
                        "Failed to resolve value for update path {}",
                        path.canonical_string()
                    ))
                })?;
                set_value_at_path(&mut fields, path, value);
            }
            documents.insert(canonical, fields);
        }
        self.dispatch(key);
        Ok(())
    }

    async fn delete_document(&self, key: &DocumentKey) -> StoreResult<()> {
        {
            let mut documents = self.documents.lock().unwrap();
            documents.remove(&key.path().canonical_string());
        }
        self.dispatch(key);
        Ok(())
    }

    async fn run_query(&self, query: &QueryDefinition) -> StoreResult<Vec<DocumentSnapshot>> {
        self.evaluate_query(query)
    }

    fn listen_document(&self, key: &DocumentKey, callback: ListenCallback) -> StoreResult<ListenerId> {
        let initial = self.snapshot_of(key);
        let id = self.register(ListenerTarget::Document(key.clone()), callback.clone());
        callback(ListenEvent::Document(initial));
        Ok(id)
    }

    fn listen_query(&self, query: &QueryDefinition, callback: ListenCallback) -> StoreResult<ListenerId> {
        let initial = self.evaluate_query(query)?;
        let changes: Vec<DocumentChange> = initial
            .iter()
            .enumerate()
            .map(|(index, snapshot)| DocumentChange {
                kind: ChangeKind::Added,
                snapshot: snapshot.clone(),
                old_index: None,
                new_index: Some(index),
            })
            .collect();
        let id = self.register(
            ListenerTarget::Query {
                definition: query.clone(),
                previous: Mutex::new(initial),
            },
            callback.clone(),
        );
        callback(ListenEvent::Collection(changes));
        Ok(id)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().unwrap().remove(&id);
    }
}

/// Diffs two consecutive query results into the incremental change feed.
/// Removal indices are reported against the shrinking previous ordering,
/// additions and modifications against the new ordering.
fn compute_changes(previous: &[DocumentSnapshot], next: &[DocumentSnapshot]) -> Vec<DocumentChange> {
    let previous_positions: HashMap<&str, usize> = previous
        .iter()
        .enumerate()
        .map(|(index, snapshot)| (snapshot.id(), index))
        .collect();
    let next_ids: HashMap<&str, usize> = next
        .iter()
        .enumerate()
        .map(|(index, snapshot)| (snapshot.id(), index))
        .collect();

    let mut changes = Vec::new();

    let mut working: Vec<&str> = previous.iter().map(|snapshot| snapshot.id()).collect();
    for snapshot in previous {
        if next_ids.contains_key(snapshot.id()) {
            continue;
        }
        let position = working
            .iter()
            .position(|id| *id == snapshot.id())
            .expect("working set contains every surviving previous id");
        working.remove(position);
        changes.push(DocumentChange {
            kind: ChangeKind::Removed,
            snapshot: snapshot.clone(),
            old_index: Some(position),
            new_index: None,
        });
    }

    for (index, snapshot) in next.iter().enumerate() {
        match previous_positions.get(snapshot.id()) {
            None => changes.push(DocumentChange {
                kind: ChangeKind::Added,
                snapshot: snapshot.clone(),
                old_index: None,
                new_index: Some(index),
            }),
            Some(&old_index) => {
                if previous[old_index].data() != snapshot.data() {
                    changes.push(DocumentChange {
                        kind: ChangeKind::Modified,
                        snapshot: snapshot.clone(),
                        old_index: Some(old_index),
                        new_index: Some(index),
                    });
                }
            }
        }
    }

    changes
}

fn document_satisfies_filter(data: &FieldMap, filter: &FieldFilter) -> bool {
    let value = value_at_path(data, &filter.field);
    match filter.operator {
        FilterOperator::Equal => value == Some(&filter.value),
        FilterOperator::NotEqual => value != Some(&filter.value),
        FilterOperator::LessThan => {
            matches!(compare_optional(value, &filter.value), Some(Ordering::Less))
        }
        FilterOperator::LessThanOrEqual => matches!(
            compare_optional(value, &filter.value),
            Some(Ordering::Less) | Some(Ordering::Equal)
        ),
        FilterOperator::GreaterThan => {
            matches!(compare_optional(value, &filter.value), Some(Ordering::Greater))
        }
        FilterOperator::GreaterThanOrEqual => matches!(
            compare_optional(value, &filter.value),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        ),
        FilterOperator::ArrayContains => match value {
            Some(Value::Array(items)) => items.contains(&filter.value),
            _ => false,
        },
    }
}

fn compare_optional(left: Option<&Value>, right: &Value) -> Option<Ordering> {
    compare_values(left?, right)
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => a.as_f64().partial_cmp(&b.as_f64()),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn compare_snapshot_fields(left: &DocumentSnapshot, right: &DocumentSnapshot, field: &FieldPath) -> Ordering {
    let left_value = left.data().and_then(|data| value_at_path(data, field));
    let right_value = right.data().and_then(|data| value_at_path(data, field));
    match (left_value, right_value) {
        (Some(l), Some(r)) => compare_values(l, r).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}
