use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::model::{DocumentKey, FieldMap, FieldPath, ResourcePath, SnapshotMetadata};

pub mod memory;

pub use memory::InMemoryDatastore;

/// A point-in-time payload for a single document.
#[derive(Clone, Debug)]
pub struct DocumentSnapshot {
    key: DocumentKey,
    data: Option<FieldMap>,
    metadata: SnapshotMetadata,
    read_time: DateTime<Utc>,
}

impl DocumentSnapshot {
    pub fn new(key: DocumentKey, data: Option<FieldMap>, metadata: SnapshotMetadata) -> Self {
        Self {
            key,
            data,
            metadata,
            read_time: Utc::now(),
        }
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn id(&self) -> &str {
        self.key.id()
    }

    pub fn data(&self) -> Option<&FieldMap> {
        self.data.as_ref()
    }

    pub fn metadata(&self) -> SnapshotMetadata {
        self.metadata
    }

    /// When this snapshot was produced, as observed by the datastore.
    pub fn read_time(&self) -> DateTime<Utc> {
        self.read_time
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One incremental change in a collection's realtime feed.
///
/// `new_index` is set for `Added`/`Modified`, `old_index` for
/// `Modified`/`Removed`, matching the shape the remote store reports.
#[derive(Clone, Debug)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub snapshot: DocumentSnapshot,
    pub old_index: Option<usize>,
    pub new_index: Option<usize>,
}

/// What a realtime listener delivers: an initial snapshot followed by
/// incremental events, or a terminal error.
#[derive(Clone, Debug)]
pub enum ListenEvent {
    Document(DocumentSnapshot),
    Collection(Vec<DocumentChange>),
    Error(StoreError),
}

pub type ListenCallback = Arc<dyn Fn(ListenEvent) + Send + Sync>;

pub type ListenerId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    ArrayContains,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Equal => "==",
            FilterOperator::NotEqual => "!=",
            FilterOperator::LessThan => "<",
            FilterOperator::LessThanOrEqual => "<=",
            FilterOperator::GreaterThan => ">",
            FilterOperator::GreaterThanOrEqual => ">=",
            FilterOperator::ArrayContains => "array-contains",
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldFilter {
    pub field: FieldPath,
    pub operator: FilterOperator,
    pub value: Value,
}

/// A fully resolved collection query, as handed to the datastore.
#[derive(Clone, Debug)]
pub struct QueryDefinition {
    collection: ResourcePath,
    order_by: Option<(FieldPath, OrderDirection)>,
    filter: Option<FieldFilter>,
}

impl QueryDefinition {
    pub fn new(collection: ResourcePath) -> Self {
        Self {
            collection,
            order_by: None,
            filter: None,
        }
    }

    pub fn with_order_by(mut self, field: FieldPath, direction: OrderDirection) -> Self {
        self.order_by = Some((field, direction));
        self
    }

    pub fn with_filter(mut self, filter: FieldFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn collection(&self) -> &ResourcePath {
        &self.collection
    }

    pub fn order_by(&self) -> Option<&(FieldPath, OrderDirection)> {
        self.order_by.as_ref()
    }

    pub fn filter(&self) -> Option<&FieldFilter> {
        self.filter.as_ref()
    }

    pub fn matches_collection(&self, key: &DocumentKey) -> bool {
        key.collection_path() == self.collection
    }

    /// A stable string form, used as the resource id for subscription
    /// bookkeeping so re-running the same query reuses one listener slot.
    pub fn canonical_string(&self) -> String {
        let mut out = self.collection.canonical_string();
        if let Some((field, direction)) = &self.order_by {
            let dir = match direction {
                OrderDirection::Ascending => "asc",
                OrderDirection::Descending => "desc",
            };
            out.push_str(&format!("|order:{}:{dir}", field.canonical_string()));
        }
        if let Some(filter) = &self.filter {
            out.push_str(&format!(
                "|where:{}{}{}",
                filter.field.canonical_string(),
                filter.operator.as_str(),
                filter.value
            ));
        }
        out
    }
}

/// The remote document store boundary.
///
/// Reads and writes are async round trips; listener management is synchronous
/// bookkeeping. `listen_*` delivers the initial snapshot before returning and
/// incremental events afterwards. `remove_listener` is idempotent.
#[async_trait]
pub trait Datastore: Send + Sync + 'static {
    async fn get_document(&self, key: &DocumentKey) -> StoreResult<DocumentSnapshot>;
    async fn set_document(&self, key: &DocumentKey, data: FieldMap) -> StoreResult<()>;
    async fn update_document(
        &self,
        key: &DocumentKey,
        data: FieldMap,
        field_paths: Vec<FieldPath>,
    ) -> StoreResult<()>;
    async fn delete_document(&self, key: &DocumentKey) -> StoreResult<()>;
    async fn run_query(&self, query: &QueryDefinition) -> StoreResult<Vec<DocumentSnapshot>>;

    fn listen_document(&self, key: &DocumentKey, callback: ListenCallback) -> StoreResult<ListenerId>;
    fn listen_query(&self, query: &QueryDefinition, callback: ListenCallback) -> StoreResult<ListenerId>;
    fn remove_listener(&self, id: ListenerId);
}

/// Builds the teardown closure stored in the subscription registry for a
/// live listener. Calling it more than once is harmless.
pub fn unsubscribe_fn(db: Arc<dyn Datastore>, id: ListenerId) -> Arc<dyn Fn() + Send + Sync> {
    Arc::new(move || db.remove_listener(id))
}
