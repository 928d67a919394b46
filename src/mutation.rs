use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde_json::Value;

use crate::config::ResolvedHooks;
use crate::datastore::Datastore;
use crate::error::{invalid_path, StoreResult};
use crate::fallback::FallbackStore;
use crate::model::{set_value_at_path, DocumentKey, FieldMap, FieldPath, ResourcePath};
use crate::reconcile::{BindOptions, SnapshotReconciler};
use crate::schema::SchemaArc;
use crate::state::{StateCell, StoreState};

/// Result of [`MutationPipeline::create`].
#[derive(Clone, Debug)]
pub struct CreatedDocument {
    pub id: String,
    pub data: FieldMap,
}

/// Validates, applies, and optionally persists writes against the store's
/// active document.
///
/// Writes are optimistic: the local mirror is patched as soon as validation
/// passes, and the remote store's confirming snapshot later flows back in
/// through the reconciler subscription.
pub struct MutationPipeline {
    store_id: String,
    collection_path: ResourcePath,
    db: Arc<dyn Datastore>,
    schema: SchemaArc,
    state: Arc<StateCell<StoreState>>,
    hooks: ResolvedHooks,
    fallback: Option<Arc<dyn FallbackStore>>,
    reconciler: Arc<SnapshotReconciler>,
}

impl MutationPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store_id: impl Into<String>,
        collection_path: ResourcePath,
        db: Arc<dyn Datastore>,
        schema: SchemaArc,
        state: Arc<StateCell<StoreState>>,
        hooks: ResolvedHooks,
        fallback: Option<Arc<dyn FallbackStore>>,
        reconciler: Arc<SnapshotReconciler>,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            collection_path,
            db,
            schema,
            state,
            hooks,
            fallback,
            reconciler,
        }
    }

    /// Writes `value` at `path` on the active document.
    ///
    /// The path must already exist; a write to an undeclared path is
    /// rejected with `InvalidPath`, not silently created. Writing the value
    /// already present is a no-op returning `Ok(false)`. Validation runs
    /// against a clone with the write applied, so a rejected write never
    /// leaves partially-applied state: the failure hook fires and the call
    /// resolves `Ok(false)`.
    pub async fn update(&self, path: &FieldPath, value: Value, should_sync: bool) -> StoreResult<bool> {
        let current = self.state.read(|state| state.doc.get(path).cloned());
        let Some(current) = current else {
            return Err(invalid_path(format!(
                "cannot write undeclared path '{}'",
                path.canonical_string()
            )));
        };
        if current == value {
            return Ok(false);
        }

        let mut candidate = self.state.read(|state| state.doc.fields().clone());
        set_value_at_path(&mut candidate, path, value.clone());
        if let Err(err) = self.schema.validate_at(path, &candidate) {
            log::warn!("validation rejected write to '{}': {err}", path.canonical_string());
            self.hooks.mutation_failed(&self.store_id, path, err.message());
            return Ok(false);
        }

        self.state.patch(|state| {
            state.doc.set(path, value);
            state.doc.mark_pending();
        });
        self.hooks.mutation_succeeded(&self.store_id, path);

        if should_sync {
            self.sync(std::slice::from_ref(path)).await?;
        }
        Ok(true)
    }

    /// Persists the named fields (the whole document when `paths` is empty)
    /// to the remote store, merging in the configured append-on-update data
    /// computed now. Never touches fields not named. Best effort: a missing
    /// document reference or a remote failure is logged and reported as
    /// `Ok(false)`.
    pub async fn sync(&self, paths: &[FieldPath]) -> StoreResult<bool> {
        let doc = self.state.read(|state| state.doc.clone());

        let mut payload = if paths.is_empty() {
            doc.fields().clone()
        } else {
            let mut named = FieldMap::new();
            for path in paths {
                if let Some(value) = doc.get(path) {
                    set_value_at_path(&mut named, path, value.clone());
                }
            }
            named
        };

        let appended = self.hooks.updated_payload();

        if let Some(fallback) = &self.fallback {
            let mut full = doc.fields().clone();
            for (name, value) in appended {
                full.insert(name, value);
            }
            fallback.set(Value::Object(full));
            return Ok(true);
        }

        if doc.id().is_empty() || doc.path().is_empty() {
            log::warn!("cannot sync store '{}': no persistable document reference", self.store_id);
            return Ok(false);
        }

        let mut field_paths: Vec<FieldPath> = if paths.is_empty() {
            doc.fields()
                .keys()
                .map(|name| FieldPath::new([name.clone()]))
                .collect::<StoreResult<_>>()?
        } else {
            paths.to_vec()
        };
        for (name, value) in appended {
            field_paths.push(FieldPath::new([name.clone()])?);
            payload.insert(name, value);
        }

        let key = DocumentKey::from_string(doc.path())?;
        match self.db.update_document(&key, payload, field_paths).await {
            Ok(()) => Ok(true),
            Err(err) => {
                log::warn!("remote sync for '{}' failed: {err}", doc.path());
                Ok(false)
            }
        }
    }

    /// Creates a new remote document (auto-id) or upserts at `id`.
    ///
    /// The persisted data is schema defaults overlaid with `override_data`,
    /// cast with unknown fields stripped, plus the configured append-on-create
    /// data. Remote failure propagates. On success a reconciler subscription
    /// is opened on the result so future remote changes mirror back.
    pub async fn create(&self, override_data: FieldMap, id: Option<&str>) -> StoreResult<CreatedDocument> {
        let mut data = self.schema.defaults();
        for (name, value) in override_data {
            data.insert(name, value);
        }
        let mut data = self.schema.cast(data);
        for (name, value) in self.hooks.created_payload() {
            data.insert(name, value);
        }

        let doc_id = id.map(str::to_string).unwrap_or_else(generate_document_id);
        let key = DocumentKey::from_path(self.collection_path.child([doc_id.clone()]))?;

        // A previously bound document keeps mirroring into the same state
        // slice otherwise.
        self.reconciler.release_document();

        if let Some(fallback) = &self.fallback {
            fallback.set(Value::Object(data.clone()));
            self.state.patch(|state| {
                for (name, value) in data.iter() {
                    state.doc.fields_mut().insert(name.clone(), value.clone());
                }
                state.doc.assign_identity(&doc_id, key.path().canonical_string());
            });
            return Ok(CreatedDocument { id: doc_id, data });
        }

        self.db.set_document(&key, data.clone()).await?;
        self.reconciler.bind_document(&key, &BindOptions::default()).await?;
        Ok(CreatedDocument { id: doc_id, data })
    }

    /// Tears the document subscription down, deletes the remote document
    /// (failures propagate), and resets local state to schema defaults.
    pub async fn delete_document(&self) -> StoreResult<bool> {
        let path = self.state.read(|state| state.doc.path().to_string());
        if path.is_empty() {
            log::warn!("cannot delete for store '{}': no document bound", self.store_id);
            return Ok(false);
        }

        self.reconciler.release_document();
        let key = DocumentKey::from_string(&path)?;
        self.db.delete_document(&key).await?;
        self.state.patch(|state| state.doc.reset(self.schema.defaults()));
        Ok(true)
    }

    /// Applies `transform` to the array at `path` and writes the result via
    /// [`update`]. A non-array value at the path is logged and reported as
    /// `Ok(false)`; a transform that leaves the array element-wise identical
    /// short-circuits to `Ok(false)` without touching the pipeline.
    ///
    /// [`update`]: MutationPipeline::update
    pub async fn array_update<F>(&self, path: &FieldPath, transform: F, should_sync: bool) -> StoreResult<bool>
    where
        F: FnOnce(&[Value]) -> Vec<Value>,
    {
        let current = self.state.read(|state| state.doc.get(path).cloned());
        let Some(Value::Array(items)) = current else {
            log::warn!("array helper target '{}' does not hold an array", path.canonical_string());
            return Ok(false);
        };
        let candidate = transform(&items);
        if candidate == items {
            return Ok(false);
        }
        self.update(path, Value::Array(candidate), should_sync).await
    }

    /// Appends `value` unless it is already present. Duplicates that were
    /// already in the array are preserved, not deduplicated.
    pub async fn array_union(&self, path: &FieldPath, value: Value, should_sync: bool) -> StoreResult<bool> {
        self.array_update(
            path,
            move |items| {
                let mut next = items.to_vec();
                if !next.contains(&value) {
                    next.push(value);
                }
                next
            },
            should_sync,
        )
        .await
    }

    /// Removes every element equal to `value`.
    pub async fn array_remove(&self, path: &FieldPath, value: Value, should_sync: bool) -> StoreResult<bool> {
        self.array_update(
            path,
            move |items| items.iter().filter(|item| **item != value).cloned().collect(),
            should_sync,
        )
        .await
    }

    /// Removes the element at `index`. An out-of-range index is "no match",
    /// so the call resolves `Ok(false)` rather than erroring.
    pub async fn array_remove_index(&self, path: &FieldPath, index: usize, should_sync: bool) -> StoreResult<bool> {
        self.array_update(
            path,
            move |items| {
                let mut next = items.to_vec();
                if index < next.len() {
                    next.remove(index);
                }
                next
            },
            should_sync,
        )
        .await
    }

    /// Replaces the element at `index`; out-of-range resolves `Ok(false)`.
    pub async fn array_update_item(
        &self,
        path: &FieldPath,
        index: usize,
        value: Value,
        should_sync: bool,
    ) -> StoreResult<bool> {
        self.array_update(
            path,
            move |items| {
                let mut next = items.to_vec();
                if index < next.len() {
                    next[index] = value;
                }
                next
            },
            should_sync,
        )
        .await
    }
}

fn generate_document_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(20)
        .collect()
}
