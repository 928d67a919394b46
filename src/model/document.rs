use serde_json::Value;

use crate::model::path::FieldPath;

/// Document fields as delivered by and sent to the remote store.
pub type FieldMap = serde_json::Map<String, Value>;

/// The snapshot-metadata token carried on every mirrored document. It is what
/// distinguishes a locally-pending optimistic write (`has_pending_writes`)
/// from server-confirmed state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnapshotMetadata {
    from_cache: bool,
    has_pending_writes: bool,
}

impl SnapshotMetadata {
    pub fn new(from_cache: bool, has_pending_writes: bool) -> Self {
        Self {
            from_cache,
            has_pending_writes,
        }
    }

    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn has_pending_writes(&self) -> bool {
        self.has_pending_writes
    }
}

/// The local mirror of one remote record: its fields plus the reserved
/// identity, storage path, and snapshot metadata.
///
/// The identifier stays empty until the document has been persisted (or a
/// remote snapshot arrived). Once assigned it always matches the last segment
/// of the storage path and is only ever replaced by an explicit fetch or
/// create of a different document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentState {
    id: String,
    path: String,
    metadata: SnapshotMetadata,
    fields: FieldMap,
}

impl DocumentState {
    pub fn new(fields: FieldMap) -> Self {
        Self {
            fields,
            ..Default::default()
        }
    }

    /// Materializes a document state from snapshot parts. The three reserved
    /// keys (id, path, metadata) are always present, even for empty documents.
    pub fn materialize(id: impl Into<String>, path: impl Into<String>, metadata: SnapshotMetadata, fields: FieldMap) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            metadata,
            fields,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn metadata(&self) -> SnapshotMetadata {
        self.metadata
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut FieldMap {
        &mut self.fields
    }

    /// Binds this state to a concrete remote document. `path` must end in
    /// `id`; callers construct both from the same [`DocumentKey`].
    ///
    /// [`DocumentKey`]: crate::model::path::DocumentKey
    pub fn assign_identity(&mut self, id: impl Into<String>, path: impl Into<String>) {
        let id = id.into();
        let path = path.into();
        debug_assert!(
            path.rsplit('/').next() == Some(id.as_str()),
            "document id must match the last path segment"
        );
        self.id = id;
        self.path = path;
    }

    pub fn set_metadata(&mut self, metadata: SnapshotMetadata) {
        self.metadata = metadata;
    }

    /// Flags the document as carrying an optimistic write that the remote
    /// store has not confirmed yet. Cleared by the next reconciled snapshot.
    pub fn mark_pending(&mut self) {
        self.metadata = SnapshotMetadata::new(self.metadata.from_cache(), true);
    }

    pub fn contains(&self, path: &FieldPath) -> bool {
        value_at_path(&self.fields, path).is_some()
    }

    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        value_at_path(&self.fields, path)
    }

    pub fn set(&mut self, path: &FieldPath, value: Value) {
        set_value_at_path(&mut self.fields, path, value);
    }

    /// Replace-strategy merge: every field present on `incoming` overwrites
    /// the corresponding local field, and the reserved keys are taken from
    /// `incoming` wholesale.
    pub fn merge(&mut self, incoming: &DocumentState) {
        for (name, value) in incoming.fields.iter() {
            self.fields.insert(name.clone(), value.clone());
        }
        self.id = incoming.id.clone();
        self.path = incoming.path.clone();
        self.metadata = incoming.metadata;
    }

    /// Drops identity and all fields, restoring the given defaults.
    pub fn reset(&mut self, defaults: FieldMap) {
        self.id.clear();
        self.path.clear();
        self.metadata = SnapshotMetadata::default();
        self.fields = defaults;
    }
}

/// Resolves a nested value. Every intermediate segment must be an object.
pub fn value_at_path<'a>(fields: &'a FieldMap, path: &FieldPath) -> Option<&'a Value> {
    let (first, rest) = path.segments().split_first()?;
    let mut current = fields.get(first)?;
    for segment in rest {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Writes a nested value, creating intermediate objects as needed. A
/// non-object intermediate value is replaced by an object.
pub fn set_value_at_path(fields: &mut FieldMap, path: &FieldPath, value: Value) {
    let segments = path.segments();
    let (last, parents) = segments.split_last().expect("FieldPath is never empty");

    let mut current = fields;
    for segment in parents {
        let slot = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(FieldMap::new()));
        if !slot.is_object() {
            *slot = Value::Object(FieldMap::new());
        }
        current = slot.as_object_mut().expect("slot was just made an object");
    }
    current.insert(last.clone(), value);
}
