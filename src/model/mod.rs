pub mod collection;
pub mod document;
pub mod path;

pub use collection::CollectionState;
pub use document::{set_value_at_path, value_at_path, DocumentState, FieldMap, SnapshotMetadata};
pub use path::{DocumentKey, FieldPath, ResourcePath};
