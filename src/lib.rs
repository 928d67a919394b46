//! A local mutable mirror of a remote realtime document store.
//!
//! A [`Store`] binds one collection (and one active document within it) to
//! local state that remote snapshots are continuously folded into, while
//! local writes are validated against a schema, applied optimistically, and
//! pushed back to the remote store, whose confirming snapshots later echo
//! through the same subscription.
//!
//! The moving parts, each usable on its own:
//!
//! - [`registry::SubscriptionRegistry`]: shared bookkeeping of live
//!   subscriptions, keyed by `(owner, resource)`.
//! - [`reconcile::SnapshotReconciler`]: opens subscriptions and folds
//!   snapshots and change batches into document/collection state.
//! - [`mutation::MutationPipeline`]: schema-validated optimistic writes,
//!   create/delete, array helpers, best-effort remote sync.
//! - [`lifecycle::LifecycleController`]: one-shot initialization gate.
//! - [`view::StoreView`]: two-tier field/attribute accessor.
//!
//! The remote store itself sits behind the [`datastore::Datastore`] trait;
//! [`datastore::InMemoryDatastore`] is a full in-process implementation with
//! realtime listeners, used throughout the test suites.

pub mod config;
pub mod datastore;
pub mod error;
pub mod fallback;
pub mod lifecycle;
pub mod model;
pub mod mutation;
pub mod reconcile;
pub mod registry;
pub mod schema;
pub mod state;
pub mod store;
pub mod view;

pub use config::{PluginConfig, StoreOptions};
pub use datastore::{
    ChangeKind, Datastore, DocumentChange, DocumentSnapshot, FieldFilter, FilterOperator,
    InMemoryDatastore, ListenEvent, OrderDirection, QueryDefinition,
};
pub use error::{StoreError, StoreErrorCode, StoreResult};
pub use fallback::{FallbackStore, MemoryFallbackStore};
pub use lifecycle::{LifecycleController, LifecyclePhase};
pub use model::{DocumentKey, DocumentState, FieldMap, FieldPath, ResourcePath, SnapshotMetadata};
pub use mutation::{CreatedDocument, MutationPipeline};
pub use reconcile::{BindOptions, SnapshotReconciler};
pub use registry::{SubscriptionHandle, SubscriptionKind, SubscriptionRegistry};
pub use schema::{FieldType, MapSchema, Schema, SchemaArc};
pub use state::{StateCell, StoreState};
pub use store::{QueryDescriptor, Store};
pub use view::StoreView;
