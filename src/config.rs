use std::sync::Arc;

use crate::datastore::Datastore;
use crate::fallback::FallbackStore;
use crate::model::{FieldMap, FieldPath};
use crate::registry::SubscriptionRegistry;
use crate::schema::SchemaArc;

/// Fires after a validated write has been applied: `(store_id, field_path)`.
pub type MutationSuccessHook = Arc<dyn Fn(&str, &FieldPath) + Send + Sync>;

/// Fires when validation rejects a write: `(store_id, field_path, message)`.
pub type MutationErrorHook = Arc<dyn Fn(&str, &FieldPath, &str) + Send + Sync>;

/// Produces extra fields merged into create/update payloads at call time,
/// e.g. audit timestamps.
pub type AppendFn = Arc<dyn Fn() -> FieldMap + Send + Sync>;

/// Process-wide configuration, checked at store construction.
///
/// Everything except the database handle is optional; store-local options of
/// the same name win over these.
#[derive(Clone)]
pub struct PluginConfig {
    pub db: Arc<dyn Datastore>,
    pub on_mutation_success: Option<MutationSuccessHook>,
    pub on_mutation_error: Option<MutationErrorHook>,
    pub append_to_created: Option<AppendFn>,
    pub append_to_updated: Option<AppendFn>,
}

impl PluginConfig {
    pub fn new(db: Arc<dyn Datastore>) -> Self {
        Self {
            db,
            on_mutation_success: None,
            on_mutation_error: None,
            append_to_created: None,
            append_to_updated: None,
        }
    }

    pub fn with_mutation_success(mut self, hook: MutationSuccessHook) -> Self {
        self.on_mutation_success = Some(hook);
        self
    }

    pub fn with_mutation_error(mut self, hook: MutationErrorHook) -> Self {
        self.on_mutation_error = Some(hook);
        self
    }

    pub fn with_append_to_created(mut self, append: AppendFn) -> Self {
        self.append_to_created = Some(append);
        self
    }

    pub fn with_append_to_updated(mut self, append: AppendFn) -> Self {
        self.append_to_updated = Some(append);
        self
    }
}

/// Per-store construction options.
pub struct StoreOptions {
    /// Owner id for subscription bookkeeping; must be unique per store and
    /// non-empty.
    pub store_id: String,
    /// Collection path this store mirrors, e.g. `"widgets"`.
    pub collection_path: String,
    pub schema: SchemaArc,
    pub on_mutation_success: Option<MutationSuccessHook>,
    pub on_mutation_error: Option<MutationErrorHook>,
    pub append_to_created: Option<AppendFn>,
    pub append_to_updated: Option<AppendFn>,
    /// When set, create/sync route here instead of the remote store.
    pub fallback: Option<Arc<dyn FallbackStore>>,
    /// Registry instance; defaults to the process-wide one.
    pub registry: Option<Arc<SubscriptionRegistry>>,
}

impl StoreOptions {
    pub fn new(store_id: impl Into<String>, collection_path: impl Into<String>, schema: SchemaArc) -> Self {
        Self {
            store_id: store_id.into(),
            collection_path: collection_path.into(),
            schema,
            on_mutation_success: None,
            on_mutation_error: None,
            append_to_created: None,
            append_to_updated: None,
            fallback: None,
            registry: None,
        }
    }

    pub fn with_mutation_success(mut self, hook: MutationSuccessHook) -> Self {
        self.on_mutation_success = Some(hook);
        self
    }

    pub fn with_mutation_error(mut self, hook: MutationErrorHook) -> Self {
        self.on_mutation_error = Some(hook);
        self
    }

    pub fn with_append_to_created(mut self, append: AppendFn) -> Self {
        self.append_to_created = Some(append);
        self
    }

    pub fn with_append_to_updated(mut self, append: AppendFn) -> Self {
        self.append_to_updated = Some(append);
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackStore>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_registry(mut self, registry: Arc<SubscriptionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }
}

/// The layered resolution of plugin-wide and store-local hooks: local config
/// first, plugin config second, no-op last.
#[derive(Clone, Default)]
pub struct ResolvedHooks {
    pub on_mutation_success: Option<MutationSuccessHook>,
    pub on_mutation_error: Option<MutationErrorHook>,
    pub append_to_created: Option<AppendFn>,
    pub append_to_updated: Option<AppendFn>,
}

impl ResolvedHooks {
    pub fn resolve(plugin: &PluginConfig, options: &StoreOptions) -> Self {
        Self {
            on_mutation_success: layer(&options.on_mutation_success, &plugin.on_mutation_success),
            on_mutation_error: layer(&options.on_mutation_error, &plugin.on_mutation_error),
            append_to_created: layer(&options.append_to_created, &plugin.append_to_created),
            append_to_updated: layer(&options.append_to_updated, &plugin.append_to_updated),
        }
    }

    pub fn mutation_succeeded(&self, store_id: &str, path: &FieldPath) {
        if let Some(hook) = &self.on_mutation_success {
            hook(store_id, path);
        }
    }

    pub fn mutation_failed(&self, store_id: &str, path: &FieldPath, message: &str) {
        if let Some(hook) = &self.on_mutation_error {
            hook(store_id, path, message);
        }
    }

    pub fn created_payload(&self) -> FieldMap {
        self.append_to_created.as_ref().map(|f| f()).unwrap_or_default()
    }

    pub fn updated_payload(&self) -> FieldMap {
        self.append_to_updated.as_ref().map(|f| f()).unwrap_or_default()
    }
}

fn layer<T: Clone>(local: &Option<T>, global: &Option<T>) -> Option<T> {
    local.clone().or_else(|| global.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::InMemoryDatastore;
    use crate::schema::MapSchema;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn local_hooks_override_plugin_hooks() {
        let global_calls = Arc::new(AtomicUsize::new(0));
        let local_calls = Arc::new(AtomicUsize::new(0));

        let global = Arc::clone(&global_calls);
        let plugin = PluginConfig::new(Arc::new(InMemoryDatastore::new())).with_mutation_success(Arc::new(
            move |_, _| {
                global.fetch_add(1, Ordering::SeqCst);
            },
        ));

        let local = Arc::clone(&local_calls);
        let options = StoreOptions::new("s", "widgets", MapSchema::new().into_arc()).with_mutation_success(
            Arc::new(move |_, _| {
                local.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let hooks = ResolvedHooks::resolve(&plugin, &options);
        hooks.mutation_succeeded("s", &crate::model::FieldPath::from_dot_separated("x").unwrap());

        assert_eq!(local_calls.load(Ordering::SeqCst), 1);
        assert_eq!(global_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn plugin_hooks_apply_when_no_local_override() {
        let plugin = PluginConfig::new(Arc::new(InMemoryDatastore::new()))
            .with_append_to_updated(Arc::new(|| json!({"updated_by": "system"}).as_object().cloned().unwrap()));
        let options = StoreOptions::new("s", "widgets", MapSchema::new().into_arc());

        let hooks = ResolvedHooks::resolve(&plugin, &options);
        assert_eq!(hooks.updated_payload().get("updated_by"), Some(&json!("system")));
        // Missing on both layers resolves to the no-op payload.
        assert!(hooks.created_payload().is_empty());
    }
}
