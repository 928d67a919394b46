use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{invalid_argument, validation_error, StoreResult};
use crate::model::{value_at_path, FieldMap, FieldPath};

/// The schema-validation boundary: default materialization, whole-object cast
/// with unknown-field stripping, and path-scoped synchronous validation.
pub trait Schema: Send + Sync + 'static {
    /// Materializes a field map holding every declared field's default value.
    fn defaults(&self) -> FieldMap;

    /// Casts a whole object against the shape, dropping undeclared top-level
    /// fields. Declared fields pass through unmodified.
    fn cast(&self, data: FieldMap) -> FieldMap;

    /// Validates the value at `path` within `candidate`. The candidate is a
    /// whole prospective document, never a fragment.
    fn validate_at(&self, path: &FieldPath, candidate: &FieldMap) -> StoreResult<()>;
}

pub type SchemaArc = Arc<dyn Schema>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Bool,
    Number,
    String,
    Array,
    Object,
    Any,
}

impl FieldType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::Bool => value.is_boolean(),
            FieldType::Number => value.is_number(),
            FieldType::String => value.is_string(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Any => true,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Number => "number",
            FieldType::String => "string",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Any => "any",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    field_type: FieldType,
    default: Value,
}

impl FieldSpec {
    pub fn new(field_type: FieldType, default: Value) -> Self {
        Self { field_type, default }
    }
}

/// A flat, declaration-backed [`Schema`]: one typed spec per top-level field.
/// Nested objects are typed as a whole; their inner structure is not walked.
#[derive(Clone, Debug, Default)]
pub struct MapSchema {
    fields: BTreeMap<String, FieldSpec>,
}

impl MapSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, field_type: FieldType, default: Value) -> Self {
        self.fields.insert(name.into(), FieldSpec::new(field_type, default));
        self
    }

    /// Loads a declaration of the form
    /// `{"field": {"type": "number", "default": 0}, ...}`.
    pub fn from_declaration(declaration: Value) -> StoreResult<Self> {
        let fields: BTreeMap<String, FieldSpec> = serde_json::from_value(declaration)
            .map_err(|err| invalid_argument(format!("malformed schema declaration: {err}")))?;
        Ok(Self { fields })
    }

    pub fn into_arc(self) -> SchemaArc {
        Arc::new(self)
    }
}

impl Schema for MapSchema {
    fn defaults(&self) -> FieldMap {
        self.fields
            .iter()
            .map(|(name, spec)| (name.clone(), spec.default.clone()))
            .collect()
    }

    fn cast(&self, data: FieldMap) -> FieldMap {
        data.into_iter()
            .filter(|(name, _)| self.fields.contains_key(name))
            .collect()
    }

    fn validate_at(&self, path: &FieldPath, candidate: &FieldMap) -> StoreResult<()> {
        let Some(spec) = self.fields.get(path.first_segment()) else {
            return Err(validation_error(format!(
                "field '{}' is not declared by the schema",
                path.first_segment()
            )));
        };

        if path.segments().len() == 1 {
            let value = candidate.get(path.first_segment()).unwrap_or(&Value::Null);
            if !spec.field_type.accepts(value) {
                return Err(validation_error(format!(
                    "field '{}' expects {} but got {value}",
                    path.canonical_string(),
                    spec.field_type.as_str()
                )));
            }
            return Ok(());
        }

        // Nested writes only require the enclosing top-level field to still
        // be the declared shape and the target value to exist.
        let root = candidate.get(path.first_segment()).unwrap_or(&Value::Null);
        if !spec.field_type.accepts(root) {
            return Err(validation_error(format!(
                "field '{}' expects {} but got {root}",
                path.first_segment(),
                spec.field_type.as_str()
            )));
        }
        if value_at_path(candidate, path).is_none() {
            return Err(validation_error(format!(
                "path '{}' does not resolve inside the candidate document",
                path.canonical_string()
            )));
        }
        Ok(())
    }
}
