//! Schema registry.
//!
//! Collections are schemaless at rest but checked at write time. A
//! [`SchemaDefinition`] lists the fields that must be present, informational
//! type hints, and defaults merged underneath every new document. The
//! [`SchemaRegistry`] is built once at startup and handed to the store.
//!
//! ```
//! use carehub_persistence::schema::{FieldType, SchemaDefinition, SchemaRegistry};
//! use serde_json::json;
//!
//! let registry = SchemaRegistry::builder()
//!     .collection(
//!         "appointments",
//!         SchemaDefinition::new()
//!             .required(["patient_id", "doctor_id"])
//!             .field("status", FieldType::String)
//!             .default_value("status", json!("pending")),
//!     )
//!     .build();
//!
//! let doc = json!({"patient_id": "1", "doctor_id": "2"});
//! let doc = registry.apply_defaults("appointments", doc.as_object().unwrap());
//! assert_eq!(doc["status"], "pending");
//! assert!(registry.validate("appointments", &doc).is_ok());
//! ```

pub mod catalog;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;
use crate::error::{BackendError, StorageError, StorageResult, ValidationError};

/// Informational field type hint. Never enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Date,
    Any,
}

/// Per-collection schema metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Fields that must be present (and non-null) at write time.
    #[serde(default)]
    pub required: Vec<String>,

    /// Field type hints, documentation only.
    #[serde(default)]
    pub types: BTreeMap<String, FieldType>,

    /// Values merged underneath caller fields on insert.
    #[serde(default)]
    pub defaults: Document,
}

impl SchemaDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds required fields, keeping declaration order.
    pub fn required<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            let field = field.into();
            if !self.required.contains(&field) {
                self.required.push(field);
            }
        }
        self
    }

    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.types.insert(name.into(), field_type);
        self
    }

    pub fn default_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(name.into(), value);
        self
    }

    /// Returns the first required field missing from `doc`.
    pub fn first_missing(&self, doc: &Document) -> Option<&str> {
        self.required
            .iter()
            .find(|field| doc.get(field.as_str()).is_none_or(Value::is_null))
            .map(String::as_str)
    }
}

/// Static table of collection schemas.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaRegistry {
    schemas: HashMap<String, SchemaDefinition>,
}

impl SchemaRegistry {
    /// An empty registry: every collection is unconstrained.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    /// Parses a registry from a JSON object keyed by collection name.
    pub fn from_json(json: &str) -> StorageResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            StorageError::Backend(BackendError::InvalidConfig {
                message: format!("invalid schema registry: {e}"),
            })
        })
    }

    /// Registers or replaces a collection schema.
    pub fn register(&mut self, collection: impl Into<String>, schema: SchemaDefinition) {
        self.schemas.insert(collection.into(), schema);
    }

    pub fn get(&self, collection: &str) -> Option<&SchemaDefinition> {
        self.schemas.get(collection)
    }

    /// Registered collection names, sorted.
    pub fn collections(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn field_type(&self, collection: &str, field: &str) -> Option<FieldType> {
        self.get(collection)?.types.get(field).copied()
    }

    /// Fails with the first missing required field.
    pub fn validate(&self, collection: &str, doc: &Document) -> Result<(), ValidationError> {
        let Some(schema) = self.get(collection) else {
            return Ok(());
        };
        match schema.first_missing(doc) {
            Some(field) => Err(ValidationError::MissingRequiredField {
                collection: collection.to_string(),
                field: field.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Returns `doc` with schema defaults merged underneath it.
    pub fn apply_defaults(&self, collection: &str, doc: &Document) -> Document {
        let Some(schema) = self.get(collection) else {
            return doc.clone();
        };
        let mut merged = schema.defaults.clone();
        for (field, value) in doc {
            merged.insert(field.clone(), value.clone());
        }
        merged
    }
}

/// Builder for [`SchemaRegistry`].
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    registry: SchemaRegistry,
}

impl SchemaRegistryBuilder {
    pub fn collection(mut self, name: impl Into<String>, schema: SchemaDefinition) -> Self {
        self.registry.register(name, schema);
        self
    }

    /// Merges another registry; its definitions win on name clashes.
    pub fn extend(mut self, other: SchemaRegistry) -> Self {
        self.registry.schemas.extend(other.schemas);
        self
    }

    pub fn build(self) -> SchemaRegistry {
        self.registry
    }
}
