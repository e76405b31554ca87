//! Domain models shared by every stage.
//!
//! - [`StructureDescriptor`] / [`FieldDescriptor`] - normalized description of a tabular source
//! - [`InferredType`] - value type inferred for a field
//! - [`MappingCandidate`] / [`MappingSet`] - proposed field-to-field correspondences
//! - [`ValidationFinding`] - non-fatal per-row problem found while transforming
//! - [`Row`] - one record, field name to JSON value, in field order

mod finding;
mod mapping;

pub use finding::{Severity, ValidationFinding};
pub use mapping::{MappingCandidate, MappingSet, TransformationKind};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A single record. Keys keep the order they were inserted in.
pub type Row = Map<String, Value>;

// =============================================================================
// Inferred Type
// =============================================================================

/// Value type inferred for a field from its non-empty values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferredType {
    Integer,
    Float,
    Boolean,
    Date,
    String,
    /// Every observed value was empty.
    Unknown,
}

impl InferredType {
    pub fn as_str(self) -> &'static str {
        match self {
            InferredType::Integer => "integer",
            InferredType::Float => "float",
            InferredType::Boolean => "boolean",
            InferredType::Date => "date",
            InferredType::String => "string",
            InferredType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InferredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// =============================================================================
// Structure Descriptor
// =============================================================================

/// Description of one field of a tabular source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    /// Field (column) name as it appears in the source.
    pub name: String,
    /// Type inferred from the field's values.
    pub inferred_type: InferredType,
    /// A bounded number of distinct, non-empty sample values.
    #[serde(default)]
    pub sample_values: Vec<Value>,
    /// Fraction of rows where the value is empty (0.0 to 1.0).
    #[serde(default)]
    pub null_rate: f64,
}

impl FieldDescriptor {
    /// Create a descriptor with no samples and no nulls.
    pub fn new(name: impl Into<String>, inferred_type: InferredType) -> Self {
        Self {
            name: name.into(),
            inferred_type,
            sample_values: Vec::new(),
            null_rate: 0.0,
        }
    }

    /// Attach sample values.
    pub fn with_samples(mut self, samples: Vec<Value>) -> Self {
        self.sample_values = samples;
        self
    }

    /// Set the null rate (clamped to 0.0-1.0).
    pub fn with_null_rate(mut self, rate: f64) -> Self {
        self.null_rate = rate.clamp(0.0, 1.0);
        self
    }
}

/// Immutable snapshot of a tabular source: ordered fields plus row count.
///
/// Produced once per source by a [`crate::parser::Parser`] and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureDescriptor {
    fields: Vec<FieldDescriptor>,
    row_count: usize,
}

impl StructureDescriptor {
    pub fn new(fields: Vec<FieldDescriptor>, row_count: usize) -> Self {
        Self { fields, row_count }
    }

    /// Build a descriptor of untyped fields, mostly useful for reference
    /// layouts that only name their columns.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let fields = names
            .iter()
            .map(|n| FieldDescriptor::new(n.as_ref(), InferredType::Unknown))
            .collect();
        Self::new(fields, 0)
    }

    /// Fields in source order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Number of rows in the source.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Look a field up by exact name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Field names in source order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Textual representation of a value, as used by text operations and
/// encoders. `null` becomes the empty string.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Whether a value counts as empty (null or blank text).
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
