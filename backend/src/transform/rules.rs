//! Transformation rules and lowering from a mapping set.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RuleResult;
use crate::models::{InferredType, MappingSet, StructureDescriptor, TransformationKind};

/// Conversion applied by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleKind {
    Direct,
    Uppercase,
    Lowercase,
    Trim,
    ToInteger,
    ToFloat,
    ToBoolean,
    ToDate,
    /// Delegate to the registered function named by the `function` parameter.
    Custom,
}

impl RuleKind {
    /// Kind used when lowering a `convert` candidate to a target of this type.
    pub fn for_target_type(target: InferredType) -> Self {
        match target {
            InferredType::Integer => RuleKind::ToInteger,
            InferredType::Float => RuleKind::ToFloat,
            InferredType::Boolean => RuleKind::ToBoolean,
            InferredType::Date => RuleKind::ToDate,
            InferredType::String | InferredType::Unknown => RuleKind::Direct,
        }
    }
}

/// Converts one source field into one target field.
///
/// Parameters understood by the engine:
///
/// | Key | Kinds | Meaning |
/// |-----|-------|---------|
/// | `default` | all | value used when the source is missing or null |
/// | `format` | toDate | chrono pattern tried before the built-in ones |
/// | `outputFormat` | toDate | chrono pattern of the result (`%Y-%m-%d`) |
/// | `function` | custom | name of a registered custom function |
/// | `required` | all | null or blank result is an error finding |
/// | `pattern` | all | regex the textual result must match |
/// | `minLength` / `maxLength` | all | bounds on the textual result |
/// | `min` / `max` | all | bounds on the numeric result |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationRule {
    pub source_field: String,
    pub target_field: String,
    pub kind: RuleKind,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

impl TransformationRule {
    pub fn new(source_field: impl Into<String>, target_field: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            source_field: source_field.into(),
            target_field: target_field.into(),
            kind,
            parameters: Map::new(),
        }
    }

    /// Shorthand for a `direct` rule keeping the field name.
    pub fn direct(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::new(field.clone(), field, RuleKind::Direct)
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }
}

/// Decode a JSON array of rules. An unknown `kind` is an error.
pub fn rules_from_json(json: &str) -> RuleResult<Vec<TransformationRule>> {
    Ok(serde_json::from_str(json)?)
}

/// Lower a mapping set into rules, one per candidate, in candidate order.
///
/// | Candidate kind | Rule kind |
/// |----------------|-----------|
/// | none, rename | direct |
/// | convert | by target type: toInteger, toFloat, toBoolean, toDate (direct for text) |
/// | concatenate, split, custom | custom, `function` = target field name |
///
/// Target types come from `reference`; a target missing from it converts
/// as text.
pub fn lower(mapping: &MappingSet, reference: &StructureDescriptor) -> Vec<TransformationRule> {
    mapping
        .candidates()
        .iter()
        .map(|candidate| {
            let source = candidate.source_field.as_str();
            let target = candidate.target_field.as_str();
            match candidate.transformation_kind {
                TransformationKind::None | TransformationKind::Rename => {
                    TransformationRule::new(source, target, RuleKind::Direct)
                }
                TransformationKind::Convert => {
                    let target_type = reference
                        .field(target)
                        .map(|f| f.inferred_type)
                        .unwrap_or(InferredType::String);
                    TransformationRule::new(source, target, RuleKind::for_target_type(target_type))
                }
                TransformationKind::Concatenate
                | TransformationKind::Split
                | TransformationKind::Custom => {
                    TransformationRule::new(source, target, RuleKind::Custom)
                        .with_parameter("function", target)
                }
            }
        })
        .collect()
}
