use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use super::StructureDescriptor;

/// How a source value becomes a target value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformationKind {
    /// Copy as is.
    #[default]
    None,
    /// Copy under a different name.
    Rename,
    /// Convert to the target's type.
    Convert,
    Concatenate,
    Split,
    /// Delegate to a caller-registered function.
    Custom,
}

impl TransformationKind {
    /// Lenient parse used for recommender output; unknown labels map to `None`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "rename" => Self::Rename,
            "convert" | "type_conversion" | "conversion" => Self::Convert,
            "concatenate" | "concat" => Self::Concatenate,
            "split" => Self::Split,
            "custom" => Self::Custom,
            _ => Self::None,
        }
    }
}

/// One proposed correspondence between a source and a target field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingCandidate {
    pub source_field: String,
    pub target_field: String,
    /// 0-100.
    pub confidence: u8,
    /// Short human-readable justification.
    pub rationale: String,
    pub transformation_kind: TransformationKind,
}

impl MappingCandidate {
    pub fn new(
        source_field: impl Into<String>,
        target_field: impl Into<String>,
        confidence: u8,
        transformation_kind: TransformationKind,
    ) -> Self {
        Self {
            source_field: source_field.into(),
            target_field: target_field.into(),
            confidence: confidence.min(100),
            rationale: String::new(),
            transformation_kind,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }
}

/// The result of a mapping recommendation.
///
/// Candidates are ordered by confidence (descending), then source field name.
/// Each source and each target field appears in at most one candidate; the
/// unmatched sets hold every field not covered by a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingSet {
    candidates: Vec<MappingCandidate>,
    unmatched_source: BTreeSet<String>,
    unmatched_target: BTreeSet<String>,
    overall_confidence: u8,
}

impl MappingSet {
    /// Build a set from raw candidates and the two descriptors.
    ///
    /// Candidates are sorted; when a source or target field appears more
    /// than once only the first candidate after sorting is kept.
    pub fn from_candidates(
        mut candidates: Vec<MappingCandidate>,
        input: &StructureDescriptor,
        reference: &StructureDescriptor,
    ) -> Self {
        candidates.sort_by(|a, b| {
            b.confidence
                .cmp(&a.confidence)
                .then_with(|| a.source_field.cmp(&b.source_field))
                .then_with(|| a.target_field.cmp(&b.target_field))
        });

        let mut used_sources = HashSet::new();
        let mut used_targets = HashSet::new();
        candidates.retain(|c| {
            if used_sources.contains(&c.source_field) || used_targets.contains(&c.target_field) {
                return false;
            }
            used_sources.insert(c.source_field.clone());
            used_targets.insert(c.target_field.clone());
            true
        });

        let unmatched_source = input
            .fields()
            .iter()
            .filter(|f| !used_sources.contains(&f.name))
            .map(|f| f.name.clone())
            .collect();
        let unmatched_target = reference
            .fields()
            .iter()
            .filter(|f| !used_targets.contains(&f.name))
            .map(|f| f.name.clone())
            .collect();

        let overall_confidence = if candidates.is_empty() {
            0
        } else {
            let total: usize = candidates.iter().map(|c| c.confidence as usize).sum();
            (total / candidates.len()) as u8
        };

        Self {
            candidates,
            unmatched_source,
            unmatched_target,
            overall_confidence,
        }
    }

    /// A set with no candidates: every field is unmatched.
    pub fn empty(input: &StructureDescriptor, reference: &StructureDescriptor) -> Self {
        Self::from_candidates(Vec::new(), input, reference)
    }

    pub fn candidates(&self) -> &[MappingCandidate] {
        &self.candidates
    }

    pub fn unmatched_source(&self) -> &BTreeSet<String> {
        &self.unmatched_source
    }

    pub fn unmatched_target(&self) -> &BTreeSet<String> {
        &self.unmatched_target
    }

    /// Mean candidate confidence, or 0 when there are no candidates.
    pub fn overall_confidence(&self) -> u8 {
        self.overall_confidence
    }

    /// Candidate whose source field is `source`, if any.
    pub fn candidate_for(&self, source: &str) -> Option<&MappingCandidate> {
        self.candidates.iter().find(|c| c.source_field == source)
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }
}
