//! Mapping recommendation.
//!
//! Rule-based matching scores every (source, target) pair with
//! [`similarity::score`] and assigns greedily, best pair first, each field at
//! most once. An external [`Recommender`] may be consulted first; its answer
//! is used only when it arrives in time, without error and without
//! panicking.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};

use super::recommender::Recommender;
use super::similarity::{self, MatchTier};
use crate::config::Settings;
use crate::error::{panic_message, RecommenderError};
use crate::models::{
    FieldDescriptor, InferredType, MappingCandidate, MappingSet, StructureDescriptor, TransformationKind,
};

const DEFAULT_MIN_SCORE: u8 = 50;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a mapping came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum MappingSource {
    /// Accepted from the external recommender.
    Recommender { name: String },
    /// Rule-based matching. `reason` says why the recommender was not used,
    /// if one was supplied.
    RuleBased { reason: Option<String> },
}

/// A mapping set plus how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub mapping: MappingSet,
    pub source: MappingSource,
}

impl Recommendation {
    /// True when a recommender was supplied but its answer was not used.
    pub fn used_fallback(&self) -> bool {
        matches!(self.source, MappingSource::RuleBased { reason: Some(_) })
    }
}

/// Recommends field mappings between two structures.
#[derive(Debug, Clone)]
pub struct MappingEngine {
    min_score: u8,
    timeout: Duration,
}

impl Default for MappingEngine {
    fn default() -> Self {
        Self {
            min_score: DEFAULT_MIN_SCORE,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl MappingEngine {
    pub fn new(min_score: u8, timeout: Duration) -> Self {
        Self {
            min_score: min_score.min(100),
            timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.min_match_score, settings.recommender_timeout)
    }

    pub fn min_score(&self) -> u8 {
        self.min_score
    }

    /// Recommend a mapping. Never fails: recommender errors, timeouts and
    /// panics fall back to rule-based matching.
    pub async fn recommend(
        &self,
        input: &StructureDescriptor,
        reference: &StructureDescriptor,
        recommender: Option<&dyn Recommender>,
    ) -> MappingSet {
        self.recommend_detailed(input, reference, recommender).await.mapping
    }

    /// Same as [`recommend`](Self::recommend), also reporting which path was
    /// taken.
    pub async fn recommend_detailed(
        &self,
        input: &StructureDescriptor,
        reference: &StructureDescriptor,
        recommender: Option<&dyn Recommender>,
    ) -> Recommendation {
        let Some(recommender) = recommender else {
            return Recommendation {
                mapping: self.recommend_rule_based(input, reference),
                source: MappingSource::RuleBased { reason: None },
            };
        };

        let reason = if !recommender.is_available() {
            format!("{} is not available", recommender.name())
        } else {
            let suggestion = AssertUnwindSafe(recommender.suggest(input, reference)).catch_unwind();
            match tokio::time::timeout(self.timeout, suggestion).await {
                Ok(Ok(Ok(candidates))) => {
                    let mapping = sanitize(candidates, input, reference);
                    tracing::info!(
                        recommender = recommender.name(),
                        candidates = mapping.len(),
                        confidence = mapping.overall_confidence(),
                        "accepted recommender mapping"
                    );
                    return Recommendation {
                        mapping,
                        source: MappingSource::Recommender {
                            name: recommender.name().to_string(),
                        },
                    };
                }
                Ok(Ok(Err(e))) => e.to_string(),
                Ok(Err(panic)) => RecommenderError::Panicked(panic_message(&*panic)).to_string(),
                Err(_) => RecommenderError::Timeout(self.timeout).to_string(),
            }
        };

        tracing::warn!(
            recommender = recommender.name(),
            %reason,
            "recommender failed, using rule-based matching"
        );
        Recommendation {
            mapping: self.recommend_rule_based(input, reference),
            source: MappingSource::RuleBased { reason: Some(reason) },
        }
    }

    /// Deterministic greedy matching on name similarity.
    ///
    /// Pairs scoring at least `min_score` (inclusive, so a pair scoring
    /// exactly the threshold is kept) are considered best first; ties go to
    /// the lexically smaller source, then target.
    pub fn recommend_rule_based(&self, input: &StructureDescriptor, reference: &StructureDescriptor) -> MappingSet {
        let mut pairs: Vec<(u8, MatchTier, &FieldDescriptor, &FieldDescriptor)> = Vec::new();
        for source in input.fields() {
            for target in reference.fields() {
                let (score, tier) = similarity::score_with_tier(&source.name, &target.name);
                if score >= self.min_score {
                    pairs.push((score, tier, source, target));
                }
            }
        }

        pairs.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| a.2.name.cmp(&b.2.name))
                .then_with(|| a.3.name.cmp(&b.3.name))
        });

        let mut assigned_sources = std::collections::HashSet::new();
        let mut assigned_targets = std::collections::HashSet::new();
        let mut candidates = Vec::new();

        for (score, tier, source, target) in pairs {
            if assigned_sources.contains(&source.name) || assigned_targets.contains(&target.name) {
                continue;
            }
            assigned_sources.insert(&source.name);
            assigned_targets.insert(&target.name);

            let kind = transformation_kind(source, target);
            candidates.push(
                MappingCandidate::new(&source.name, &target.name, score, kind)
                    .with_rationale(rationale(score, tier, source, target, kind)),
            );
        }

        MappingSet::from_candidates(candidates, input, reference)
    }
}

/// How a source value should become a target value, from the inferred types.
///
/// - same type: `none`, or `rename` for text fields whose names differ
/// - different known types: `convert`
/// - target type unknown: treated as text, so `none`/`rename`
/// - source type unknown with a typed target: `custom`
pub fn transformation_kind(source: &FieldDescriptor, target: &FieldDescriptor) -> TransformationKind {
    let renamed = source.name != target.name;
    match (source.inferred_type, target.inferred_type) {
        (_, InferredType::Unknown) | (InferredType::String, InferredType::String) => {
            if renamed {
                TransformationKind::Rename
            } else {
                TransformationKind::None
            }
        }
        (InferredType::Unknown, _) => TransformationKind::Custom,
        (s, t) if s == t => TransformationKind::None,
        _ => TransformationKind::Convert,
    }
}

fn rationale(
    score: u8,
    tier: MatchTier,
    source: &FieldDescriptor,
    target: &FieldDescriptor,
    kind: TransformationKind,
) -> String {
    let mut text = format!("{} ({})", tier, score);
    if kind == TransformationKind::Convert {
        text.push_str(&format!(
            "; convert {} to {}",
            source.inferred_type, target.inferred_type
        ));
    }
    text
}

/// Keep only candidates naming real fields, clamp confidences and resolve
/// duplicates in favour of the most confident candidate.
fn sanitize(
    candidates: Vec<MappingCandidate>,
    input: &StructureDescriptor,
    reference: &StructureDescriptor,
) -> MappingSet {
    let total = candidates.len();
    let kept: Vec<MappingCandidate> = candidates
        .into_iter()
        .filter(|c| input.field(&c.source_field).is_some() && reference.field(&c.target_field).is_some())
        .map(|mut c| {
            c.confidence = c.confidence.min(100);
            c
        })
        .collect();

    if kept.len() < total {
        tracing::debug!(dropped = total - kept.len(), "dropped recommender candidates naming unknown fields");
    }
    MappingSet::from_candidates(kept, input, reference)
}
