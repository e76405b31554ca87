//! Mapping recommendation.
//!
//! - Similarity: tiered field-name scoring
//! - Engine: greedy one-to-one matching, recommender consultation with fallback
//! - Recommender: the pluggable external recommender interface

pub mod engine;
pub mod recommender;
pub mod similarity;

pub use engine::{transformation_kind, MappingEngine, MappingSource, Recommendation};
pub use recommender::Recommender;
pub use similarity::{score, score_with_tier, MatchTier};
