use async_trait::async_trait;

use crate::error::RecommenderResult;
use crate::models::{MappingCandidate, StructureDescriptor};

/// External mapping recommender (for example a language model).
///
/// Advisory only: the mapping engine bounds every call with a timeout and
/// falls back to rule-based matching on any error or panic.
#[async_trait]
pub trait Recommender: Send + Sync {
    /// Name used in logs and rationales.
    fn name(&self) -> &str {
        "recommender"
    }

    /// Whether the recommender can be called at all (for example, whether
    /// credentials are configured).
    fn is_available(&self) -> bool {
        true
    }

    /// Propose candidates for mapping `input` onto `reference`.
    async fn suggest(
        &self,
        input: &StructureDescriptor,
        reference: &StructureDescriptor,
    ) -> RecommenderResult<Vec<MappingCandidate>>;
}
