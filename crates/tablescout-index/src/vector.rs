//! Vector Index Adapter contract.

use crate::error::Result;
use crate::schema::{Collection, StoredEntry, VectorEntry, VectorFilter, VectorHit};

/// Tenant-aware approximate-nearest-neighbor store.
///
/// Every query and delete takes a [`VectorFilter`]; implementations must
/// reject a filter without a scoped tenant with `StoreError::TenantNotScoped`.
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the entry with `entry.id` in the collection implied by its attributes.
    fn upsert(&self, entry: &VectorEntry) -> Result<()>;

    /// Return up to `top_k` entries closest to `vector`, nearest first.
    fn query(
        &self,
        collection: Collection,
        vector: &[f32],
        top_k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorHit>>;

    /// Delete every entry matching the filter, returning how many were removed.
    fn delete(&self, collection: Collection, filter: &VectorFilter) -> Result<usize>;

    /// Non-KNN listing of entries matching the filter, ordered by id.
    fn list(&self, collection: Collection, filter: &VectorFilter) -> Result<Vec<StoredEntry>>;
}

/// Convert an L2 distance between unit vectors into a similarity in `[0, 1]`.
///
/// `similarity = max(0, 1 - distance / 2)`. This is the only conversion used
/// anywhere in the workspace so scores stay comparable across components.
pub fn distance_to_similarity(distance: f32) -> f32 {
    if !distance.is_finite() {
        return 0.0;
    }
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_to_similarity_bounds() {
        assert_eq!(distance_to_similarity(0.0), 1.0);
        assert!((distance_to_similarity(0.2) - 0.9).abs() < 1e-6);
        assert_eq!(distance_to_similarity(2.0), 0.0);
        assert_eq!(distance_to_similarity(3.5), 0.0);
        assert_eq!(distance_to_similarity(f32::NAN), 0.0);
        // Negative distances cannot occur, but must not exceed 1
        assert_eq!(distance_to_similarity(-0.5), 1.0);
    }
}
