use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tablescout_index::{ColumnAttributes, TableAttributes, Tenant};

/// Raw semantic match for a table (no weighting applied).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMatch {
    pub entity_id: String,
    pub table_name: String,
    /// Always within `[0, 1]`.
    pub similarity: f64,
    pub document: String,
    pub attributes: TableAttributes,
}

/// Raw semantic match for a column (no weighting applied).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMatch {
    pub entity_id: String,
    pub table_name: String,
    pub column_name: String,
    pub similarity: f64,
    pub document: String,
    pub attributes: ColumnAttributes,
}

/// A table ranked by `similarity × weight`.
///
/// Both scores are exposed so callers can tell "semantically relevant" from
/// "historically trusted".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedTable {
    pub table_name: String,
    pub similarity: f64,
    pub weight: f64,
    pub final_score: f64,
    pub attributes: TableAttributes,
}

/// A column ranked by `similarity × table_weight × column_weight`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedColumn {
    pub table_name: String,
    pub column_name: String,
    pub similarity: f64,
    pub table_weight: f64,
    pub column_weight: f64,
    pub final_score: f64,
    pub attributes: ColumnAttributes,
}

impl WeightedColumn {
    /// Combined multiplier applied on top of similarity.
    pub fn weight(&self) -> f64 {
        self.table_weight * self.column_weight
    }
}

/// Ranked results of one search call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults<T> {
    pub query: String,
    pub tenant: Tenant,
    pub results: Vec<T>,
    pub total_count: usize,
    pub search_time_ms: u64,
}

impl<T> SearchResults<T> {
    pub fn new(query: String, tenant: Tenant, results: Vec<T>, search_time_ms: u64) -> Self {
        let total_count = results.len();
        Self {
            query,
            tenant,
            results,
            total_count,
            search_time_ms,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Descending comparison; NaN compares equal.
pub(crate) fn by_score_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_results_new() {
        let results = SearchResults::new(
            "orders".to_string(),
            Tenant::new("DB", "S"),
            vec![1, 2, 3],
            4,
        );
        assert_eq!(results.total_count, 3);
        assert!(!results.is_empty());
    }

    #[test]
    fn test_by_score_desc() {
        let mut scores = vec![0.2, 0.9, 0.5];
        scores.sort_by(|a, b| by_score_desc(*a, *b));
        assert_eq!(scores[0], 0.9);
    }

    #[test]
    fn test_weighted_column_weight() {
        let column = WeightedColumn {
            table_name: "ORDERS".to_string(),
            column_name: "AMOUNT".to_string(),
            similarity: 0.8,
            table_weight: 1.2,
            column_weight: 0.5,
            final_score: 0.48,
            attributes: ColumnAttributes::default(),
        };
        assert!((column.weight() - 0.6).abs() < 1e-12);
    }
}
