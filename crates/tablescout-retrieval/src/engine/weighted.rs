//! Weighted retrieval for RetrievalEngine.

use super::RetrievalEngine;
use crate::error::Result;
use crate::feedback::{NEUTRAL_WEIGHT, column_weight_map, table_weight_map};
use crate::results::{SearchResults, WeightedColumn, WeightedTable, by_score_desc};
use std::time::Instant;
use tablescout_index::Tenant;
use tokio_util::sync::CancellationToken;
use tracing::info;

impl RetrievalEngine {
    /// Tables ranked by `similarity × table_weight`, at most `limit`.
    ///
    /// Tables without feedback use the neutral weight 1.0.
    pub async fn search_tables_weighted(
        &self,
        tenant: &Tenant,
        question: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<SearchResults<WeightedTable>> {
        let start = Instant::now();
        let candidates = self.search_tables(tenant, question, limit, cancel).await?;
        let weights = table_weight_map(&self.backend, "search_tables", tenant, cancel).await?;

        let mut results: Vec<WeightedTable> = candidates
            .into_iter()
            .map(|candidate| {
                let weight = weights
                    .get(&candidate.table_name)
                    .copied()
                    .unwrap_or(NEUTRAL_WEIGHT);
                WeightedTable {
                    final_score: candidate.similarity * weight,
                    table_name: candidate.table_name,
                    similarity: candidate.similarity,
                    weight,
                    attributes: candidate.attributes,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            by_score_desc(a.final_score, b.final_score)
                .then_with(|| by_score_desc(a.similarity, b.similarity))
                .then_with(|| a.table_name.cmp(&b.table_name))
        });
        results.truncate(limit);

        let search_time = start.elapsed().as_millis() as u64;
        info!(
            query = %question,
            tenant = %tenant,
            results = results.len(),
            weighted = weights.len(),
            time_ms = search_time,
            "Table search completed"
        );
        Ok(SearchResults::new(
            question.to_string(),
            tenant.clone(),
            results,
            search_time,
        ))
    }

    /// Columns ranked by `similarity × table_weight × column_weight`.
    pub async fn search_columns_weighted(
        &self,
        tenant: &Tenant,
        question: &str,
        table_name: Option<&str>,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<SearchResults<WeightedColumn>> {
        let start = Instant::now();
        let candidates = self
            .search_columns(tenant, question, table_name, limit, cancel)
            .await?;
        let table_weights =
            table_weight_map(&self.backend, "search_columns", tenant, cancel).await?;
        let column_weights =
            column_weight_map(&self.backend, "search_columns", tenant, table_name, cancel).await?;

        let mut results: Vec<WeightedColumn> = candidates
            .into_iter()
            .map(|candidate| {
                let table_weight = table_weights
                    .get(&candidate.table_name)
                    .copied()
                    .unwrap_or(NEUTRAL_WEIGHT);
                let column_weight = column_weights
                    .get(&(candidate.table_name.clone(), candidate.column_name.clone()))
                    .copied()
                    .unwrap_or(NEUTRAL_WEIGHT);
                WeightedColumn {
                    final_score: candidate.similarity * table_weight * column_weight,
                    table_name: candidate.table_name,
                    column_name: candidate.column_name,
                    similarity: candidate.similarity,
                    table_weight,
                    column_weight,
                    attributes: candidate.attributes,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            by_score_desc(a.final_score, b.final_score)
                .then_with(|| by_score_desc(a.similarity, b.similarity))
                .then_with(|| a.table_name.cmp(&b.table_name))
                .then_with(|| a.column_name.cmp(&b.column_name))
        });
        results.truncate(limit);

        let search_time = start.elapsed().as_millis() as u64;
        info!(
            query = %question,
            tenant = %tenant,
            table = ?table_name,
            results = results.len(),
            time_ms = search_time,
            "Column search completed"
        );
        Ok(SearchResults::new(
            question.to_string(),
            tenant.clone(),
            results,
            search_time,
        ))
    }
}
