//! Raw semantic search for RetrievalEngine.

use super::{RetrievalEngine, validate_search};
use crate::backend::Access;
use crate::error::Result;
use crate::results::{ColumnMatch, TableMatch, by_score_desc};
use tablescout_index::{Collection, EntryAttributes, Tenant, VectorFilter, VectorIndex, distance_to_similarity};
use tokio_util::sync::CancellationToken;
use tracing::debug;

impl RetrievalEngine {
    /// Embed `question` and return table candidates ordered by similarity.
    ///
    /// Over-fetches `limit × candidate_multiplier` (capped at `max_candidates`)
    /// so a re-ranking step has room to promote lower-similarity tables.
    pub async fn search_tables(
        &self,
        tenant: &Tenant,
        question: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<TableMatch>> {
        const OP: &str = "search_tables";
        validate_search(OP, tenant, question, limit)?;

        let vector = self.backend.embed(OP, tenant, question, cancel).await?;
        let top_k = self.backend.config().candidate_count(limit);
        let filter = VectorFilter::tenant(tenant);

        let hits = self
            .backend
            .store_call(OP, tenant, cancel, Access::Read, move |store| {
                store.query(Collection::Tables, &vector, top_k, &filter)
            })
            .await?;

        let mut matches: Vec<TableMatch> = hits
            .into_iter()
            .filter_map(|hit| match hit.attributes {
                EntryAttributes::Table(attributes) => Some(TableMatch {
                    entity_id: hit.id,
                    table_name: attributes.table_name.clone(),
                    similarity: f64::from(distance_to_similarity(hit.distance)),
                    document: hit.document,
                    attributes,
                }),
                other => {
                    debug!(id = %hit.id, kind = ?other.collection(), "Skipping non-table hit");
                    None
                }
            })
            .collect();
        matches.sort_by(|a, b| by_score_desc(a.similarity, b.similarity));

        debug!(tenant = %tenant, top_k, candidates = matches.len(), "Table search");
        Ok(matches)
    }

    /// Embed `question` and return column candidates ordered by similarity,
    /// optionally restricted to one table.
    pub async fn search_columns(
        &self,
        tenant: &Tenant,
        question: &str,
        table_name: Option<&str>,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<ColumnMatch>> {
        const OP: &str = "search_columns";
        validate_search(OP, tenant, question, limit)?;

        let vector = self.backend.embed(OP, tenant, question, cancel).await?;
        let top_k = self.backend.config().candidate_count(limit);
        let mut filter = VectorFilter::tenant(tenant);
        if let Some(table) = table_name {
            filter = filter.with_table(table);
        }

        let hits = self
            .backend
            .store_call(OP, tenant, cancel, Access::Read, move |store| {
                store.query(Collection::Columns, &vector, top_k, &filter)
            })
            .await?;

        let mut matches: Vec<ColumnMatch> = hits
            .into_iter()
            .filter_map(|hit| match hit.attributes {
                EntryAttributes::Column(attributes) => Some(ColumnMatch {
                    entity_id: hit.id,
                    table_name: attributes.table_name.clone(),
                    column_name: attributes.column_name.clone(),
                    similarity: f64::from(distance_to_similarity(hit.distance)),
                    document: hit.document,
                    attributes,
                }),
                other => {
                    debug!(id = %hit.id, kind = ?other.collection(), "Skipping non-column hit");
                    None
                }
            })
            .collect();
        matches.sort_by(|a, b| by_score_desc(a.similarity, b.similarity));

        debug!(
            tenant = %tenant,
            table = ?table_name,
            top_k,
            candidates = matches.len(),
            "Column search"
        );
        Ok(matches)
    }
}
