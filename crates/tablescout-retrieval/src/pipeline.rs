//! Two-stage retrieval in front of the external SQL generator.
//!
//! Stage 1 finds candidate tables for a question, ranked by weighted score.
//! Stage 2 expands the tables the caller picked into full attribute records.
//! The number of tables handed to the generator is capped; exceeding the cap
//! is an error so the caller narrows the selection explicitly.

use crate::backend::Backend;
use crate::engine::RetrievalEngine;
use crate::error::{Error, Result};
use crate::indexer::{get_table, list_columns};
use crate::patterns::{PatternEngine, PatternMatch};
use crate::results::{SearchResults, WeightedTable};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tablescout_index::{ColumnAttributes, EntryAttributes, TableAttributes, Tenant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Full record of one selected table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDetail {
    pub table_name: String,
    /// Summary text the table was embedded with.
    pub document: String,
    pub attributes: TableAttributes,
    pub columns: Vec<ColumnAttributes>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage2Result {
    pub tables: Vec<TableDetail>,
    /// Selected tables that are not indexed for the tenant.
    pub missing: Vec<String>,
}

/// A reusable pattern, if any, plus Stage 1 candidates to fall back on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalPlan {
    pub pattern: Option<PatternMatch>,
    pub candidates: SearchResults<WeightedTable>,
}

#[derive(Clone)]
pub struct Pipeline {
    engine: RetrievalEngine,
    patterns: PatternEngine,
}

impl Pipeline {
    pub fn new(backend: Backend) -> Self {
        Self {
            engine: RetrievalEngine::new(backend.clone()),
            patterns: PatternEngine::new(backend),
        }
    }

    fn backend(&self) -> &Backend {
        self.engine.backend()
    }

    /// Up to `stage1_limit` tables by `similarity × weight`, exposing both the
    /// raw similarity and the final score.
    pub async fn stage1(
        &self,
        tenant: &Tenant,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<SearchResults<WeightedTable>> {
        let limit = self.backend().config().stage1_limit;
        self.engine
            .search_tables_weighted(tenant, question, limit, cancel)
            .await
    }

    /// Attribute records and columns of the selected tables.
    ///
    /// Duplicate names count once. More than `stage2_max_tables` distinct
    /// tables is rejected with [`Error::TooManyTables`]; tables that are not
    /// indexed are reported in `missing`.
    pub async fn stage2(
        &self,
        tenant: &Tenant,
        tables: &[String],
        cancel: &CancellationToken,
    ) -> Result<Stage2Result> {
        const OP: &str = "stage2";
        if !tenant.is_scoped() {
            return Err(Error::TenantNotScoped { operation: OP });
        }
        let mut seen = HashSet::new();
        let selected: Vec<&String> = tables
            .iter()
            .filter(|t| !t.trim().is_empty())
            .filter(|t| seen.insert(t.as_str()))
            .collect();
        if selected.is_empty() {
            return Err(Error::invalid(OP, "no tables selected"));
        }
        let max = self.backend().config().stage2_max_tables;
        if selected.len() > max {
            return Err(Error::TooManyTables {
                operation: OP,
                tenant: tenant.to_string(),
                requested: selected.len(),
                max,
            });
        }

        let mut result = Stage2Result::default();
        for table_name in selected {
            let entry = get_table(self.backend(), OP, tenant, table_name, cancel).await?;
            let Some(entry) = entry else {
                result.missing.push(table_name.clone());
                continue;
            };
            let EntryAttributes::Table(attributes) = entry.attributes else {
                warn!(id = %entry.id, "Table entry carries non-table attributes");
                result.missing.push(table_name.clone());
                continue;
            };
            let columns = list_columns(self.backend(), OP, tenant, table_name, cancel).await?;
            result.tables.push(TableDetail {
                table_name: table_name.clone(),
                document: entry.document,
                attributes,
                columns,
            });
        }

        info!(
            tenant = %tenant,
            tables = result.tables.len(),
            missing = result.missing.len(),
            "Stage 2 expanded"
        );
        Ok(result)
    }

    /// Look for a reusable pattern and always compute Stage 1 alongside it.
    pub async fn plan(
        &self,
        tenant: &Tenant,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<RetrievalPlan> {
        let pattern = self.patterns.find_similar(tenant, question, cancel).await?;
        let candidates = self.stage1(tenant, question, cancel).await?;
        Ok(RetrievalPlan {
            pattern,
            candidates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::feedback::{FeedbackService, NewGeneration, NewResponse};
    use crate::indexer::{ColumnMetadata, MetadataIndexer, TableMetadata};
    use crate::patterns::LearnRequest;
    use crate::testing::{at_similarity, fixture, fixture_with, tenant_a};
    use tablescout_index::FeedbackAction;

    fn table(name: &str, columns: &[&str]) -> TableMetadata {
        TableMetadata {
            table_name: name.to_string(),
            columns: columns
                .iter()
                .map(|c| ColumnMetadata {
                    column_name: c.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn names(tables: &[&str]) -> Vec<String> {
        tables.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn test_stage2_returns_details_and_missing() {
        let fx = fixture();
        let pipeline = Pipeline::new(fx.backend.clone());
        let indexer = MetadataIndexer::new(fx.backend.clone());
        let cancel = CancellationToken::new();
        let tenant = tenant_a();

        indexer
            .index_table(&tenant, &table("ORDERS", &["ORDER_ID", "STATUS"]), &cancel)
            .await
            .unwrap();

        let result = pipeline
            .stage2(&tenant, &names(&["ORDERS", "GHOST", "ORDERS"]), &cancel)
            .await
            .unwrap();
        assert_eq!(result.tables.len(), 1);
        assert_eq!(result.tables[0].columns.len(), 2);
        assert_eq!(result.tables[0].attributes.column_count, 2);
        assert_eq!(result.missing, vec!["GHOST".to_string()]);
    }

    #[tokio::test]
    async fn test_stage2_cap_is_a_hard_error() {
        let fx = fixture();
        let pipeline = Pipeline::new(fx.backend.clone());
        let cancel = CancellationToken::new();

        let err = pipeline
            .stage2(&tenant_a(), &names(&["A", "B", "C", "D", "E", "F"]), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TooManyTables {
                requested: 6,
                max: 5,
                ..
            }
        ));

        let err = pipeline.stage2(&tenant_a(), &[], &cancel).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));

        // Five distinct tables are fine even when none is indexed
        let result = pipeline
            .stage2(&tenant_a(), &names(&["A", "B", "C", "D", "E", "E"]), &cancel)
            .await
            .unwrap();
        assert_eq!(result.missing.len(), 5);
    }

    #[tokio::test]
    async fn test_stage1_applies_weights_and_limit() {
        let fx = fixture_with(RetrievalConfig {
            stage1_limit: 2,
            ..Default::default()
        });
        let pipeline = Pipeline::new(fx.backend.clone());
        let feedback = FeedbackService::new(fx.backend.clone());
        let cancel = CancellationToken::new();
        let tenant = tenant_a();

        fx.embedder.set("주문 조회", [1.0, 0.0, 0.0, 0.0]);
        fx.add_table(&tenant, "ORDERS", at_similarity(0.95));
        fx.add_table(&tenant, "ORDER_ITEMS", at_similarity(0.90));
        fx.add_table(&tenant, "CUSTOMERS", at_similarity(0.60));

        for _ in 0..5 {
            let id = feedback
                .record_generation(
                    NewGeneration {
                        tenant: tenant.clone(),
                        user_query: "주문 품목".to_string(),
                        selected_table: "ORDER_ITEMS".to_string(),
                        selected_columns: Vec::new(),
                        generated_sql: "SELECT * FROM ORDER_ITEMS".to_string(),
                        created_by: "tester".to_string(),
                    },
                    &cancel,
                )
                .await
                .unwrap();
            feedback
                .record_response(
                    &id,
                    NewResponse {
                        action: FeedbackAction::Approve,
                        suggestion: None,
                        user_confidence: 1.0,
                    },
                    &cancel,
                )
                .await
                .unwrap();
        }
        feedback.recompute_weights(&tenant, &cancel).await.unwrap();

        let stage1 = pipeline.stage1(&tenant, "주문 조회", &cancel).await.unwrap();
        assert_eq!(stage1.results.len(), 2);
        assert_eq!(stage1.results[0].table_name, "ORDER_ITEMS");
        assert!(stage1.results[0].similarity < stage1.results[1].similarity);
        assert!(stage1.results[0].final_score > stage1.results[1].final_score);
        assert_eq!(stage1.results[1].weight, 1.0);
    }

    #[tokio::test]
    async fn test_plan_returns_pattern_and_candidates() {
        let fx = fixture();
        let pipeline = Pipeline::new(fx.backend.clone());
        let patterns = PatternEngine::new(fx.backend.clone());
        let cancel = CancellationToken::new();
        let tenant = tenant_a();

        fx.embedder.set("최근 주문 조회", [1.0, 0.0, 0.0, 0.0]);
        fx.add_table(&tenant, "ORDERS", at_similarity(0.9));

        let empty = pipeline.plan(&tenant, "최근 주문 조회", &cancel).await.unwrap();
        assert!(empty.pattern.is_none());
        assert_eq!(empty.candidates.results.len(), 1);

        patterns
            .learn(
                LearnRequest {
                    tenant: tenant.clone(),
                    question: "최근 주문 조회".to_string(),
                    sql: "SELECT * FROM ORDERS".to_string(),
                    tables_used: names(&["ORDERS"]),
                    success: true,
                    execution_time_ms: Some(12.0),
                    row_count: Some(3),
                    user_rating: None,
                },
                &cancel,
            )
            .await
            .unwrap();

        let plan = pipeline.plan(&tenant, "최근 주문 조회", &cancel).await.unwrap();
        let pattern = plan.pattern.unwrap();
        assert_eq!(pattern.pattern.sql, "SELECT * FROM ORDERS");
        assert_eq!(plan.candidates.results[0].table_name, "ORDERS");
    }
}
