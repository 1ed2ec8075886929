//! Tests for RetrievalEngine.

use super::*;
use crate::config::RetrievalConfig;
use crate::testing::{at_similarity, fixture, fixture_with, tenant_a, tenant_b};
use tablescout_index::ColumnWeight;
use tablescout_index::TableWeight;
use tokio_util::sync::CancellationToken;

const QUESTION: &str = "최근 주문 조회";

fn table_weight(tenant: &Tenant, table: &str, weight: f64) -> TableWeight {
    TableWeight {
        tenant: tenant.clone(),
        table_name: table.to_string(),
        approval_count: 0,
        rejection_count: 0,
        modify_count: 0,
        total_feedback: 1,
        average_confidence: 0.0,
        calculated_weight: weight,
        last_updated: 0,
    }
}

fn column_weight(tenant: &Tenant, table: &str, column: &str, weight: f64) -> ColumnWeight {
    ColumnWeight {
        tenant: tenant.clone(),
        table_name: table.to_string(),
        column_name: column.to_string(),
        approval_count: 0,
        rejection_count: 0,
        modify_count: 0,
        frequency: 1,
        average_confidence: 0.0,
        calculated_weight: weight,
        last_updated: 0,
    }
}

#[tokio::test]
async fn test_search_tables_sorted_by_similarity() {
    let fx = fixture();
    let engine = RetrievalEngine::new(fx.backend.clone());
    let tenant = tenant_a();

    fx.embedder.set(QUESTION, [1.0, 0.0, 0.0, 0.0]);
    fx.add_table(&tenant, "CUSTOMERS", at_similarity(0.60));
    fx.add_table(&tenant, "ORDERS", at_similarity(0.95));
    fx.add_table(&tenant, "ORDER_ITEMS", at_similarity(0.80));

    let matches = engine
        .search_tables(&tenant, QUESTION, 10, &CancellationToken::new())
        .await
        .unwrap();

    let names: Vec<&str> = matches.iter().map(|m| m.table_name.as_str()).collect();
    assert_eq!(names, vec!["ORDERS", "ORDER_ITEMS", "CUSTOMERS"]);
    assert!((matches[0].similarity - 0.95).abs() < 1e-3);
    assert_eq!(matches[0].entity_id, "SMVNPDB.INFINITY21_JSMES.ORDERS");
    for m in &matches {
        assert!((0.0..=1.0).contains(&m.similarity));
    }
}

#[tokio::test]
async fn test_similarity_is_clamped_for_opposite_vectors() {
    let fx = fixture();
    let engine = RetrievalEngine::new(fx.backend.clone());
    let tenant = tenant_a();

    fx.embedder.set(QUESTION, [1.0, 0.0, 0.0, 0.0]);
    fx.add_table(&tenant, "OPPOSITE", [-1.0, 0.0, 0.0, 0.0]);

    let matches = engine
        .search_tables(&tenant, QUESTION, 5, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].similarity, 0.0);
}

#[tokio::test]
async fn test_search_is_tenant_isolated() {
    let fx = fixture();
    let engine = RetrievalEngine::new(fx.backend.clone());
    let cancel = CancellationToken::new();

    fx.embedder.set(QUESTION, [1.0, 0.0, 0.0, 0.0]);
    fx.add_table(&tenant_a(), "ORDERS", at_similarity(0.70));
    // Closer to the question, but another tenant
    fx.add_table(&tenant_b(), "SECRET_ORDERS", [1.0, 0.0, 0.0, 0.0]);
    fx.add_column(&tenant_b(), "SECRET_ORDERS", "AMOUNT", [1.0, 0.0, 0.0, 0.0]);

    let tables = engine
        .search_tables(&tenant_a(), QUESTION, 10, &cancel)
        .await
        .unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].table_name, "ORDERS");

    let columns = engine
        .search_columns(&tenant_a(), QUESTION, None, 10, &cancel)
        .await
        .unwrap();
    assert!(columns.is_empty());
}

#[tokio::test]
async fn test_search_columns_table_filter() {
    let fx = fixture();
    let engine = RetrievalEngine::new(fx.backend.clone());
    let tenant = tenant_a();
    let cancel = CancellationToken::new();

    fx.embedder.set(QUESTION, [1.0, 0.0, 0.0, 0.0]);
    fx.add_column(&tenant, "ORDERS", "ORDER_DATE", at_similarity(0.9));
    fx.add_column(&tenant, "ORDERS", "STATUS", at_similarity(0.7));
    fx.add_column(&tenant, "INVOICES", "ISSUE_DATE", at_similarity(0.95));

    let all = engine
        .search_columns(&tenant, QUESTION, None, 10, &cancel)
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].column_name, "ISSUE_DATE");

    let orders = engine
        .search_columns(&tenant, QUESTION, Some("ORDERS"), 10, &cancel)
        .await
        .unwrap();
    let names: Vec<&str> = orders.iter().map(|c| c.column_name.as_str()).collect();
    assert_eq!(names, vec!["ORDER_DATE", "STATUS"]);
}

#[tokio::test]
async fn test_candidate_count_is_capped() {
    let fx = fixture_with(RetrievalConfig {
        max_candidates: 3,
        ..Default::default()
    });
    let engine = RetrievalEngine::new(fx.backend.clone());
    let tenant = tenant_a();

    fx.embedder.set(QUESTION, [1.0, 0.0, 0.0, 0.0]);
    for i in 0..6 {
        fx.add_table(&tenant, &format!("T{i}"), at_similarity(0.5 + 0.05 * i as f32));
    }

    // limit 2 over-fetches 4, capped at 3
    let raw = engine
        .search_tables(&tenant, QUESTION, 2, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(raw.len(), 3);
    assert_eq!(raw[0].table_name, "T5");
}

#[tokio::test]
async fn test_weighted_search_promotes_trusted_table() {
    let fx = fixture();
    let engine = RetrievalEngine::new(fx.backend.clone());
    let tenant = tenant_a();

    fx.embedder.set(QUESTION, [1.0, 0.0, 0.0, 0.0]);
    fx.add_table(&tenant, "ORDERS_OLD", at_similarity(0.90));
    fx.add_table(&tenant, "ORDERS", at_similarity(0.80));
    fx.add_table(&tenant, "CUSTOMERS", at_similarity(0.70));
    fx.store
        .replace_weight_snapshot(
            &tenant,
            &[
                table_weight(&tenant, "ORDERS", 1.5),
                table_weight(&tenant, "ORDERS_OLD", 0.2),
            ],
            &[],
        )
        .unwrap();

    let results = engine
        .search_tables_weighted(&tenant, QUESTION, 3, &CancellationToken::new())
        .await
        .unwrap();

    let names: Vec<&str> = results.results.iter().map(|r| r.table_name.as_str()).collect();
    assert_eq!(names, vec!["ORDERS", "CUSTOMERS", "ORDERS_OLD"]);
    assert_eq!(results.total_count, 3);
    assert_eq!(results.tenant, tenant);

    let orders = &results.results[0];
    assert_eq!(orders.weight, 1.5);
    assert!((orders.final_score - orders.similarity * 1.5).abs() < 1e-12);

    // No feedback means the neutral weight
    let customers = &results.results[1];
    assert_eq!(customers.weight, 1.0);
    assert_eq!(customers.final_score, customers.similarity);
}

#[tokio::test]
async fn test_weighted_search_truncates_after_reranking() {
    let fx = fixture();
    let engine = RetrievalEngine::new(fx.backend.clone());
    let tenant = tenant_a();

    fx.embedder.set(QUESTION, [1.0, 0.0, 0.0, 0.0]);
    fx.add_table(&tenant, "A", at_similarity(0.90));
    fx.add_table(&tenant, "B", at_similarity(0.85));
    fx.store
        .replace_weight_snapshot(&tenant, &[table_weight(&tenant, "B", 1.4)], &[])
        .unwrap();

    // Raw search would return A first; the over-fetch lets B win the single slot
    let results = engine
        .search_tables_weighted(&tenant, QUESTION, 1, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(results.results.len(), 1);
    assert_eq!(results.results[0].table_name, "B");
}

#[tokio::test]
async fn test_weighted_columns_multiply_both_weights() {
    let fx = fixture();
    let engine = RetrievalEngine::new(fx.backend.clone());
    let tenant = tenant_a();

    fx.embedder.set(QUESTION, [1.0, 0.0, 0.0, 0.0]);
    fx.add_column(&tenant, "ORDERS", "ORDER_DATE", at_similarity(0.80));
    fx.add_column(&tenant, "ORDERS", "CREATED_AT", at_similarity(0.85));
    fx.store
        .replace_weight_snapshot(
            &tenant,
            &[table_weight(&tenant, "ORDERS", 1.2)],
            &[column_weight(&tenant, "ORDERS", "ORDER_DATE", 1.3)],
        )
        .unwrap();

    let results = engine
        .search_columns_weighted(&tenant, QUESTION, Some("ORDERS"), 5, &CancellationToken::new())
        .await
        .unwrap();

    let top = &results.results[0];
    assert_eq!(top.column_name, "ORDER_DATE");
    assert_eq!(top.table_weight, 1.2);
    assert_eq!(top.column_weight, 1.3);
    assert!((top.weight() - 1.56).abs() < 1e-12);
    assert!((top.final_score - top.similarity * 1.2 * 1.3).abs() < 1e-12);

    let other = &results.results[1];
    assert_eq!(other.column_weight, 1.0);
    assert!((other.final_score - other.similarity * 1.2).abs() < 1e-12);
}

#[tokio::test]
async fn test_invalid_search_requests() {
    let fx = fixture();
    let engine = RetrievalEngine::new(fx.backend.clone());
    let cancel = CancellationToken::new();

    let err = engine
        .search_tables(&Tenant::new("", "S"), QUESTION, 5, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TenantNotScoped { operation: "search_tables" }));

    let err = engine
        .search_tables(&tenant_a(), QUESTION, 0, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest { .. }));

    let err = engine
        .search_columns_weighted(&tenant_a(), "  ", None, 5, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest { .. }));
}

#[tokio::test]
async fn test_cancelled_search() {
    let fx = fixture();
    let engine = RetrievalEngine::new(fx.backend.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = engine
        .search_tables(&tenant_a(), QUESTION, 5, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled { .. }));
}
