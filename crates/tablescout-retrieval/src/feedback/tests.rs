//! Tests for FeedbackService.

use super::*;
use crate::testing::{fixture, tenant_a, tenant_b};

fn generation(tenant: &Tenant, table: &str, columns: &[&str]) -> NewGeneration {
    NewGeneration {
        tenant: tenant.clone(),
        user_query: "최근 주문 조회".to_string(),
        selected_table: table.to_string(),
        selected_columns: columns.iter().map(|c| c.to_string()).collect(),
        generated_sql: format!("SELECT * FROM {table}"),
        created_by: "tester".to_string(),
    }
}

fn response(action: FeedbackAction, confidence: f64) -> NewResponse {
    NewResponse {
        action,
        suggestion: None,
        user_confidence: confidence,
    }
}

async fn record(
    service: &FeedbackService,
    tenant: &Tenant,
    table: &str,
    columns: &[&str],
    action: Option<(FeedbackAction, f64)>,
) -> String {
    let cancel = CancellationToken::new();
    let id = service
        .record_generation(generation(tenant, table, columns), &cancel)
        .await
        .unwrap();
    if let Some((action, confidence)) = action {
        service
            .record_response(&id, response(action, confidence), &cancel)
            .await
            .unwrap();
    }
    id
}

#[tokio::test]
async fn test_feedback_lifecycle() {
    let fx = fixture();
    let service = FeedbackService::new(fx.backend.clone());
    let cancel = CancellationToken::new();

    let id = service
        .record_generation(generation(&tenant_a(), "ORDERS", &["ID"]), &cancel)
        .await
        .unwrap();
    assert!(id.starts_with("fb_"));

    let first = service
        .record_response(&id, response(FeedbackAction::Approve, 0.9), &cancel)
        .await
        .unwrap();
    assert_eq!(first, LedgerWrite::Inserted);

    let repeat = service
        .record_response(&id, response(FeedbackAction::Reject, 0.1), &cancel)
        .await
        .unwrap();
    assert_eq!(repeat, LedgerWrite::Duplicate);

    let execution = NewExecution {
        final_sql: "SELECT * FROM ORDERS".to_string(),
        status: ExecutionStatus::Success,
        row_count: 12,
        execution_time_ms: 35.5,
        error_message: None,
    };
    assert_eq!(
        service
            .record_execution(&id, execution, &cancel)
            .await
            .unwrap(),
        LedgerWrite::Inserted
    );

    let entry = fx.store.get_ledger_entry(&id).unwrap().unwrap();
    assert_eq!(entry.response.unwrap().action, FeedbackAction::Approve);
    assert_eq!(entry.execution.unwrap().row_count, 12);
}

#[tokio::test]
async fn test_feedback_ids_are_time_ordered() {
    let fx = fixture();
    let service = FeedbackService::new(fx.backend.clone());

    let first = record(&service, &tenant_a(), "ORDERS", &[], None).await;
    let second = record(&service, &tenant_a(), "ORDERS", &[], None).await;
    assert!(first < second);
}

#[tokio::test]
async fn test_response_without_generation_is_rejected() {
    let fx = fixture();
    let service = FeedbackService::new(fx.backend.clone());

    let err = service
        .record_response(
            "fb_missing",
            response(FeedbackAction::Approve, 0.5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownFeedbackId { operation: "record_response", .. }));
}

#[tokio::test]
async fn test_boundary_validation() {
    let fx = fixture();
    let service = FeedbackService::new(fx.backend.clone());
    let cancel = CancellationToken::new();

    let err = service
        .record_generation(generation(&Tenant::new("DB", ""), "ORDERS", &[]), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TenantNotScoped { .. }));

    let id = record(&service, &tenant_a(), "ORDERS", &[], None).await;
    let err = service
        .record_response(&id, response(FeedbackAction::Approve, 1.5), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest { .. }));
}

#[tokio::test]
async fn test_recompute_weight_example() {
    let fx = fixture();
    let service = FeedbackService::new(fx.backend.clone());
    let tenant = tenant_a();
    let cancel = CancellationToken::new();

    for action in [
        FeedbackAction::Approve,
        FeedbackAction::Approve,
        FeedbackAction::Approve,
        FeedbackAction::Reject,
    ] {
        record(&service, &tenant, "ORDERS", &["ORDER_ID"], Some((action, 0.8))).await;
    }

    service.recompute_weights(&tenant, &cancel).await.unwrap();

    let tables = service.get_table_weights(&tenant, &cancel).await.unwrap();
    assert!((tables["ORDERS"] - 0.89).abs() < 1e-9);

    let columns = service
        .get_column_weights(&tenant, "ORDERS", &cancel)
        .await
        .unwrap();
    assert!((columns["ORDER_ID"] - 0.97).abs() < 1e-9);

    // Other tenants see no weights
    assert!(
        service
            .get_table_weights(&tenant_b(), &cancel)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_table_weight_details_reports_counts() {
    let fx = fixture();
    let service = FeedbackService::new(fx.backend.clone());
    let tenant = tenant_a();
    let cancel = CancellationToken::new();

    record(&service, &tenant, "ORDERS", &["ORDER_ID"], Some((FeedbackAction::Approve, 0.8))).await;
    record(&service, &tenant, "ORDERS", &["STATUS"], Some((FeedbackAction::Reject, 0.8))).await;
    service.recompute_weights(&tenant, &cancel).await.unwrap();

    let tables = service.table_weight_details(&tenant, &cancel).await.unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].table_name, "ORDERS");
    assert_eq!(tables[0].approval_count, 1);
    assert_eq!(tables[0].rejection_count, 1);
    assert_eq!(tables, fx.store.get_table_weights(&tenant).unwrap());

    assert!(
        service
            .table_weight_details(&tenant_b(), &cancel)
            .await
            .unwrap()
            .is_empty()
    );
    let err = service
        .table_weight_details(&Tenant::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TenantNotScoped { .. }));
}

#[tokio::test]
async fn test_recompute_is_idempotent() {
    let fx = fixture();
    let service = FeedbackService::new(fx.backend.clone());
    let tenant = tenant_a();
    let cancel = CancellationToken::new();

    record(&service, &tenant, "ORDERS", &["ID"], Some((FeedbackAction::Approve, 0.7))).await;
    record(&service, &tenant, "CUSTOMERS", &["NAME"], Some((FeedbackAction::Modify, 0.3))).await;
    record(&service, &tenant, "ITEMS", &["SKU"], None).await;

    let first = service.recompute_weights(&tenant, &cancel).await.unwrap();
    let stored_first = fx.store.get_table_weights(&tenant).unwrap();
    let second = service.recompute_weights(&tenant, &cancel).await.unwrap();
    let stored_second = fx.store.get_table_weights(&tenant).unwrap();

    assert_eq!(first, second);
    assert_eq!(stored_first, stored_second);
    for (a, b) in stored_first.iter().zip(&stored_second) {
        assert_eq!(a.calculated_weight.to_bits(), b.calculated_weight.to_bits());
        assert_eq!(a.last_updated, b.last_updated);
    }
    assert_eq!(
        fx.store.get_column_weights(&tenant, None).unwrap(),
        fx.store.get_column_weights(&tenant, None).unwrap()
    );
}

#[tokio::test]
async fn test_cancelled_recompute_keeps_previous_snapshot() {
    let fx = fixture();
    let service = FeedbackService::new(fx.backend.clone());
    let tenant = tenant_a();
    let cancel = CancellationToken::new();

    record(&service, &tenant, "ORDERS", &["ID"], Some((FeedbackAction::Approve, 1.0))).await;
    service.recompute_weights(&tenant, &cancel).await.unwrap();
    let before = service.get_table_weights(&tenant, &cancel).await.unwrap();

    for _ in 0..3 {
        record(&service, &tenant, "ORDERS", &["ID"], Some((FeedbackAction::Reject, 0.1))).await;
        record(&service, &tenant, "CUSTOMERS", &["ID"], Some((FeedbackAction::Approve, 0.9))).await;
    }

    let token = CancellationToken::new();
    let trigger = token.clone();
    let err = service
        .recompute_weights_with_progress(&tenant, &token, |processed| {
            if processed == 2 {
                trigger.cancel();
            }
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled { operation: "recompute_weights", .. }));

    let after = service.get_table_weights(&tenant, &cancel).await.unwrap();
    assert_eq!(before, after);
    assert!(!after.contains_key("CUSTOMERS"));

    // The lock was released, so a new recompute goes through
    service.recompute_weights(&tenant, &cancel).await.unwrap();
    assert!(
        service
            .get_table_weights(&tenant, &cancel)
            .await
            .unwrap()
            .contains_key("CUSTOMERS")
    );
}

#[tokio::test]
async fn test_concurrent_recompute_is_rejected() {
    let fx = fixture();
    let service = FeedbackService::new(fx.backend.clone());
    let cancel = CancellationToken::new();

    service.recomputing.lock().unwrap().insert(tenant_a());

    let err = service
        .recompute_weights(&tenant_a(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WeightRecomputeConflict { .. }));

    // Other tenants are independent
    service.recompute_weights(&tenant_b(), &cancel).await.unwrap();

    service.recomputing.lock().unwrap().remove(&tenant_a());
    service.recompute_weights(&tenant_a(), &cancel).await.unwrap();
}

#[tokio::test]
async fn test_feedback_summary_newest_first() {
    let fx = fixture();
    let service = FeedbackService::new(fx.backend.clone());
    let tenant = tenant_a();
    let cancel = CancellationToken::new();

    let first = record(&service, &tenant, "ORDERS", &[], Some((FeedbackAction::Approve, 0.9))).await;
    let second = record(&service, &tenant, "ORDERS", &[], Some((FeedbackAction::Reject, 0.2))).await;
    let third = record(&service, &tenant, "ORDERS", &[], Some((FeedbackAction::Approve, 0.8))).await;

    let all = service
        .feedback_summary(&tenant, 10, None, &cancel)
        .await
        .unwrap();
    let ids: Vec<&str> = all.iter().map(|e| e.generation.feedback_id.as_str()).collect();
    assert_eq!(ids, vec![third.as_str(), second.as_str(), first.as_str()]);

    let approved = service
        .feedback_summary(&tenant, 10, Some(FeedbackAction::Approve), &cancel)
        .await
        .unwrap();
    assert_eq!(approved.len(), 2);
}
