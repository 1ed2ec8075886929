//! Recompute and inspect feedback weights

use anyhow::{Context, Result};
use std::time::Instant;
use tablescout_index::Tenant;

use super::common::Services;

pub async fn recompute_weights(services: &Services, tenant: &Tenant) -> Result<()> {
    let start = Instant::now();
    let snapshot = services
        .feedback
        .recompute_weights(tenant, &services.cancel)
        .await
        .with_context(|| format!("Failed to recompute weights for {}", tenant))?;

    println!("Weights recomputed for {}", tenant);
    println!("  Tables: {}", snapshot.tables.len());
    println!("  Columns: {}", snapshot.columns.len());
    println!("  Time: {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

pub async fn weights(services: &Services, tenant: &Tenant, table: Option<&str>) -> Result<()> {
    if let Some(table) = table {
        let columns = services
            .feedback
            .get_column_weights(tenant, table, &services.cancel)
            .await
            .context("Failed to read column weights")?;

        println!("Column weights of {} in {}", table, tenant);
        println!("==========================");
        if columns.is_empty() {
            println!("  (no feedback yet, every column weighs 1.00)");
        }
        for (column, weight) in &columns {
            println!("  {:<32} {:.3}", column, weight);
        }
        return Ok(());
    }

    let tables = services
        .feedback
        .table_weight_details(tenant, &services.cancel)
        .await
        .context("Failed to read table weights")?;

    println!("Table weights in {}", tenant);
    println!("==========================");
    if tables.is_empty() {
        println!("  (no feedback yet, every table weighs 1.00)");
    }
    for weight in &tables {
        println!(
            "  {:<32} {:.3}  (approve {}, modify {}, reject {}, confidence {:.2})",
            weight.table_name,
            weight.calculated_weight,
            weight.approval_count,
            weight.modify_count,
            weight.rejection_count,
            weight.average_confidence
        );
    }
    Ok(())
}
