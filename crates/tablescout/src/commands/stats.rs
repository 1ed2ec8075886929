//! Show index and pattern statistics

use anyhow::{Context, Result};
use tablescout_index::Tenant;

use super::common::Services;

pub async fn stats(services: &Services, tenant: Option<&Tenant>) -> Result<()> {
    let store = services.store.clone();
    let index = tokio::task::spawn_blocking(move || store.get_stats())
        .await
        .context("Statistics task failed")?
        .context("Failed to read index statistics")?;
    let patterns = services
        .patterns
        .stats(tenant, &services.cancel)
        .await
        .context("Failed to read pattern statistics")?;

    println!("TableScout Statistics");
    println!("=====================");
    println!("Database: {:?}", services.db_path);
    println!();
    println!("Index:");
    println!("  Tables: {}", index.table_count);
    println!("  Columns: {}", index.column_count);
    println!();
    println!("Feedback:");
    println!("  Generations recorded: {}", index.feedback_count);
    println!("  Table weights: {}", index.table_weight_count);
    println!("  Column weights: {}", index.column_weight_count);
    println!();
    match tenant {
        Some(tenant) => println!("Patterns ({}):", tenant),
        None => println!("Patterns:"),
    }
    println!("  Learned: {}", patterns.total_patterns);
    println!(
        "  Average success rate: {:.1}%",
        patterns.avg_success_rate * 100.0
    );
    println!("  Total reuses: {}", patterns.total_reuses);
    println!(
        "  Estimated LLM calls saved: {}",
        patterns.estimated_llm_calls_saved
    );
    Ok(())
}
