//! Recent feedback ledger entries

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use tablescout_index::{FeedbackAction, LedgerEntry, Tenant};

use super::common::Services;

fn format_millis(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// One-line status of the response and execution phases.
fn phase_summary(entry: &LedgerEntry) -> String {
    let response = match &entry.response {
        Some(r) => format!("{} ({:.2})", r.action, r.user_confidence),
        None => "pending".to_string(),
    };
    let execution = match &entry.execution {
        Some(e) => format!(
            "{}, {} rows, {:.0} ms",
            e.status.as_str(),
            e.row_count,
            e.execution_time_ms
        ),
        None => "not executed".to_string(),
    };
    format!("{response} / {execution}")
}

pub async fn feedback_summary(
    services: &Services,
    tenant: &Tenant,
    limit: usize,
    action: Option<FeedbackAction>,
) -> Result<()> {
    let entries = services
        .feedback
        .feedback_summary(tenant, limit, action, &services.cancel)
        .await
        .context("Failed to read feedback")?;

    match action {
        Some(action) => println!("Feedback in {} ({} only)", tenant, action),
        None => println!("Feedback in {}", tenant),
    }
    println!("==========================");
    if entries.is_empty() {
        println!("  (none)");
    }
    for entry in &entries {
        let generation = &entry.generation;
        println!(
            "{}  {}  {}",
            format_millis(generation.created_at),
            generation.feedback_id,
            generation.selected_table
        );
        println!("   Question: {}", generation.user_query);
        println!("   {}", phase_summary(entry));
        if let Some(suggestion) = entry.response.as_ref().and_then(|r| r.suggestion.as_deref()) {
            println!("   Suggestion: {}", suggestion);
        }
        println!();
    }
    Ok(())
}
