//! Weighted table and column search

use anyhow::{Context, Result};
use tablescout_index::Tenant;

use super::common::Services;

/// Characters of a description shown per result.
const DESCRIPTION_CHARS: usize = 80;

fn truncate(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(DESCRIPTION_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

pub async fn search_tables(
    services: &Services,
    tenant: &Tenant,
    question: &str,
    limit: usize,
) -> Result<()> {
    let results = services
        .engine
        .search_tables_weighted(tenant, question, limit, &services.cancel)
        .await
        .context("Table search failed")?;

    println!(
        "Tables for '{}' in {} ({} ms)",
        question, tenant, results.search_time_ms
    );
    println!("Found {} results\n", results.total_count);
    if results.is_empty() {
        println!("  (nothing indexed matches; run index-table first)");
    }

    for table in &results.results {
        println!(
            "{} (score: {:.3} = similarity {:.3} x weight {:.2})",
            table.table_name, table.final_score, table.similarity, table.weight
        );
        if !table.attributes.korean_name.is_empty() {
            println!("   Name: {}", table.attributes.korean_name);
        }
        if !table.attributes.description.is_empty() {
            println!("   {}", truncate(&table.attributes.description));
        }
        println!();
    }
    Ok(())
}

pub async fn search_columns(
    services: &Services,
    tenant: &Tenant,
    question: &str,
    table: Option<&str>,
    limit: usize,
) -> Result<()> {
    let results = services
        .engine
        .search_columns_weighted(tenant, question, table, limit, &services.cancel)
        .await
        .context("Column search failed")?;

    println!(
        "Columns for '{}' in {} ({} ms)",
        question, tenant, results.search_time_ms
    );
    println!("Found {} results\n", results.total_count);
    if results.is_empty() {
        println!("  (nothing indexed matches; run index-table first)");
    }

    for column in &results.results {
        println!(
            "{}.{} (score: {:.3} = similarity {:.3} x weight {:.2})",
            column.table_name,
            column.column_name,
            column.final_score,
            column.similarity,
            column.weight()
        );
        let attrs = &column.attributes;
        if !attrs.data_type.is_empty() {
            println!("   Type: {}", attrs.data_type);
        }
        if !attrs.description.is_empty() {
            println!("   {}", truncate(&attrs.description));
        }
        if !attrs.code_values.is_empty() {
            let codes: Vec<String> = attrs
                .code_values
                .iter()
                .map(|(code, label)| format!("{code}={label}"))
                .collect();
            println!("   Codes: {}", truncate(&codes.join(", ")));
        }
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_long_description() {
        let long = "주".repeat(DESCRIPTION_CHARS + 5);
        let short = truncate(&long);
        assert_eq!(short.chars().count(), DESCRIPTION_CHARS + 3);
        assert!(short.ends_with("..."));
    }

    #[test]
    fn test_truncate_short_description() {
        assert_eq!(truncate("주문 헤더"), "주문 헤더");
    }
}
