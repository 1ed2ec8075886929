//! Index table metadata from a JSON file

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Instant;
use tablescout_index::Tenant;
use tablescout_retrieval::TableMetadata;

use super::common::Services;

#[derive(Deserialize)]
#[serde(untagged)]
enum MetadataFile {
    Many(Vec<TableMetadata>),
    One(TableMetadata),
}

/// Tables described by `raw`, which holds one table object or an array.
pub fn parse_metadata(raw: &str) -> Result<Vec<TableMetadata>> {
    let parsed: MetadataFile =
        serde_json::from_str(raw).context("Metadata must be a table object or an array of them")?;
    Ok(match parsed {
        MetadataFile::Many(tables) => tables,
        MetadataFile::One(table) => vec![table],
    })
}

pub async fn index_table(services: &Services, tenant: &Tenant, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read metadata file {:?}", file))?;
    let tables = parse_metadata(&raw)?;
    if tables.is_empty() {
        anyhow::bail!("No tables in {:?}", file);
    }

    let start = Instant::now();
    println!("Indexing {} table(s) into {}", tables.len(), tenant);

    let mut columns = 0;
    for table in &tables {
        let indexed = services
            .indexer
            .index_table(tenant, table, &services.cancel)
            .await
            .with_context(|| format!("Failed to index table {}", table.table_name))?;
        columns += indexed.columns_indexed;
        if indexed.columns_removed > 0 {
            println!(
                "  {} ({} columns, {} removed)",
                indexed.entity_id, indexed.columns_indexed, indexed.columns_removed
            );
        } else {
            println!("  {} ({} columns)", indexed.entity_id, indexed.columns_indexed);
        }
    }

    println!();
    println!(
        "Indexed {} tables, {} columns in {:.2}s",
        tables.len(),
        columns,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
