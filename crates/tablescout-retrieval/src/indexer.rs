//! Ingests table metadata from the external metadata source into the
//! table and column collections.

use crate::backend::{Access, Backend};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tablescout_index::{
    Collection, ColumnAttributes, EntryAttributes, StoredEntry, TableAttributes, Tenant,
    VectorEntry, VectorFilter, VectorIndex,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Columns listed in a table summary.
const SUMMARY_COLUMNS: usize = 10;

/// Metadata of one table as delivered by the metadata source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableMetadata {
    pub table_name: String,
    #[serde(default)]
    pub korean_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub columns: Vec<ColumnMetadata>,
    #[serde(default)]
    pub related_tables: Vec<String>,
    #[serde(default)]
    pub business_rules: Vec<String>,
    #[serde(default)]
    pub has_foreign_keys: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub column_name: String,
    #[serde(default)]
    pub korean_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub column_comment: String,
    #[serde(default)]
    pub code_values: BTreeMap<String, String>,
}

impl ColumnMetadata {
    /// `NAME (korean): description`, omitting empty parts.
    fn short_description(&self) -> String {
        let mut text = self.column_name.clone();
        if !self.korean_name.is_empty() {
            text.push_str(&format!(" ({})", self.korean_name));
        }
        if !self.description.is_empty() {
            text.push_str(&format!(": {}", self.description));
        }
        text
    }
}

/// Outcome of indexing one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedTable {
    pub entity_id: String,
    pub columns_indexed: usize,
    /// Column entries of an earlier version of the table that were dropped.
    pub columns_removed: usize,
}

/// Escape one id part so joined ids stay unambiguous when names contain dots.
fn id_part(part: &str) -> String {
    part.replace('\\', "\\\\").replace('.', "\\.")
}

/// `db.schema.table`, with `.` and `\` inside a part backslash-escaped.
pub fn table_entity_id(tenant: &Tenant, table_name: &str) -> String {
    [tenant.database_id.as_str(), tenant.schema_name.as_str(), table_name]
        .map(id_part)
        .join(".")
}

/// `db.schema.table.column`, escaped like [`table_entity_id`].
pub fn column_entity_id(tenant: &Tenant, table_name: &str, column_name: &str) -> String {
    [
        tenant.database_id.as_str(),
        tenant.schema_name.as_str(),
        table_name,
        column_name,
    ]
    .map(id_part)
        .join(".")
}

/// Text embedded for a table.
pub fn table_summary(table: &TableMetadata) -> String {
    let mut parts = vec![format!("Table: {}", table.table_name)];
    if !table.korean_name.is_empty() {
        parts.push(format!("Korean name: {}", table.korean_name));
    }
    if !table.description.is_empty() {
        parts.push(format!("Description: {}", table.description));
    }
    if !table.columns.is_empty() {
        let columns: Vec<String> = table
            .columns
            .iter()
            .take(SUMMARY_COLUMNS)
            .map(ColumnMetadata::short_description)
            .collect();
        parts.push(format!("Columns: {}", columns.join(", ")));
    }
    parts.join("\n")
}

/// Text embedded for a column.
pub fn column_summary(table: &TableMetadata, column: &ColumnMetadata) -> String {
    let mut parts = vec![format!("Column: {}.{}", table.table_name, column.short_description())];
    if !column.data_type.is_empty() {
        parts.push(format!("Type: {}", column.data_type));
    }
    if !column.column_comment.is_empty() {
        parts.push(format!("Comment: {}", column.column_comment));
    }
    if !column.code_values.is_empty() {
        let codes: Vec<String> = column
            .code_values
            .iter()
            .map(|(code, label)| format!("{code}={label}"))
            .collect();
        parts.push(format!("Codes: {}", codes.join(", ")));
    }
    parts.join("\n")
}

fn table_attributes(table: &TableMetadata) -> TableAttributes {
    let key_columns: Vec<String> = table
        .columns
        .iter()
        .filter(|c| c.is_primary_key)
        .map(|c| c.column_name.clone())
        .collect();
    TableAttributes {
        table_name: table.table_name.clone(),
        korean_name: table.korean_name.clone(),
        description: table.description.clone(),
        column_count: table.columns.len(),
        has_primary_key: !key_columns.is_empty(),
        has_foreign_keys: table.has_foreign_keys || !table.related_tables.is_empty(),
        related_tables: table.related_tables.clone(),
        key_columns,
        business_rules: table.business_rules.clone(),
    }
}

fn column_attributes(table: &TableMetadata, column: &ColumnMetadata) -> ColumnAttributes {
    ColumnAttributes {
        table_name: table.table_name.clone(),
        column_name: column.column_name.clone(),
        korean_name: column.korean_name.clone(),
        description: column.description.clone(),
        data_type: column.data_type.clone(),
        is_primary_key: column.is_primary_key,
        column_comment: column.column_comment.clone(),
        table_comment: table.description.clone(),
        code_values: column.code_values.clone(),
    }
}

/// Writes table and column embeddings for the metadata source.
#[derive(Clone)]
pub struct MetadataIndexer {
    backend: Backend,
}

impl MetadataIndexer {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Embed and store one table and all of its columns.
    ///
    /// Re-indexing replaces the table entry and its column set; columns that
    /// disappeared from the metadata are removed.
    pub async fn index_table(
        &self,
        tenant: &Tenant,
        table: &TableMetadata,
        cancel: &CancellationToken,
    ) -> Result<IndexedTable> {
        const OP: &str = "index_table";
        if !tenant.is_scoped() {
            return Err(Error::TenantNotScoped { operation: OP });
        }
        if table.table_name.trim().is_empty() {
            return Err(Error::invalid(OP, "table_name is empty"));
        }
        if table.columns.iter().any(|c| c.column_name.trim().is_empty()) {
            return Err(Error::invalid(
                OP,
                format!("column with empty name in {}", table.table_name),
            ));
        }
        let start = Instant::now();

        let summary = table_summary(table);
        let mut texts = Vec::with_capacity(table.columns.len() + 1);
        texts.push(summary.clone());
        texts.extend(table.columns.iter().map(|column| column_summary(table, column)));
        let mut vectors = self
            .backend
            .embed_batch(OP, tenant, texts.clone(), cancel)
            .await?
            .into_iter();
        let documents = texts.into_iter().skip(1);

        let table_entry = VectorEntry {
            id: table_entity_id(tenant, &table.table_name),
            tenant: tenant.clone(),
            // One vector per text, in order
            vector: vectors.next().unwrap_or_default(),
            document: summary,
            attributes: EntryAttributes::Table(table_attributes(table)),
        };
        let column_entries: Vec<VectorEntry> = table
            .columns
            .iter()
            .zip(vectors)
            .zip(documents)
            .map(|((column, vector), document)| VectorEntry {
                id: column_entity_id(tenant, &table.table_name, &column.column_name),
                tenant: tenant.clone(),
                vector,
                document,
                attributes: EntryAttributes::Column(column_attributes(table, column)),
            })
            .collect();

        let entity_id = table_entry.id.clone();
        let columns_indexed = column_entries.len();
        let columns_removed = self
            .backend
            .store_call(OP, tenant, cancel, Access::IdempotentWrite, move |store| {
                store.replace_table(&table_entry, &column_entries)
            })
            .await?;

        info!(
            tenant = %tenant,
            table = %table.table_name,
            columns = columns_indexed,
            time_ms = start.elapsed().as_millis() as u64,
            "Table indexed"
        );
        Ok(IndexedTable {
            entity_id,
            columns_indexed,
            columns_removed,
        })
    }

    /// Delete every table and column entry of `tenant`. Returns entries removed.
    pub async fn remove_tenant(&self, tenant: &Tenant, cancel: &CancellationToken) -> Result<usize> {
        const OP: &str = "remove_tenant";
        if !tenant.is_scoped() {
            return Err(Error::TenantNotScoped { operation: OP });
        }
        let filter = VectorFilter::tenant(tenant);
        let removed = self
            .backend
            .store_call(OP, tenant, cancel, Access::IdempotentWrite, move |store| {
                Ok(store.delete(Collection::Tables, &filter)?
                    + store.delete(Collection::Columns, &filter)?)
            })
            .await?;
        info!(tenant = %tenant, removed, "Tenant metadata removed");
        Ok(removed)
    }

    /// Stored entry of one table, if indexed for `tenant`.
    pub async fn get_table(
        &self,
        tenant: &Tenant,
        table_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<StoredEntry>> {
        get_table(&self.backend, "get_table", tenant, table_name, cancel).await
    }

    /// Column attributes of one table, in indexing order.
    pub async fn list_columns(
        &self,
        tenant: &Tenant,
        table_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ColumnAttributes>> {
        list_columns(&self.backend, "list_columns", tenant, table_name, cancel).await
    }
}

pub(crate) async fn get_table(
    backend: &Backend,
    operation: &'static str,
    tenant: &Tenant,
    table_name: &str,
    cancel: &CancellationToken,
) -> Result<Option<StoredEntry>> {
    if !tenant.is_scoped() {
        return Err(Error::TenantNotScoped { operation });
    }
    let scoped = tenant.clone();
    let id = table_entity_id(tenant, table_name);
    backend
        .store_call(operation, tenant, cancel, Access::Read, move |store| {
            store.get_entry(Collection::Tables, &scoped, &id)
        })
        .await
}

pub(crate) async fn list_columns(
    backend: &Backend,
    operation: &'static str,
    tenant: &Tenant,
    table_name: &str,
    cancel: &CancellationToken,
) -> Result<Vec<ColumnAttributes>> {
    if !tenant.is_scoped() {
        return Err(Error::TenantNotScoped { operation });
    }
    let filter = VectorFilter::tenant(tenant).with_table(table_name);
    let entries = backend
        .store_call(operation, tenant, cancel, Access::Read, move |store| {
            store.list(Collection::Columns, &filter)
        })
        .await?;
    let columns: Vec<ColumnAttributes> = entries
        .into_iter()
        .filter_map(|entry| match entry.attributes {
            EntryAttributes::Column(column) => Some(column),
            _ => None,
        })
        .collect();
    debug!(tenant = %tenant, table = table_name, columns = columns.len(), "Listed columns");
    Ok(columns)
}
