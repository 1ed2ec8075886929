//! Derived weight snapshot operations for IndexStore.

use super::IndexStore;
use crate::error::{Result, StoreError};
use crate::schema::{ColumnWeight, TableWeight};
use crate::tenant::Tenant;
use rusqlite::{Row, params};
use tracing::info;

fn read_table_weight(row: &Row<'_>) -> rusqlite::Result<TableWeight> {
    Ok(TableWeight {
        tenant: Tenant::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        table_name: row.get(2)?,
        approval_count: row.get(3)?,
        rejection_count: row.get(4)?,
        modify_count: row.get(5)?,
        total_feedback: row.get(6)?,
        average_confidence: row.get(7)?,
        calculated_weight: row.get(8)?,
        last_updated: row.get(9)?,
    })
}

fn read_column_weight(row: &Row<'_>) -> rusqlite::Result<ColumnWeight> {
    Ok(ColumnWeight {
        tenant: Tenant::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        table_name: row.get(2)?,
        column_name: row.get(3)?,
        approval_count: row.get(4)?,
        rejection_count: row.get(5)?,
        modify_count: row.get(6)?,
        frequency: row.get(7)?,
        average_confidence: row.get(8)?,
        calculated_weight: row.get(9)?,
        last_updated: row.get(10)?,
    })
}

fn require_scoped(tenant: &Tenant, operation: &'static str) -> Result<()> {
    if tenant.is_scoped() {
        Ok(())
    } else {
        Err(StoreError::TenantNotScoped { operation })
    }
}

impl IndexStore {
    /// Replace every table and column weight of `tenant` in one transaction.
    ///
    /// Readers see either the previous snapshot or the new one, never a mix.
    /// Weights whose tenant differs from `tenant` are rejected.
    pub fn replace_weight_snapshot(
        &self,
        tenant: &Tenant,
        tables: &[TableWeight],
        columns: &[ColumnWeight],
    ) -> Result<()> {
        require_scoped(tenant, "replace_weight_snapshot")?;
        if tables.iter().any(|w| &w.tenant != tenant)
            || columns.iter().any(|w| &w.tenant != tenant)
        {
            return Err(StoreError::InvalidData(format!(
                "weight snapshot for {tenant} contains foreign tenant rows"
            )));
        }

        self.with_transaction(|conn| {
            conn.execute(
                "DELETE FROM table_weights WHERE database_id = ?1 AND schema_name = ?2",
                params![tenant.database_id, tenant.schema_name],
            )?;
            conn.execute(
                "DELETE FROM column_weights WHERE database_id = ?1 AND schema_name = ?2",
                params![tenant.database_id, tenant.schema_name],
            )?;

            let mut stmt = conn.prepare(
                "INSERT INTO table_weights
                 (database_id, schema_name, table_name, approval_count, rejection_count,
                  modify_count, total_feedback, average_confidence, calculated_weight, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for w in tables {
                stmt.execute(params![
                    tenant.database_id,
                    tenant.schema_name,
                    w.table_name,
                    w.approval_count,
                    w.rejection_count,
                    w.modify_count,
                    w.total_feedback,
                    w.average_confidence,
                    w.calculated_weight,
                    w.last_updated,
                ])?;
            }

            let mut stmt = conn.prepare(
                "INSERT INTO column_weights
                 (database_id, schema_name, table_name, column_name, approval_count,
                  rejection_count, modify_count, frequency, average_confidence,
                  calculated_weight, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for w in columns {
                stmt.execute(params![
                    tenant.database_id,
                    tenant.schema_name,
                    w.table_name,
                    w.column_name,
                    w.approval_count,
                    w.rejection_count,
                    w.modify_count,
                    w.frequency,
                    w.average_confidence,
                    w.calculated_weight,
                    w.last_updated,
                ])?;
            }

            Ok(())
        })?;

        info!(
            tenant = %tenant,
            tables = tables.len(),
            columns = columns.len(),
            "Weight snapshot replaced"
        );
        Ok(())
    }

    /// Table weights of a tenant, ordered by table name.
    pub fn get_table_weights(&self, tenant: &Tenant) -> Result<Vec<TableWeight>> {
        require_scoped(tenant, "get_table_weights")?;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT database_id, schema_name, table_name, approval_count, rejection_count,
                        modify_count, total_feedback, average_confidence, calculated_weight,
                        last_updated
                 FROM table_weights
                 WHERE database_id = ?1 AND schema_name = ?2
                 ORDER BY table_name",
            )?;
            let weights = stmt
                .query_map(
                    params![tenant.database_id, tenant.schema_name],
                    read_table_weight,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(weights)
        })
    }

    /// Column weights of a tenant, optionally restricted to one table.
    pub fn get_column_weights(
        &self,
        tenant: &Tenant,
        table_name: Option<&str>,
    ) -> Result<Vec<ColumnWeight>> {
        require_scoped(tenant, "get_column_weights")?;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT database_id, schema_name, table_name, column_name, approval_count,
                        rejection_count, modify_count, frequency, average_confidence,
                        calculated_weight, last_updated
                 FROM column_weights
                 WHERE database_id = ?1 AND schema_name = ?2
                   AND (?3 IS NULL OR table_name = ?3)
                 ORDER BY table_name, column_name",
            )?;
            let weights = stmt
                .query_map(
                    params![tenant.database_id, tenant.schema_name, table_name],
                    read_column_weight,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(weights)
        })
    }
}
