//! Feedback ledger operations for IndexStore.
//!
//! Each phase is stored in its own table keyed by `feedback_id`. Writes are
//! first-write-wins: a repeated phase is reported as `LedgerWrite::Duplicate`
//! and leaves the stored row untouched.

use super::IndexStore;
use crate::error::{Result, StoreError};
use crate::schema::{
    ExecutionEvent, ExecutionStatus, FeedbackAction, GenerationEvent, LedgerEntry, LedgerWrite,
    ResponseEvent,
};
use crate::tenant::Tenant;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, warn};

const LEDGER_COLUMNS: &str = "g.feedback_id, g.database_id, g.schema_name, g.user_query,
    g.selected_table, g.selected_columns_json, g.generated_sql, g.created_by, g.created_at,
    r.action, r.suggestion, r.user_confidence, r.responded_at,
    e.final_sql, e.status, e.row_count, e.execution_time_ms, e.error_message, e.executed_at";

const LEDGER_JOIN: &str = "feedback_generation g
    LEFT JOIN feedback_response r ON r.feedback_id = g.feedback_id
    LEFT JOIN feedback_execution e ON e.feedback_id = g.feedback_id";

fn generation_exists(conn: &Connection, feedback_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM feedback_generation WHERE feedback_id = ?1",
            [feedback_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Raw ledger row before enum fields are parsed.
struct LedgerRow {
    generation: GenerationEvent,
    selected_columns_json: String,
    response: Option<(String, Option<String>, f64, i64)>,
    execution: Option<(String, String, i64, f64, Option<String>, i64)>,
}

fn read_ledger_row(row: &Row<'_>) -> rusqlite::Result<LedgerRow> {
    let feedback_id: String = row.get(0)?;
    let generation = GenerationEvent {
        feedback_id: feedback_id.clone(),
        tenant: Tenant::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
        user_query: row.get(3)?,
        selected_table: row.get(4)?,
        selected_columns: Vec::new(),
        generated_sql: row.get(6)?,
        created_by: row.get(7)?,
        created_at: row.get(8)?,
    };

    let action: Option<String> = row.get(9)?;
    let response = match action {
        Some(action) => Some((action, row.get(10)?, row.get(11)?, row.get(12)?)),
        None => None,
    };

    let final_sql: Option<String> = row.get(13)?;
    let execution = match final_sql {
        Some(sql) => Some((
            sql,
            row.get(14)?,
            row.get(15)?,
            row.get(16)?,
            row.get(17)?,
            row.get(18)?,
        )),
        None => None,
    };

    Ok(LedgerRow {
        generation,
        selected_columns_json: row.get(5)?,
        response,
        execution,
    })
}

impl LedgerRow {
    fn into_entry(self) -> Result<LedgerEntry> {
        let mut generation = self.generation;
        generation.selected_columns = serde_json::from_str(&self.selected_columns_json)
            .map_err(|source| StoreError::Attributes {
                id: generation.feedback_id.clone(),
                source,
            })?;

        let response = self
            .response
            .map(|(action, suggestion, user_confidence, responded_at)| {
                let action: FeedbackAction = action.parse().map_err(StoreError::InvalidData)?;
                Ok::<_, StoreError>(ResponseEvent {
                    feedback_id: generation.feedback_id.clone(),
                    action,
                    suggestion,
                    user_confidence,
                    responded_at,
                })
            })
            .transpose()?;

        let execution = self
            .execution
            .map(
                |(final_sql, status, row_count, execution_time_ms, error_message, executed_at)| {
                    let status: ExecutionStatus =
                        status.parse().map_err(StoreError::InvalidData)?;
                    Ok::<_, StoreError>(ExecutionEvent {
                        feedback_id: generation.feedback_id.clone(),
                        final_sql,
                        status,
                        row_count,
                        execution_time_ms,
                        error_message,
                        executed_at,
                    })
                },
            )
            .transpose()?;

        Ok(LedgerEntry {
            generation,
            response,
            execution,
        })
    }
}

impl IndexStore {
    /// Record phase 1. The tenant must be scoped.
    pub fn insert_generation(&self, event: &GenerationEvent) -> Result<LedgerWrite> {
        if !event.tenant.is_scoped() {
            return Err(StoreError::TenantNotScoped {
                operation: "insert_generation",
            });
        }
        let columns_json = serde_json::to_string(&event.selected_columns).map_err(|source| {
            StoreError::Attributes {
                id: event.feedback_id.clone(),
                source,
            }
        })?;

        let inserted = self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO feedback_generation
                 (feedback_id, database_id, schema_name, user_query, selected_table,
                  selected_columns_json, generated_sql, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    event.feedback_id,
                    event.tenant.database_id,
                    event.tenant.schema_name,
                    event.user_query,
                    event.selected_table,
                    columns_json,
                    event.generated_sql,
                    event.created_by,
                    event.created_at,
                ],
            )?;
            Ok(changed > 0)
        })?;

        if inserted {
            debug!(feedback_id = %event.feedback_id, tenant = %event.tenant, "Recorded generation");
            Ok(LedgerWrite::Inserted)
        } else {
            warn!(feedback_id = %event.feedback_id, "Duplicate generation ignored");
            Ok(LedgerWrite::Duplicate)
        }
    }

    /// Record phase 2 for an existing generation.
    pub fn insert_response(&self, event: &ResponseEvent) -> Result<LedgerWrite> {
        let outcome = self.with_transaction(|conn| {
            if !generation_exists(conn, &event.feedback_id)? {
                return Ok(LedgerWrite::UnknownFeedbackId);
            }
            let changed = conn.execute(
                "INSERT OR IGNORE INTO feedback_response
                 (feedback_id, action, suggestion, user_confidence, responded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.feedback_id,
                    event.action.as_str(),
                    event.suggestion,
                    event.user_confidence,
                    event.responded_at,
                ],
            )?;
            Ok(if changed > 0 {
                LedgerWrite::Inserted
            } else {
                LedgerWrite::Duplicate
            })
        })?;

        debug!(feedback_id = %event.feedback_id, action = %event.action, ?outcome, "Response write");
        Ok(outcome)
    }

    /// Record phase 3 for an existing generation.
    pub fn insert_execution(&self, event: &ExecutionEvent) -> Result<LedgerWrite> {
        let outcome = self.with_transaction(|conn| {
            if !generation_exists(conn, &event.feedback_id)? {
                return Ok(LedgerWrite::UnknownFeedbackId);
            }
            let changed = conn.execute(
                "INSERT OR IGNORE INTO feedback_execution
                 (feedback_id, final_sql, status, row_count, execution_time_ms, error_message,
                  executed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.feedback_id,
                    event.final_sql,
                    event.status.as_str(),
                    event.row_count,
                    event.execution_time_ms,
                    event.error_message,
                    event.executed_at,
                ],
            )?;
            Ok(if changed > 0 {
                LedgerWrite::Inserted
            } else {
                LedgerWrite::Duplicate
            })
        })?;

        debug!(feedback_id = %event.feedback_id, ?outcome, "Execution write");
        Ok(outcome)
    }

    /// Fetch one ledger entry with whatever phases exist.
    pub fn get_ledger_entry(&self, feedback_id: &str) -> Result<Option<LedgerEntry>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {LEDGER_COLUMNS} FROM {LEDGER_JOIN} WHERE g.feedback_id = ?1"),
                [feedback_id],
                read_ledger_row,
            )
            .optional()
            .map_err(Into::into)
        })?;
        row.map(LedgerRow::into_entry).transpose()
    }

    /// All ledger entries of a tenant, oldest generation first.
    ///
    /// Ordering is by `(created_at, feedback_id)` so repeated reads of the same
    /// ledger always yield the same sequence.
    pub fn load_ledger(&self, tenant: &Tenant) -> Result<Vec<LedgerEntry>> {
        if !tenant.is_scoped() {
            return Err(StoreError::TenantNotScoped {
                operation: "load_ledger",
            });
        }
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LEDGER_COLUMNS} FROM {LEDGER_JOIN}
                 WHERE g.database_id = ?1 AND g.schema_name = ?2
                 ORDER BY g.created_at, g.feedback_id"
            ))?;
            let rows = stmt
                .query_map(
                    params![tenant.database_id, tenant.schema_name],
                    read_ledger_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(LedgerRow::into_entry).collect()
    }

    /// Most recent ledger entries of a tenant, newest first, optionally only
    /// those whose response has the given action.
    pub fn recent_feedback(
        &self,
        tenant: &Tenant,
        limit: usize,
        action: Option<FeedbackAction>,
    ) -> Result<Vec<LedgerEntry>> {
        if !tenant.is_scoped() {
            return Err(StoreError::TenantNotScoped {
                operation: "recent_feedback",
            });
        }
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LEDGER_COLUMNS} FROM {LEDGER_JOIN}
                 WHERE g.database_id = ?1 AND g.schema_name = ?2
                   AND (?3 IS NULL OR r.action = ?3)
                 ORDER BY g.created_at DESC, g.feedback_id DESC
                 LIMIT ?4"
            ))?;
            let rows = stmt
                .query_map(
                    params![
                        tenant.database_id,
                        tenant.schema_name,
                        action.map(|a| a.as_str()),
                        limit as i64,
                    ],
                    read_ledger_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(LedgerRow::into_entry).collect()
    }
}
