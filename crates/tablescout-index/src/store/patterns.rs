//! SQL pattern operations for IndexStore.

use super::IndexStore;
use super::vectors::{delete_entries_in, upsert_entry_in};
use crate::error::{Result, StoreError};
use crate::schema::{
    Collection, EntryAttributes, PatternAttributes, PatternChange, SqlPattern, VectorEntry,
};
use crate::tenant::Tenant;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

const PATTERN_COLUMNS: &str = "pattern_id, database_id, schema_name, question, sql_query,
    tables_used_json, use_count, success_count, avg_execution_time_ms, execution_time_count,
    avg_user_rating, rating_count, typical_row_count, learned_at, last_used_at";

fn read_pattern(row: &Row<'_>) -> rusqlite::Result<(SqlPattern, String)> {
    Ok((
        SqlPattern {
            pattern_id: row.get(0)?,
            tenant: Tenant::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
            question: row.get(3)?,
            sql: row.get(4)?,
            tables_used: Vec::new(),
            use_count: row.get(6)?,
            success_count: row.get(7)?,
            avg_execution_time_ms: row.get(8)?,
            execution_time_count: row.get(9)?,
            avg_user_rating: row.get(10)?,
            rating_count: row.get(11)?,
            typical_row_count: row.get(12)?,
            learned_at: row.get(13)?,
            last_used_at: row.get(14)?,
        },
        row.get(5)?,
    ))
}

fn decode_pattern((mut pattern, tables_json): (SqlPattern, String)) -> Result<SqlPattern> {
    pattern.tables_used =
        serde_json::from_str(&tables_json).map_err(|source| StoreError::Attributes {
            id: pattern.pattern_id.clone(),
            source,
        })?;
    Ok(pattern)
}

fn tables_json(pattern: &SqlPattern) -> Result<String> {
    serde_json::to_string(&pattern.tables_used).map_err(|source| StoreError::Attributes {
        id: pattern.pattern_id.clone(),
        source,
    })
}

fn load_pattern(conn: &Connection, pattern_id: &str) -> Result<Option<SqlPattern>> {
    conn.query_row(
        &format!("SELECT {PATTERN_COLUMNS} FROM sql_patterns WHERE pattern_id = ?1"),
        [pattern_id],
        read_pattern,
    )
    .optional()?
    .map(decode_pattern)
    .transpose()
}

fn insert_pattern(conn: &Connection, dimension: usize, pattern: &SqlPattern, vector: Vec<f32>) -> Result<()> {
    if !pattern.tenant.is_scoped() {
        return Err(StoreError::TenantNotScoped {
            operation: "insert_pattern",
        });
    }
    conn.execute(
        &format!(
            "INSERT INTO sql_patterns ({PATTERN_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
        ),
        params![
            pattern.pattern_id,
            pattern.tenant.database_id,
            pattern.tenant.schema_name,
            pattern.question,
            pattern.sql,
            tables_json(pattern)?,
            pattern.use_count,
            pattern.success_count,
            pattern.avg_execution_time_ms,
            pattern.execution_time_count,
            pattern.avg_user_rating,
            pattern.rating_count,
            pattern.typical_row_count,
            pattern.learned_at,
            pattern.last_used_at,
        ],
    )?;

    upsert_entry_in(
        conn,
        dimension,
        &VectorEntry {
            id: pattern.pattern_id.clone(),
            tenant: pattern.tenant.clone(),
            vector,
            document: pattern.question.clone(),
            attributes: EntryAttributes::Pattern(PatternAttributes {
                tables_used: pattern.tables_used.clone(),
            }),
        },
    )
}

fn update_pattern_stats(conn: &Connection, pattern: &SqlPattern) -> Result<()> {
    let changed = conn.execute(
        "UPDATE sql_patterns
         SET use_count = ?1, success_count = ?2, avg_execution_time_ms = ?3,
             execution_time_count = ?4, avg_user_rating = ?5, rating_count = ?6,
             typical_row_count = ?7, last_used_at = ?8
         WHERE pattern_id = ?9",
        params![
            pattern.use_count,
            pattern.success_count,
            pattern.avg_execution_time_ms,
            pattern.execution_time_count,
            pattern.avg_user_rating,
            pattern.rating_count,
            pattern.typical_row_count,
            pattern.last_used_at,
            pattern.pattern_id,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::InvalidData(format!(
            "pattern {} vanished during update",
            pattern.pattern_id
        )));
    }
    Ok(())
}

impl IndexStore {
    /// Atomic read-modify-write of one pattern.
    ///
    /// `change` sees the current row (if any) and decides what to write. The
    /// read and the write happen inside one `BEGIN IMMEDIATE` transaction, so
    /// concurrent modifications of the same pattern are serialized and no
    /// counter increment is lost. Returns the pattern as stored afterwards.
    pub fn modify_pattern<F>(&self, pattern_id: &str, change: F) -> Result<Option<SqlPattern>>
    where
        F: FnOnce(Option<SqlPattern>) -> PatternChange,
    {
        self.with_transaction(|conn| {
            let current = load_pattern(conn, pattern_id)?;
            let existed = current.is_some();

            match change(current.clone()) {
                PatternChange::Insert(pattern, vector) => {
                    if existed {
                        return Err(StoreError::InvalidData(format!(
                            "pattern {pattern_id} already exists"
                        )));
                    }
                    insert_pattern(conn, self.dimension, &pattern, vector)?;
                    debug!(pattern_id, tenant = %pattern.tenant, "Inserted pattern");
                    Ok(Some(pattern))
                }
                PatternChange::Update(pattern) => {
                    update_pattern_stats(conn, &pattern)?;
                    debug!(pattern_id, use_count = pattern.use_count, "Updated pattern");
                    Ok(Some(pattern))
                }
                PatternChange::Skip => Ok(current),
            }
        })
    }

    pub fn get_pattern(&self, pattern_id: &str) -> Result<Option<SqlPattern>> {
        self.with_conn(|conn| load_pattern(conn, pattern_id))
    }

    /// All patterns, or only those of one tenant. Ordered by `learned_at`.
    pub fn list_patterns(&self, tenant: Option<&Tenant>) -> Result<Vec<SqlPattern>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PATTERN_COLUMNS} FROM sql_patterns
                 WHERE (?1 IS NULL OR database_id = ?1) AND (?2 IS NULL OR schema_name = ?2)
                 ORDER BY learned_at, pattern_id"
            ))?;
            let rows = stmt
                .query_map(
                    params![
                        tenant.map(|t| t.database_id.as_str()),
                        tenant.map(|t| t.schema_name.as_str()),
                    ],
                    read_pattern,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(decode_pattern).collect()
    }

    /// Remove a pattern and its question vector. Returns whether it existed.
    pub fn delete_pattern(&self, pattern_id: &str) -> Result<bool> {
        self.with_transaction(|conn| {
            let Some(pattern) = load_pattern(conn, pattern_id)? else {
                return Ok(false);
            };
            delete_entries_in(
                conn,
                Collection::Patterns,
                &pattern.tenant,
                None,
                Some(pattern_id),
            )?;
            conn.execute("DELETE FROM sql_patterns WHERE pattern_id = ?1", [pattern_id])?;
            debug!(pattern_id, "Deleted pattern");
            Ok(true)
        })
    }
}
