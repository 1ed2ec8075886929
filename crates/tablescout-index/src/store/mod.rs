//! SQLite-based storage for table/column metadata vectors, the feedback
//! ledger, derived weights and learned SQL patterns.
//!
//! `IndexStore` owns a single connection behind a mutex. Vector search goes
//! through the sqlite-vec `vec0` virtual tables created by [`init_schema`].

mod feedback;
mod patterns;
mod vectors;
mod weights;

use crate::error::{Result, StoreError};
use crate::schema::{init_schema, record_dimension, stored_dimension};
use rusqlite::{Connection, ffi::sqlite3_auto_extension};
use sqlite_vec::sqlite3_vec_init;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use tracing::debug;

/// Global initializer for sqlite-vec extension.
static SQLITE_VEC_INIT: Once = Once::new();

/// Registers the sqlite-vec extension with SQLite's auto-extension mechanism.
///
/// # Safety
///
/// `sqlite3_vec_init` is the C entry point exported by the `sqlite-vec` crate.
/// `sqlite3_auto_extension` expects an untyped function pointer, so the
/// transmute only reinterprets the pointer type; SQLite invokes it with the
/// extension-init signature. `Once` guarantees a single registration, which
/// happens before any connection is opened by this crate.
fn init_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| {
        // SAFETY: see function-level documentation.
        unsafe {
            sqlite3_auto_extension(Some(std::mem::transmute::<
                *const (),
                unsafe extern "C" fn(
                    *mut rusqlite::ffi::sqlite3,
                    *mut *mut std::os::raw::c_char,
                    *const rusqlite::ffi::sqlite3_api_routines,
                ) -> std::os::raw::c_int,
            >(sqlite3_vec_init as *const ())));
        }
        debug!("sqlite-vec extension registered");
    });
}

/// The main storage interface.
pub struct IndexStore {
    pub(crate) conn: Mutex<Connection>,
    db_path: PathBuf,
    dimension: usize,
}

impl IndexStore {
    /// Open or create a database at the given path.
    ///
    /// Fails with `DimensionMismatch` if the file was created with a
    /// different embedding dimension.
    pub fn open(path: &Path, dimension: usize) -> Result<Self> {
        init_sqlite_vec();

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )?;

        Self::prepare(conn, path.to_path_buf(), dimension)
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory(dimension: usize) -> Result<Self> {
        init_sqlite_vec();

        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        Self::prepare(conn, PathBuf::from(":memory:"), dimension)
    }

    fn prepare(conn: Connection, db_path: PathBuf, dimension: usize) -> Result<Self> {
        if let Some(existing) = stored_dimension(&conn).ok().flatten()
            && existing != dimension
        {
            return Err(StoreError::DimensionMismatch {
                expected: existing,
                actual: dimension,
            });
        }

        init_schema(&conn, dimension)?;
        record_dimension(&conn, dimension)?;

        debug!(path = ?db_path, dimension, "Index store ready");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            dimension,
        })
    }

    /// Get the path to the database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Vector dimension every stored embedding must have.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Acquire the connection lock and run `f`.
    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction; rolls back on error.
    pub(crate) fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.with_conn(|conn| {
            conn.execute_batch("BEGIN IMMEDIATE")?;

            match f(conn) {
                Ok(value) => {
                    conn.execute_batch("COMMIT")?;
                    Ok(value)
                }
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    Err(e)
                }
            }
        })
    }

    /// Get index statistics.
    pub fn get_stats(&self) -> Result<IndexStats> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM vector_entries WHERE collection = 'tables') as table_count,
                    (SELECT COUNT(*) FROM vector_entries WHERE collection = 'columns') as column_count,
                    (SELECT COUNT(*) FROM sql_patterns) as pattern_count,
                    (SELECT COUNT(*) FROM feedback_generation) as feedback_count,
                    (SELECT COUNT(*) FROM table_weights) as table_weight_count,
                    (SELECT COUNT(*) FROM column_weights) as column_weight_count",
                [],
                |row| {
                    Ok(IndexStats {
                        table_count: row.get::<_, i64>(0)? as usize,
                        column_count: row.get::<_, i64>(1)? as usize,
                        pattern_count: row.get::<_, i64>(2)? as usize,
                        feedback_count: row.get::<_, i64>(3)? as usize,
                        table_weight_count: row.get::<_, i64>(4)? as usize,
                        column_weight_count: row.get::<_, i64>(5)? as usize,
                    })
                },
            )
            .map_err(Into::into)
        })
    }

    pub(crate) fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Encode an embedding as little-endian f32 bytes (the vec0 blob format).
pub(crate) fn embedding_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Statistics about the index.
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub table_count: usize,
    pub column_count: usize,
    pub pattern_count: usize,
    pub feedback_count: usize,
    pub table_weight_count: usize,
    pub column_weight_count: usize,
}
