use crate::tenant::Tenant;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const SCHEMA_VERSION: i32 = 1;

/// Version of the JSON encoding used for `vector_entries.attributes_json`.
pub const ATTRIBUTES_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection, dimension: usize) -> SqliteResult<()> {
    conn.execute_batch(
        r#"
        -- Metadata table for schema versioning
        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Documents and attributes for every vector, one row per (collection, tenant, entity)
        CREATE TABLE IF NOT EXISTS vector_entries (
            entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            database_id TEXT NOT NULL,
            schema_name TEXT NOT NULL,
            table_name TEXT,
            document TEXT NOT NULL,
            attributes_json TEXT NOT NULL,
            attributes_version INTEGER NOT NULL,
            UNIQUE (collection, database_id, schema_name, entity_id)
        );

        -- Feedback ledger: one row per phase per feedback_id
        CREATE TABLE IF NOT EXISTS feedback_generation (
            feedback_id TEXT PRIMARY KEY,
            database_id TEXT NOT NULL,
            schema_name TEXT NOT NULL,
            user_query TEXT NOT NULL,
            selected_table TEXT NOT NULL,
            selected_columns_json TEXT NOT NULL,
            generated_sql TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS feedback_response (
            feedback_id TEXT PRIMARY KEY,
            action TEXT NOT NULL,
            suggestion TEXT,
            user_confidence REAL NOT NULL,
            responded_at INTEGER NOT NULL,
            FOREIGN KEY (feedback_id) REFERENCES feedback_generation(feedback_id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS feedback_execution (
            feedback_id TEXT PRIMARY KEY,
            final_sql TEXT NOT NULL,
            status TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            execution_time_ms REAL NOT NULL,
            error_message TEXT,
            executed_at INTEGER NOT NULL,
            FOREIGN KEY (feedback_id) REFERENCES feedback_generation(feedback_id) ON DELETE CASCADE
        );

        -- Derived weight snapshots (always fully replaced per tenant)
        CREATE TABLE IF NOT EXISTS table_weights (
            database_id TEXT NOT NULL,
            schema_name TEXT NOT NULL,
            table_name TEXT NOT NULL,
            approval_count INTEGER NOT NULL,
            rejection_count INTEGER NOT NULL,
            modify_count INTEGER NOT NULL,
            total_feedback INTEGER NOT NULL,
            average_confidence REAL NOT NULL,
            calculated_weight REAL NOT NULL,
            last_updated INTEGER NOT NULL,
            PRIMARY KEY (database_id, schema_name, table_name)
        );

        CREATE TABLE IF NOT EXISTS column_weights (
            database_id TEXT NOT NULL,
            schema_name TEXT NOT NULL,
            table_name TEXT NOT NULL,
            column_name TEXT NOT NULL,
            approval_count INTEGER NOT NULL,
            rejection_count INTEGER NOT NULL,
            modify_count INTEGER NOT NULL,
            frequency INTEGER NOT NULL,
            average_confidence REAL NOT NULL,
            calculated_weight REAL NOT NULL,
            last_updated INTEGER NOT NULL,
            PRIMARY KEY (database_id, schema_name, table_name, column_name)
        );

        -- Learned question -> SQL patterns
        CREATE TABLE IF NOT EXISTS sql_patterns (
            pattern_id TEXT PRIMARY KEY,
            database_id TEXT NOT NULL,
            schema_name TEXT NOT NULL,
            question TEXT NOT NULL,
            sql_query TEXT NOT NULL,
            tables_used_json TEXT NOT NULL,
            use_count INTEGER NOT NULL,
            success_count INTEGER NOT NULL,
            avg_execution_time_ms REAL,
            execution_time_count INTEGER NOT NULL,
            avg_user_rating REAL,
            rating_count INTEGER NOT NULL,
            typical_row_count INTEGER,
            learned_at INTEGER NOT NULL,
            last_used_at INTEGER NOT NULL
        );

        -- Indexes for performance
        CREATE INDEX IF NOT EXISTS idx_entries_tenant ON vector_entries(collection, database_id, schema_name, table_name);
        CREATE INDEX IF NOT EXISTS idx_generation_tenant ON feedback_generation(database_id, schema_name, created_at);
        CREATE INDEX IF NOT EXISTS idx_patterns_tenant ON sql_patterns(database_id, schema_name);
        "#,
    )?;

    // sqlite-vec virtual tables. Tenant columns are vec0 metadata columns so the
    // KNN query itself is filtered instead of post-filtering the top k.
    conn.execute_batch(&format!(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS tables_vec USING vec0(
            entry_id INTEGER PRIMARY KEY,
            embedding float[{dimension}],
            database_id text,
            schema_name text
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS columns_vec USING vec0(
            entry_id INTEGER PRIMARY KEY,
            embedding float[{dimension}],
            database_id text,
            schema_name text,
            table_name text
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS patterns_vec USING vec0(
            entry_id INTEGER PRIMARY KEY,
            embedding float[{dimension}],
            database_id text,
            schema_name text
        );
        "#
    ))?;

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Read the dimension the vector tables were created with, if recorded.
pub fn stored_dimension(conn: &Connection) -> SqliteResult<Option<usize>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = 'embedding_dimension'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(value.and_then(|v| v.parse().ok()))
}

pub fn record_dimension(conn: &Connection, dimension: usize) -> SqliteResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('embedding_dimension', ?1)",
        [dimension.to_string()],
    )?;
    Ok(())
}

/// Logical vector collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Tables,
    Columns,
    Patterns,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tables => "tables",
            Self::Columns => "columns",
            Self::Patterns => "patterns",
        }
    }

    pub(crate) fn vec_table(&self) -> &'static str {
        match self {
            Self::Tables => "tables_vec",
            Self::Columns => "columns_vec",
            Self::Patterns => "patterns_vec",
        }
    }
}

/// Structured attributes of a table embedding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableAttributes {
    pub table_name: String,
    /// Native-language (e.g. Korean) display name.
    pub korean_name: String,
    pub description: String,
    pub column_count: usize,
    pub has_primary_key: bool,
    pub has_foreign_keys: bool,
    #[serde(default)]
    pub related_tables: Vec<String>,
    #[serde(default)]
    pub key_columns: Vec<String>,
    #[serde(default)]
    pub business_rules: Vec<String>,
}

/// Structured attributes of a column embedding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnAttributes {
    pub table_name: String,
    pub column_name: String,
    pub korean_name: String,
    pub description: String,
    pub data_type: String,
    pub is_primary_key: bool,
    #[serde(default)]
    pub column_comment: String,
    #[serde(default)]
    pub table_comment: String,
    /// Code value -> label, for code columns.
    #[serde(default)]
    pub code_values: BTreeMap<String, String>,
}

/// Attributes stored alongside a pattern's question vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternAttributes {
    pub tables_used: Vec<String>,
}

/// Versioned, tagged attribute payload stored with each vector entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryAttributes {
    Table(TableAttributes),
    Column(ColumnAttributes),
    Pattern(PatternAttributes),
}

impl EntryAttributes {
    pub fn collection(&self) -> Collection {
        match self {
            Self::Table(_) => Collection::Tables,
            Self::Column(_) => Collection::Columns,
            Self::Pattern(_) => Collection::Patterns,
        }
    }

    /// Table the entry belongs to (columns only; used as a filter column).
    pub fn table_name(&self) -> Option<&str> {
        match self {
            Self::Column(c) => Some(&c.table_name),
            Self::Table(_) | Self::Pattern(_) => None,
        }
    }
}

/// A vector to write through the index adapter.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub id: String,
    pub tenant: Tenant,
    pub vector: Vec<f32>,
    pub document: String,
    pub attributes: EntryAttributes,
}

/// A stored vector entry without its vector (non-KNN reads).
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub id: String,
    pub tenant: Tenant,
    pub document: String,
    pub attributes: EntryAttributes,
}

/// One nearest-neighbor result.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub tenant: Tenant,
    /// L2 distance between the query vector and the stored vector.
    pub distance: f32,
    pub document: String,
    pub attributes: EntryAttributes,
}

/// Metadata filter applied to every query and delete.
///
/// `tenant` is mandatory at runtime: the adapter rejects a filter without a
/// scoped tenant with `StoreError::TenantNotScoped`.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub tenant: Option<Tenant>,
    pub table_name: Option<String>,
}

impl VectorFilter {
    pub fn tenant(tenant: &Tenant) -> Self {
        Self {
            tenant: Some(tenant.clone()),
            table_name: None,
        }
    }

    pub fn with_table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub(crate) fn scoped_tenant(&self, operation: &'static str) -> crate::Result<&Tenant> {
        self.tenant
            .as_ref()
            .filter(|t| t.is_scoped())
            .ok_or(crate::StoreError::TenantNotScoped { operation })
    }
}

/// User reaction to generated SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Approve,
    Modify,
    Reject,
}

impl FeedbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Modify => "modify",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for FeedbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "approve" => Ok(Self::Approve),
            "modify" => Ok(Self::Modify),
            "reject" => Ok(Self::Reject),
            _ => Err(format!("Unknown feedback action: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown execution status: {}", s)),
        }
    }
}

/// Phase 1: SQL was generated for a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationEvent {
    pub feedback_id: String,
    pub tenant: Tenant,
    pub user_query: String,
    pub selected_table: String,
    pub selected_columns: Vec<String>,
    pub generated_sql: String,
    pub created_by: String,
    /// Unix milliseconds.
    pub created_at: i64,
}

/// Phase 2: the user approved, modified or rejected the SQL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEvent {
    pub feedback_id: String,
    pub action: FeedbackAction,
    pub suggestion: Option<String>,
    pub user_confidence: f64,
    pub responded_at: i64,
}

/// Phase 3: the final SQL was executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub feedback_id: String,
    pub final_sql: String,
    pub status: ExecutionStatus,
    pub row_count: i64,
    pub execution_time_ms: f64,
    pub error_message: Option<String>,
    pub executed_at: i64,
}

/// The three phases of one feedback id, joined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub generation: GenerationEvent,
    pub response: Option<ResponseEvent>,
    pub execution: Option<ExecutionEvent>,
}

/// Outcome of a ledger write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerWrite {
    Inserted,
    /// The sub-record already existed; the write was ignored.
    Duplicate,
    /// No generation event exists for this feedback id.
    UnknownFeedbackId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableWeight {
    pub tenant: Tenant,
    pub table_name: String,
    pub approval_count: u32,
    pub rejection_count: u32,
    pub modify_count: u32,
    pub total_feedback: u32,
    pub average_confidence: f64,
    pub calculated_weight: f64,
    /// Newest ledger timestamp that contributed to this weight.
    pub last_updated: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnWeight {
    pub tenant: Tenant,
    pub table_name: String,
    pub column_name: String,
    pub approval_count: u32,
    pub rejection_count: u32,
    pub modify_count: u32,
    pub frequency: u32,
    pub average_confidence: f64,
    pub calculated_weight: f64,
    pub last_updated: i64,
}

/// A learned question -> SQL pair with running statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlPattern {
    pub pattern_id: String,
    pub tenant: Tenant,
    pub question: String,
    pub sql: String,
    pub tables_used: Vec<String>,
    pub use_count: u32,
    pub success_count: u32,
    pub avg_execution_time_ms: Option<f64>,
    pub execution_time_count: u32,
    pub avg_user_rating: Option<f64>,
    pub rating_count: u32,
    pub typical_row_count: Option<i64>,
    pub learned_at: i64,
    pub last_used_at: i64,
}

impl SqlPattern {
    /// `success_count / use_count`, computed from the integer counters on every call.
    pub fn success_rate(&self) -> f64 {
        if self.use_count == 0 {
            0.0
        } else {
            f64::from(self.success_count) / f64::from(self.use_count)
        }
    }
}

/// Change requested by a pattern read-modify-write closure.
#[derive(Debug, Clone)]
pub enum PatternChange {
    /// Create the pattern and its question vector.
    Insert(SqlPattern, Vec<f32>),
    /// Overwrite the statistics of an existing pattern.
    Update(SqlPattern),
    /// Leave storage untouched.
    Skip,
}
