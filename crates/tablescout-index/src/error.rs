pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    LockPoisoned,
    #[error("{operation} issued without a tenant filter")]
    TenantNotScoped { operation: &'static str },
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("failed to encode or decode stored attributes for {id}: {source}")]
    Attributes {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid stored value: {0}")]
    InvalidData(String),
}

impl StoreError {
    /// Whether the failure comes from the storage backend rather than from the caller.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::Sqlite(_) | Self::LockPoisoned)
    }
}
