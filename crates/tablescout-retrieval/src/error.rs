use tablescout_embeddings::EmbeddingError;
use tablescout_index::{StoreError, Tenant};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by every retrieval, feedback and pattern operation.
///
/// Each variant names the operation and, where one applies, the tenant
/// (`db.schema`, empty when the request carried none).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{operation} [{tenant}]: vector index unavailable: {message}")]
    IndexUnavailable {
        operation: &'static str,
        tenant: String,
        message: String,
    },
    #[error("{operation} [{tenant}]: embedding provider unavailable: {message}")]
    EmbeddingUnavailable {
        operation: &'static str,
        tenant: String,
        message: String,
    },
    #[error("{operation}: request issued without a tenant (database id and schema name are required)")]
    TenantNotScoped { operation: &'static str },
    #[error("{operation} [{tenant}]: no generation recorded for feedback id {feedback_id}")]
    UnknownFeedbackId {
        operation: &'static str,
        tenant: String,
        feedback_id: String,
    },
    #[error("{operation}: unknown pattern id {pattern_id}")]
    UnknownPatternId {
        operation: &'static str,
        pattern_id: String,
    },
    #[error("recompute_weights [{tenant}]: another recompute is already running for this tenant")]
    WeightRecomputeConflict { tenant: String },
    #[error("{operation} [{tenant}]: cancelled")]
    Cancelled {
        operation: &'static str,
        tenant: String,
    },
    #[error("{operation} [{tenant}]: {requested} tables selected, at most {max} allowed")]
    TooManyTables {
        operation: &'static str,
        tenant: String,
        requested: usize,
        max: usize,
    },
    #[error("{operation}: invalid request: {message}")]
    InvalidRequest {
        operation: &'static str,
        message: String,
    },
    #[error("{operation} [{tenant}]: {message}")]
    Internal {
        operation: &'static str,
        tenant: String,
        message: String,
    },
    #[error("invalid configuration for {field}: {message}")]
    Config { field: String, message: String },
}

impl Error {
    /// Timeouts and backend failures of the external collaborators.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::IndexUnavailable { .. } | Self::EmbeddingUnavailable { .. }
        )
    }

    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Self::IndexUnavailable { operation, .. }
            | Self::EmbeddingUnavailable { operation, .. }
            | Self::TenantNotScoped { operation }
            | Self::UnknownFeedbackId { operation, .. }
            | Self::UnknownPatternId { operation, .. }
            | Self::Cancelled { operation, .. }
            | Self::TooManyTables { operation, .. }
            | Self::InvalidRequest { operation, .. }
            | Self::Internal { operation, .. } => Some(operation),
            Self::WeightRecomputeConflict { .. } => Some("recompute_weights"),
            Self::Config { .. } => None,
        }
    }

    pub(crate) fn invalid(operation: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            operation,
            message: message.into(),
        }
    }

    pub(crate) fn cancelled(operation: &'static str, tenant: &Tenant) -> Self {
        Self::Cancelled {
            operation,
            tenant: tenant.to_string(),
        }
    }

    pub(crate) fn from_store(operation: &'static str, tenant: &Tenant, err: StoreError) -> Self {
        let tenant = tenant.to_string();
        match err {
            StoreError::TenantNotScoped { .. } => Self::TenantNotScoped { operation },
            err if err.is_backend_failure() => Self::IndexUnavailable {
                operation,
                tenant,
                message: err.to_string(),
            },
            err => Self::Internal {
                operation,
                tenant,
                message: err.to_string(),
            },
        }
    }

    pub(crate) fn from_embedding(
        operation: &'static str,
        tenant: &Tenant,
        err: EmbeddingError,
    ) -> Self {
        match err {
            EmbeddingError::EmptyInput => Self::invalid(operation, "text to embed is empty"),
            EmbeddingError::Unavailable(message) => Self::EmbeddingUnavailable {
                operation,
                tenant: tenant.to_string(),
                message,
            },
            err @ EmbeddingError::DimensionMismatch { .. } => Self::Internal {
                operation,
                tenant: tenant.to_string(),
                message: err.to_string(),
            },
        }
    }
}
