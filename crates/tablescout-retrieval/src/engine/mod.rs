//! Tenant-scoped table and column retrieval.
//!
//! `RetrievalEngine` exposes two layers: raw semantic search (similarity only,
//! see `search.rs`) and weighted retrieval that re-ranks those candidates with
//! the current feedback weights (see `weighted.rs`).

mod search;
mod weighted;

use crate::backend::Backend;
use crate::error::{Error, Result};
use tablescout_index::Tenant;

/// The table/column search engine.
#[derive(Clone)]
pub struct RetrievalEngine {
    pub(crate) backend: Backend,
}

impl RetrievalEngine {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }
}

/// Boundary checks shared by every search entry point.
pub(crate) fn validate_search(
    operation: &'static str,
    tenant: &Tenant,
    question: &str,
    limit: usize,
) -> Result<()> {
    if !tenant.is_scoped() {
        return Err(Error::TenantNotScoped { operation });
    }
    if question.trim().is_empty() {
        return Err(Error::invalid(operation, "question is empty"));
    }
    if limit == 0 {
        return Err(Error::invalid(operation, "limit must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests;
