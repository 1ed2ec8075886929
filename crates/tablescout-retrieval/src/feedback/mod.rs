//! Feedback ledger and weight calculator.
//!
//! The ledger is a three-phase saga keyed by `feedback_id`:
//! generation, then user response, then execution outcome. Response and
//! execution events are rejected unless the generation exists. Weights are
//! derived from the whole ledger by [`FeedbackService::recompute_weights`].

mod calculator;
mod weights;

pub use calculator::{
    MAX_WEIGHT, MIN_WEIGHT, NEUTRAL_WEIGHT, WeightCalculator, WeightSnapshot, column_weight,
    table_weight,
};
pub(crate) use weights::{column_weight_map, table_weight_map};

use crate::backend::{Access, Backend};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tablescout_index::{
    ExecutionEvent, ExecutionStatus, FeedbackAction, GenerationEvent, LedgerEntry, LedgerWrite,
    ResponseEvent, Tenant,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Phase 1 input: SQL was generated for a question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGeneration {
    pub tenant: Tenant,
    pub user_query: String,
    pub selected_table: String,
    #[serde(default)]
    pub selected_columns: Vec<String>,
    pub generated_sql: String,
    #[serde(default)]
    pub created_by: String,
}

/// Phase 2 input: the user's reaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewResponse {
    pub action: FeedbackAction,
    pub suggestion: Option<String>,
    /// Within `[0, 1]`.
    pub user_confidence: f64,
}

/// Phase 3 input: what happened when the SQL ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExecution {
    pub final_sql: String,
    pub status: ExecutionStatus,
    pub row_count: i64,
    pub execution_time_ms: f64,
    pub error_message: Option<String>,
}

/// Records feedback and maintains the derived weight snapshots.
#[derive(Clone)]
pub struct FeedbackService {
    pub(crate) backend: Backend,
    /// Tenants with a recompute in flight.
    recomputing: Arc<Mutex<HashSet<Tenant>>>,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn new_feedback_id() -> String {
    format!("fb_{}", Uuid::now_v7().simple())
}

impl FeedbackService {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            recomputing: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Record phase 1 and return the new, time-ordered feedback id.
    pub async fn record_generation(
        &self,
        generation: NewGeneration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        const OP: &str = "record_generation";
        if !generation.tenant.is_scoped() {
            return Err(Error::TenantNotScoped { operation: OP });
        }
        if generation.user_query.trim().is_empty() {
            return Err(Error::invalid(OP, "user_query is empty"));
        }
        if generation.generated_sql.trim().is_empty() {
            return Err(Error::invalid(OP, "generated_sql is empty"));
        }

        let event = GenerationEvent {
            feedback_id: new_feedback_id(),
            tenant: generation.tenant.clone(),
            user_query: generation.user_query,
            selected_table: generation.selected_table.trim().to_string(),
            selected_columns: generation
                .selected_columns
                .iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            generated_sql: generation.generated_sql,
            created_by: generation.created_by,
            created_at: now_millis(),
        };
        let feedback_id = event.feedback_id.clone();

        let outcome = self
            .backend
            .store_call(
                OP,
                &generation.tenant,
                cancel,
                Access::IdempotentWrite,
                move |store| store.insert_generation(&event),
            )
            .await?;
        if outcome == LedgerWrite::Duplicate {
            // Only reachable when a retried insert had already landed
            warn!(feedback_id = %feedback_id, "Generation already recorded");
        }

        info!(feedback_id = %feedback_id, tenant = %generation.tenant, "Generation recorded");
        Ok(feedback_id)
    }

    /// Record phase 2. A repeated response for the same id is ignored and
    /// reported as [`LedgerWrite::Duplicate`].
    pub async fn record_response(
        &self,
        feedback_id: &str,
        response: NewResponse,
        cancel: &CancellationToken,
    ) -> Result<LedgerWrite> {
        const OP: &str = "record_response";
        if !(0.0..=1.0).contains(&response.user_confidence) {
            return Err(Error::invalid(
                OP,
                format!(
                    "user_confidence must be within [0, 1], got {}",
                    response.user_confidence
                ),
            ));
        }

        let event = ResponseEvent {
            feedback_id: feedback_id.to_string(),
            action: response.action,
            suggestion: response.suggestion,
            user_confidence: response.user_confidence,
            responded_at: now_millis(),
        };
        let (outcome, tenant) = self
            .backend
            .store_call(
                OP,
                &Tenant::default(),
                cancel,
                Access::IdempotentWrite,
                move |store| {
                    let outcome = store.insert_response(&event)?;
                    let tenant = store
                        .get_ledger_entry(&event.feedback_id)?
                        .map(|entry| entry.generation.tenant);
                    Ok((outcome, tenant))
                },
            )
            .await?;

        self.finish_write(OP, feedback_id, outcome, tenant)
    }

    /// Record phase 3.
    pub async fn record_execution(
        &self,
        feedback_id: &str,
        execution: NewExecution,
        cancel: &CancellationToken,
    ) -> Result<LedgerWrite> {
        const OP: &str = "record_execution";
        if !execution.execution_time_ms.is_finite() || execution.execution_time_ms < 0.0 {
            return Err(Error::invalid(
                OP,
                "execution_time_ms must be a non-negative number",
            ));
        }
        if execution.row_count < 0 {
            return Err(Error::invalid(OP, "row_count must be non-negative"));
        }

        let event = ExecutionEvent {
            feedback_id: feedback_id.to_string(),
            final_sql: execution.final_sql,
            status: execution.status,
            row_count: execution.row_count,
            execution_time_ms: execution.execution_time_ms,
            error_message: execution.error_message,
            executed_at: now_millis(),
        };
        let (outcome, tenant) = self
            .backend
            .store_call(
                OP,
                &Tenant::default(),
                cancel,
                Access::IdempotentWrite,
                move |store| {
                    let outcome = store.insert_execution(&event)?;
                    let tenant = store
                        .get_ledger_entry(&event.feedback_id)?
                        .map(|entry| entry.generation.tenant);
                    Ok((outcome, tenant))
                },
            )
            .await?;

        self.finish_write(OP, feedback_id, outcome, tenant)
    }

    fn finish_write(
        &self,
        operation: &'static str,
        feedback_id: &str,
        outcome: LedgerWrite,
        tenant: Option<Tenant>,
    ) -> Result<LedgerWrite> {
        let tenant = tenant.map(|t| t.to_string()).unwrap_or_default();
        match outcome {
            LedgerWrite::UnknownFeedbackId => Err(Error::UnknownFeedbackId {
                operation,
                tenant,
                feedback_id: feedback_id.to_string(),
            }),
            LedgerWrite::Duplicate => {
                warn!(operation, feedback_id, tenant = %tenant, "Duplicate feedback ignored");
                Ok(outcome)
            }
            LedgerWrite::Inserted => {
                info!(operation, feedback_id, tenant = %tenant, "Feedback recorded");
                Ok(outcome)
            }
        }
    }

    /// Joined ledger entries of a tenant, newest first.
    pub async fn feedback_summary(
        &self,
        tenant: &Tenant,
        limit: usize,
        action: Option<FeedbackAction>,
        cancel: &CancellationToken,
    ) -> Result<Vec<LedgerEntry>> {
        const OP: &str = "feedback_summary";
        if !tenant.is_scoped() {
            return Err(Error::TenantNotScoped { operation: OP });
        }
        if limit == 0 {
            return Err(Error::invalid(OP, "limit must be positive"));
        }
        let scoped = tenant.clone();
        self.backend
            .store_call(OP, tenant, cancel, Access::Read, move |store| {
                store.recent_feedback(&scoped, limit, action)
            })
            .await
    }
}

#[cfg(test)]
mod tests;
