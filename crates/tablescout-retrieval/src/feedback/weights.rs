//! Weight recompute and weight reads for FeedbackService.

use super::FeedbackService;
use super::calculator::{WeightCalculator, WeightSnapshot};
use crate::backend::{Access, Backend};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tablescout_index::{TableWeight, Tenant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Marks a tenant as recomputing until dropped.
struct RecomputeGuard {
    tenant: Tenant,
    recomputing: Arc<Mutex<HashSet<Tenant>>>,
}

impl RecomputeGuard {
    fn acquire(recomputing: &Arc<Mutex<HashSet<Tenant>>>, tenant: &Tenant) -> Result<Self> {
        let mut set = recomputing.lock().map_err(|_| Error::Internal {
            operation: "recompute_weights",
            tenant: tenant.to_string(),
            message: "recompute lock poisoned".to_string(),
        })?;
        if !set.insert(tenant.clone()) {
            return Err(Error::WeightRecomputeConflict {
                tenant: tenant.to_string(),
            });
        }
        Ok(Self {
            tenant: tenant.clone(),
            recomputing: Arc::clone(recomputing),
        })
    }
}

impl Drop for RecomputeGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.recomputing.lock() {
            set.remove(&self.tenant);
        }
    }
}

pub(crate) async fn table_weight_map(
    backend: &Backend,
    operation: &'static str,
    tenant: &Tenant,
    cancel: &CancellationToken,
) -> Result<HashMap<String, f64>> {
    let scoped = tenant.clone();
    let weights = backend
        .store_call(operation, tenant, cancel, Access::Read, move |store| {
            store.get_table_weights(&scoped)
        })
        .await?;
    Ok(weights
        .into_iter()
        .map(|w| (w.table_name, w.calculated_weight))
        .collect())
}

pub(crate) async fn column_weight_map(
    backend: &Backend,
    operation: &'static str,
    tenant: &Tenant,
    table_name: Option<&str>,
    cancel: &CancellationToken,
) -> Result<HashMap<(String, String), f64>> {
    let scoped = tenant.clone();
    let table = table_name.map(str::to_string);
    let weights = backend
        .store_call(operation, tenant, cancel, Access::Read, move |store| {
            store.get_column_weights(&scoped, table.as_deref())
        })
        .await?;
    Ok(weights
        .into_iter()
        .map(|w| ((w.table_name, w.column_name), w.calculated_weight))
        .collect())
}

impl FeedbackService {
    /// Rebuild every weight of `tenant` from the full ledger.
    ///
    /// Safe to run on a schedule: with no new feedback the snapshot written is
    /// identical to the previous one. A concurrent recompute for the same
    /// tenant fails with `WeightRecomputeConflict`; a cancelled one writes
    /// nothing.
    pub async fn recompute_weights(
        &self,
        tenant: &Tenant,
        cancel: &CancellationToken,
    ) -> Result<WeightSnapshot> {
        self.recompute_weights_with_progress(tenant, cancel, |_| {})
            .await
    }

    /// [`recompute_weights`](Self::recompute_weights) reporting the number of
    /// ledger entries folded so far after each one.
    pub async fn recompute_weights_with_progress<P>(
        &self,
        tenant: &Tenant,
        cancel: &CancellationToken,
        mut progress: P,
    ) -> Result<WeightSnapshot>
    where
        P: FnMut(usize),
    {
        const OP: &str = "recompute_weights";
        if !tenant.is_scoped() {
            return Err(Error::TenantNotScoped { operation: OP });
        }
        let _guard = RecomputeGuard::acquire(&self.recomputing, tenant)?;
        let start = Instant::now();

        let scoped = tenant.clone();
        let ledger = self
            .backend
            .store_call(OP, tenant, cancel, Access::Read, move |store| {
                store.load_ledger(&scoped)
            })
            .await?;

        let mut calculator = WeightCalculator::new(tenant.clone());
        for (processed, entry) in ledger.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(tenant = %tenant, processed, "Weight recompute cancelled");
                return Err(Error::cancelled(OP, tenant));
            }
            calculator.add(entry);
            progress(processed + 1);
        }
        let skipped = calculator.skipped();
        let snapshot = calculator.finish();

        if cancel.is_cancelled() {
            info!(tenant = %tenant, "Weight recompute cancelled before commit");
            return Err(Error::cancelled(OP, tenant));
        }

        let scoped = tenant.clone();
        let to_write = snapshot.clone();
        self.backend
            .store_call(OP, tenant, cancel, Access::IdempotentWrite, move |store| {
                store.replace_weight_snapshot(&scoped, &to_write.tables, &to_write.columns)
            })
            .await?;

        debug!(tenant = %tenant, skipped, "Ledger entries without a table were ignored");
        info!(
            tenant = %tenant,
            ledger_entries = ledger.len(),
            tables = snapshot.tables.len(),
            columns = snapshot.columns.len(),
            time_ms = start.elapsed().as_millis() as u64,
            "Weights recomputed"
        );
        Ok(snapshot)
    }

    /// `table -> weight` for every table with feedback. Absent tables weigh 1.0.
    pub async fn get_table_weights(
        &self,
        tenant: &Tenant,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, f64>> {
        if !tenant.is_scoped() {
            return Err(Error::TenantNotScoped {
                operation: "get_table_weights",
            });
        }
        Ok(table_weight_map(&self.backend, "get_table_weights", tenant, cancel)
            .await?
            .into_iter()
            .collect())
    }

    /// `column -> weight` for one table. Absent columns weigh 1.0.
    pub async fn get_column_weights(
        &self,
        tenant: &Tenant,
        table_name: &str,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, f64>> {
        if !tenant.is_scoped() {
            return Err(Error::TenantNotScoped {
                operation: "get_column_weights",
            });
        }
        Ok(column_weight_map(
            &self.backend,
            "get_column_weights",
            tenant,
            Some(table_name),
            cancel,
        )
        .await?
        .into_iter()
        .map(|((_, column), weight)| (column, weight))
        .collect())
    }

    /// Table weight rows of a tenant with their feedback counts, for reporting.
    pub async fn table_weight_details(
        &self,
        tenant: &Tenant,
        cancel: &CancellationToken,
    ) -> Result<Vec<TableWeight>> {
        const OP: &str = "table_weight_details";
        if !tenant.is_scoped() {
            return Err(Error::TenantNotScoped { operation: OP });
        }
        let scoped = tenant.clone();
        self.backend
            .store_call(OP, tenant, cancel, Access::Read, move |store| {
                store.get_table_weights(&scoped)
            })
            .await
    }
}
