//! Learning and reuse of question -> SQL patterns.
//!
//! A pattern is keyed by a hash of its tenant, lower-cased question and
//! lower-cased SQL, so learning the same triple twice updates one record.
//! Every read-modify-write goes through [`IndexStore::modify_pattern`], which
//! runs inside a single SQLite transaction; concurrent updates of the same
//! pattern are serialized and no counter increment is lost.
//!
//! [`IndexStore::modify_pattern`]: tablescout_index::IndexStore::modify_pattern

mod analytics;

pub use analytics::{
    AlternativeQuestion, DEFAULT_MAX_FAILING_RATE, DEFAULT_MIN_USE_COUNT, DEFAULT_RECENT_DAYS,
    SQL_PREVIEW_CHARS, SUGGESTION_SIMILARITY_THRESHOLD, sql_preview,
};

use crate::backend::{Access, Backend};
use crate::error::{Error, Result};
use crate::results::by_score_desc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tablescout_index::{
    Collection, PatternChange, SqlPattern, Tenant, VectorFilter, VectorIndex,
    distance_to_similarity,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Share of the reuse score taken by similarity; success rate takes the rest.
const SIMILARITY_SHARE: f64 = 0.7;

/// Stable id of a (tenant, question, sql) triple. Case-insensitive.
///
/// Each part is hashed behind its byte length, so separators inside names
/// cannot make two triples collide.
pub fn pattern_id(tenant: &Tenant, question: &str, sql: &str) -> String {
    let question = question.to_lowercase();
    let sql = sql.to_lowercase();
    let mut hasher = Sha256::new();
    for part in [
        tenant.database_id.as_str(),
        tenant.schema_name.as_str(),
        question.as_str(),
        sql.as_str(),
    ] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    format!("pattern_{}", &format!("{:x}", hasher.finalize())[..16])
}

/// `(old_avg · (n - 1) + value) / n`, where `n` already counts `value`.
fn running_average(current: Option<f64>, n: u32, value: f64) -> f64 {
    match current {
        Some(avg) if n > 1 => (avg * f64::from(n - 1) + value) / f64::from(n),
        _ => value,
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn validate_rating(operation: &'static str, rating: Option<u8>) -> Result<()> {
    match rating {
        Some(r) if !(1..=5).contains(&r) => Err(Error::invalid(
            operation,
            format!("user_rating must be within 1..=5, got {r}"),
        )),
        _ => Ok(()),
    }
}

/// Input of [`PatternEngine::learn`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnRequest {
    pub tenant: Tenant,
    pub question: String,
    pub sql: String,
    #[serde(default)]
    pub tables_used: Vec<String>,
    pub success: bool,
    pub execution_time_ms: Option<f64>,
    pub row_count: Option<i64>,
    /// 1 to 5.
    pub user_rating: Option<u8>,
}

impl LearnRequest {
    fn validate(&self, operation: &'static str) -> Result<()> {
        if !self.tenant.is_scoped() {
            return Err(Error::TenantNotScoped { operation });
        }
        if self.question.trim().is_empty() {
            return Err(Error::invalid(operation, "question is empty"));
        }
        if self.sql.trim().is_empty() {
            return Err(Error::invalid(operation, "sql is empty"));
        }
        if let Some(ms) = self.execution_time_ms
            && (!ms.is_finite() || ms < 0.0)
        {
            return Err(Error::invalid(
                operation,
                "execution_time_ms must be a non-negative number",
            ));
        }
        if let Some(rows) = self.row_count
            && rows < 0
        {
            return Err(Error::invalid(operation, "row_count must be non-negative"));
        }
        validate_rating(operation, self.user_rating)
    }

    fn outcome(&self) -> PatternOutcome {
        PatternOutcome {
            success: self.success,
            execution_time_ms: self.execution_time_ms,
            row_count: self.row_count,
            user_rating: self.user_rating,
        }
    }

    fn new_pattern(&self, pattern_id: String, now: i64) -> SqlPattern {
        let mut pattern = SqlPattern {
            pattern_id,
            tenant: self.tenant.clone(),
            question: self.question.clone(),
            sql: self.sql.clone(),
            tables_used: self.tables_used.clone(),
            use_count: 0,
            success_count: 0,
            avg_execution_time_ms: None,
            execution_time_count: 0,
            avg_user_rating: None,
            rating_count: 0,
            typical_row_count: None,
            learned_at: now,
            last_used_at: now,
        };
        self.outcome().apply(&mut pattern, now);
        pattern
    }
}

/// One observed use of a pattern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternOutcome {
    pub success: bool,
    pub execution_time_ms: Option<f64>,
    pub row_count: Option<i64>,
    pub user_rating: Option<u8>,
}

impl PatternOutcome {
    /// Fold this use into the pattern's counters and running averages.
    ///
    /// Execution time and rating keep their own counts, so a use without a
    /// rating does not dilute the rating average.
    pub fn apply(&self, pattern: &mut SqlPattern, now: i64) {
        pattern.use_count += 1;
        if self.success {
            pattern.success_count += 1;
        }
        if let Some(ms) = self.execution_time_ms {
            pattern.execution_time_count += 1;
            pattern.avg_execution_time_ms = Some(running_average(
                pattern.avg_execution_time_ms,
                pattern.execution_time_count,
                ms,
            ));
        }
        if let Some(rating) = self.user_rating {
            pattern.rating_count += 1;
            pattern.avg_user_rating = Some(running_average(
                pattern.avg_user_rating,
                pattern.rating_count,
                f64::from(rating),
            ));
        }
        if let Some(rows) = self.row_count {
            pattern.typical_row_count = Some(rows);
        }
        pattern.last_used_at = now;
    }
}

/// A reusable pattern found for a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    /// The pattern as stored after the reuse was counted.
    pub pattern: SqlPattern,
    pub similarity: f64,
    /// Success rate the match was scored with.
    pub success_rate: f64,
    /// `0.7 · similarity + 0.3 · success_rate`
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternStats {
    pub total_patterns: usize,
    /// Mean of the per-pattern success rates.
    pub avg_success_rate: f64,
    /// Sum of `use_count` over all patterns.
    pub total_reuses: u64,
    pub estimated_llm_calls_saved: u64,
}

/// Stores and reuses previously successful question -> SQL pairs.
#[derive(Clone)]
pub struct PatternEngine {
    pub(crate) backend: Backend,
}

impl PatternEngine {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Record one use of `(tenant, question, sql)` and return its pattern id.
    ///
    /// The first call creates the pattern; later calls update its counters
    /// and running averages in place.
    pub async fn learn(&self, request: LearnRequest, cancel: &CancellationToken) -> Result<String> {
        const OP: &str = "learn_pattern";
        request.validate(OP)?;

        let id = pattern_id(&request.tenant, &request.question, &request.sql);
        let tenant = request.tenant.clone();
        let vector = self
            .backend
            .embed(OP, &tenant, &request.question, cancel)
            .await?;

        let key = id.clone();
        let stored = self
            .backend
            .store_call(OP, &tenant, cancel, Access::Write, move |store| {
                let now = now_millis();
                store.modify_pattern(&key, |current| match current {
                    Some(mut pattern) => {
                        request.outcome().apply(&mut pattern, now);
                        PatternChange::Update(pattern)
                    }
                    None => PatternChange::Insert(
                        request.new_pattern(key.clone(), now),
                        vector.clone(),
                    ),
                })
            })
            .await?;

        match stored {
            Some(pattern) if pattern.use_count == 1 => {
                info!(pattern_id = %id, tenant = %tenant, "New pattern learned");
            }
            Some(pattern) => {
                info!(
                    pattern_id = %id,
                    tenant = %tenant,
                    use_count = pattern.use_count,
                    success_count = pattern.success_count,
                    "Pattern statistics updated"
                );
            }
            None => debug!(pattern_id = %id, "Pattern write returned no row"),
        }
        Ok(id)
    }

    /// Best reusable pattern for `question` using the configured thresholds.
    pub async fn find_similar(
        &self,
        tenant: &Tenant,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<PatternMatch>> {
        let config = self.backend.config();
        self.find_similar_with(
            tenant,
            question,
            config.pattern_similarity_threshold,
            config.pattern_min_success_rate,
            cancel,
        )
        .await
    }

    /// Best reusable pattern for `question`, or `None`.
    ///
    /// Candidates below `similarity_threshold`, outside the tenant, or below
    /// `min_success_rate` are discarded, in that order. Survivors are scored
    /// `0.7 · similarity + 0.3 · success_rate`. The winner's `use_count` is
    /// incremented, since a reuse counts as a use.
    pub async fn find_similar_with(
        &self,
        tenant: &Tenant,
        question: &str,
        similarity_threshold: f64,
        min_success_rate: f64,
        cancel: &CancellationToken,
    ) -> Result<Option<PatternMatch>> {
        const OP: &str = "find_similar_pattern";
        if !tenant.is_scoped() {
            return Err(Error::TenantNotScoped { operation: OP });
        }
        if question.trim().is_empty() {
            return Err(Error::invalid(OP, "question is empty"));
        }
        for (name, value) in [
            ("similarity_threshold", similarity_threshold),
            ("min_success_rate", min_success_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::invalid(
                    OP,
                    format!("{name} must be within [0, 1], got {value}"),
                ));
            }
        }

        let candidates = self
            .candidates(OP, tenant, question, self.backend.config().pattern_candidates, cancel)
            .await?;
        let considered = candidates.len();

        let best = candidates
            .into_iter()
            .filter(|(similarity, _)| *similarity >= similarity_threshold)
            .filter(|(_, pattern)| pattern.tenant == *tenant)
            .filter(|(_, pattern)| pattern.success_rate() >= min_success_rate)
            .map(|(similarity, pattern)| {
                let success_rate = pattern.success_rate();
                let score = SIMILARITY_SHARE * similarity + (1.0 - SIMILARITY_SHARE) * success_rate;
                (score, similarity, success_rate, pattern)
            })
            // First of equal scores wins, and hits arrive nearest first
            .min_by(|a, b| by_score_desc(a.0, b.0));

        let Some((score, similarity, success_rate, pattern)) = best else {
            info!(tenant = %tenant, considered, "No reusable pattern found");
            return Ok(None);
        };

        let key = pattern.pattern_id.clone();
        let reused = self
            .backend
            .store_call(OP, tenant, cancel, Access::Write, move |store| {
                let now = now_millis();
                store.modify_pattern(&key, |current| match current {
                    Some(mut pattern) => {
                        pattern.use_count += 1;
                        pattern.last_used_at = now;
                        PatternChange::Update(pattern)
                    }
                    None => PatternChange::Skip,
                })
            })
            .await?;

        let Some(pattern) = reused else {
            warn!(pattern_id = %pattern.pattern_id, "Matched pattern was deleted before reuse");
            return Ok(None);
        };

        info!(
            pattern_id = %pattern.pattern_id,
            tenant = %tenant,
            similarity,
            success_rate,
            score,
            "Reusing learned pattern"
        );
        Ok(Some(PatternMatch {
            pattern,
            similarity,
            success_rate,
            score,
        }))
    }

    /// Nearest patterns of `tenant` for `question`, with their similarity.
    pub(crate) async fn candidates(
        &self,
        operation: &'static str,
        tenant: &Tenant,
        question: &str,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<(f64, SqlPattern)>> {
        let vector = self.backend.embed(operation, tenant, question, cancel).await?;
        let filter = VectorFilter::tenant(tenant);

        self.backend
            .store_call(operation, tenant, cancel, Access::Read, move |store| {
                let hits = store.query(Collection::Patterns, &vector, top_k, &filter)?;
                let mut found = Vec::with_capacity(hits.len());
                for hit in hits {
                    // The vector may outlive a concurrently deleted pattern row
                    if let Some(pattern) = store.get_pattern(&hit.id)? {
                        found.push((f64::from(distance_to_similarity(hit.distance)), pattern));
                    }
                }
                Ok(found)
            })
            .await
    }

    /// Fold the outcome of reusing a pattern into its statistics.
    ///
    /// An unknown id is not an error: the pattern may have been deleted
    /// concurrently. It is logged and `Ok(None)` is returned.
    pub async fn record_feedback(
        &self,
        pattern_id: &str,
        success: bool,
        user_rating: Option<u8>,
        cancel: &CancellationToken,
    ) -> Result<Option<SqlPattern>> {
        const OP: &str = "record_pattern_feedback";
        validate_rating(OP, user_rating)?;

        let outcome = PatternOutcome {
            success,
            execution_time_ms: None,
            row_count: None,
            user_rating,
        };
        let key = pattern_id.to_string();
        let updated = self
            .backend
            .store_call(OP, &Tenant::default(), cancel, Access::Write, move |store| {
                let now = now_millis();
                store.modify_pattern(&key, |current| match current {
                    Some(mut pattern) => {
                        outcome.apply(&mut pattern, now);
                        PatternChange::Update(pattern)
                    }
                    None => PatternChange::Skip,
                })
            })
            .await?;

        match &updated {
            Some(pattern) => info!(
                pattern_id,
                tenant = %pattern.tenant,
                use_count = pattern.use_count,
                success_rate = pattern.success_rate(),
                "Pattern feedback recorded"
            ),
            None => {
                let err = Error::UnknownPatternId {
                    operation: OP,
                    pattern_id: pattern_id.to_string(),
                };
                warn!(error = %err, "Pattern feedback ignored");
            }
        }
        Ok(updated)
    }

    pub async fn get_pattern(
        &self,
        pattern_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<SqlPattern>> {
        let key = pattern_id.to_string();
        self.backend
            .store_call("get_pattern", &Tenant::default(), cancel, Access::Read, move |store| {
                store.get_pattern(&key)
            })
            .await
    }

    /// Remove a pattern. Returns whether it existed.
    pub async fn delete_pattern(&self, pattern_id: &str, cancel: &CancellationToken) -> Result<bool> {
        const OP: &str = "delete_pattern";
        let key = pattern_id.to_string();
        let deleted = self
            .backend
            .store_call(OP, &Tenant::default(), cancel, Access::IdempotentWrite, move |store| {
                store.delete_pattern(&key)
            })
            .await?;
        if deleted {
            info!(pattern_id, "Pattern deleted");
        } else {
            debug!(pattern_id, "Pattern to delete not found");
        }
        Ok(deleted)
    }

    /// Aggregate statistics over all patterns, or over one tenant's.
    pub async fn stats(
        &self,
        tenant: Option<&Tenant>,
        cancel: &CancellationToken,
    ) -> Result<PatternStats> {
        const OP: &str = "pattern_stats";
        if let Some(t) = tenant
            && !t.is_scoped()
        {
            return Err(Error::TenantNotScoped { operation: OP });
        }
        let scope = tenant.cloned();
        let patterns = self
            .backend
            .store_call(
                OP,
                &scope.clone().unwrap_or_default(),
                cancel,
                Access::Read,
                move |store| store.list_patterns(scope.as_ref()),
            )
            .await?;
        Ok(summarize(&patterns))
    }
}

fn summarize(patterns: &[SqlPattern]) -> PatternStats {
    if patterns.is_empty() {
        return PatternStats::default();
    }
    let total_reuses: u64 = patterns.iter().map(|p| u64::from(p.use_count)).sum();
    let rates: Vec<f64> = patterns
        .iter()
        .filter(|p| p.use_count > 0)
        .map(SqlPattern::success_rate)
        .collect();
    let avg_success_rate = if rates.is_empty() {
        0.0
    } else {
        rates.iter().sum::<f64>() / rates.len() as f64
    };
    PatternStats {
        total_patterns: patterns.len(),
        avg_success_rate,
        total_reuses,
        estimated_llm_calls_saved: total_reuses,
    }
}
