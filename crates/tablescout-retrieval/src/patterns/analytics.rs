//! Read-only pattern analytics: suggestions, popularity, recency, failures.

use super::PatternEngine;
use crate::backend::Access;
use crate::error::{Error, Result};
use crate::results::by_score_desc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tablescout_index::{SqlPattern, Tenant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Suggestions use a looser similarity gate than reuse.
pub const SUGGESTION_SIMILARITY_THRESHOLD: f64 = 0.70;
pub const SQL_PREVIEW_CHARS: usize = 200;
pub const DEFAULT_MIN_USE_COUNT: u32 = 2;
pub const DEFAULT_RECENT_DAYS: u32 = 7;
pub const DEFAULT_MAX_FAILING_RATE: f64 = 0.5;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// A previously asked question close to the current one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeQuestion {
    pub pattern_id: String,
    pub question: String,
    /// First 200 characters of the SQL, with `...` appended when cut.
    pub sql_preview: String,
    pub similarity: f64,
    pub success_rate: f64,
    pub use_count: u32,
}

/// `sql` cut to its first characters, with `...` appended when cut.
pub fn sql_preview(sql: &str) -> String {
    if sql.chars().count() > SQL_PREVIEW_CHARS {
        let head: String = sql.chars().take(SQL_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        sql.to_string()
    }
}

impl PatternEngine {
    async fn tenant_patterns(
        &self,
        operation: &'static str,
        tenant: &Tenant,
        cancel: &CancellationToken,
    ) -> Result<Vec<SqlPattern>> {
        if !tenant.is_scoped() {
            return Err(Error::TenantNotScoped { operation });
        }
        let scoped = tenant.clone();
        self.backend
            .store_call(operation, tenant, cancel, Access::Read, move |store| {
                store.list_patterns(Some(&scoped))
            })
            .await
    }

    /// Up to `n` distinct earlier questions similar to `question`.
    ///
    /// Questions differing only in case count once; the nearest is kept.
    pub async fn suggest_alternative_questions(
        &self,
        tenant: &Tenant,
        question: &str,
        n: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<AlternativeQuestion>> {
        const OP: &str = "suggest_alternative_questions";
        if !tenant.is_scoped() {
            return Err(Error::TenantNotScoped { operation: OP });
        }
        if question.trim().is_empty() {
            return Err(Error::invalid(OP, "question is empty"));
        }
        if n == 0 {
            return Ok(Vec::new());
        }

        let candidates = self
            .candidates(OP, tenant, question, n.saturating_mul(2), cancel)
            .await?;

        let mut seen = HashSet::new();
        let suggestions: Vec<AlternativeQuestion> = candidates
            .into_iter()
            .filter(|(similarity, pattern)| {
                *similarity >= SUGGESTION_SIMILARITY_THRESHOLD && pattern.tenant == *tenant
            })
            .filter(|(_, pattern)| seen.insert(pattern.question.to_lowercase()))
            .take(n)
            .map(|(similarity, pattern)| AlternativeQuestion {
                success_rate: pattern.success_rate(),
                sql_preview: sql_preview(&pattern.sql),
                pattern_id: pattern.pattern_id,
                question: pattern.question,
                similarity,
                use_count: pattern.use_count,
            })
            .collect();

        debug!(tenant = %tenant, suggestions = suggestions.len(), "Alternative questions");
        Ok(suggestions)
    }

    /// Patterns using any of `tables`, most used first.
    pub async fn find_patterns_by_tables(
        &self,
        tenant: &Tenant,
        tables: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<SqlPattern>> {
        let mut patterns = self
            .tenant_patterns("find_patterns_by_tables", tenant, cancel)
            .await?;
        patterns.retain(|p| p.tables_used.iter().any(|t| tables.contains(t)));
        patterns.sort_by(|a, b| b.use_count.cmp(&a.use_count));
        Ok(patterns)
    }

    /// Patterns used at least `min_use_count` times, most used first.
    pub async fn find_popular_patterns(
        &self,
        tenant: &Tenant,
        limit: usize,
        min_use_count: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<SqlPattern>> {
        let mut patterns = self
            .tenant_patterns("find_popular_patterns", tenant, cancel)
            .await?;
        patterns.retain(|p| p.use_count >= min_use_count);
        patterns.sort_by(|a, b| b.use_count.cmp(&a.use_count));
        patterns.truncate(limit);
        Ok(patterns)
    }

    /// Patterns used within the last `days` days, most recent first.
    pub async fn find_recently_used_patterns(
        &self,
        tenant: &Tenant,
        days: u32,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SqlPattern>> {
        let cutoff = chrono::Utc::now().timestamp_millis() - i64::from(days) * DAY_MS;
        let mut patterns = self
            .tenant_patterns("find_recently_used_patterns", tenant, cancel)
            .await?;
        patterns.retain(|p| p.last_used_at >= cutoff);
        patterns.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        patterns.truncate(limit);
        Ok(patterns)
    }

    /// Patterns whose success rate is at most `max_success_rate`, worst first.
    /// Candidates for review or deletion.
    pub async fn identify_failing_patterns(
        &self,
        tenant: &Tenant,
        max_success_rate: f64,
        cancel: &CancellationToken,
    ) -> Result<Vec<SqlPattern>> {
        let mut patterns = self
            .tenant_patterns("identify_failing_patterns", tenant, cancel)
            .await?;
        patterns.retain(|p| p.success_rate() <= max_success_rate);
        patterns.sort_by(|a, b| by_score_desc(b.success_rate(), a.success_rate()));
        Ok(patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_preview_is_char_bounded() {
        let short = "SELECT * FROM ORDERS";
        assert_eq!(sql_preview(short), short);

        let long = format!("SELECT 주문번호 FROM ORDERS WHERE {}", "X = 1 AND ".repeat(40));
        let preview = sql_preview(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), SQL_PREVIEW_CHARS + 3);
    }
}
