//! Reports over learned SQL patterns

use anyhow::{Context, Result};
use clap::ValueEnum;
use tablescout_index::{SqlPattern, Tenant};
use tablescout_retrieval::patterns::{
    DEFAULT_MAX_FAILING_RATE, DEFAULT_MIN_USE_COUNT, DEFAULT_RECENT_DAYS, sql_preview,
};

use super::common::Services;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PatternReport {
    /// Most reused patterns
    Popular,
    /// Patterns whose success rate is too low to be reused
    Failing,
    /// Patterns used in the last week
    Recent,
}

fn print_pattern(pattern: &SqlPattern) {
    println!("{}  {}", pattern.pattern_id, pattern.question);
    println!(
        "   used {} times, success {:.0}%, tables: {}",
        pattern.use_count,
        pattern.success_rate() * 100.0,
        pattern.tables_used.join(", ")
    );
    println!("   SQL: {}", sql_preview(&pattern.sql).replace('\n', " "));
    println!();
}

pub async fn patterns(
    services: &Services,
    tenant: &Tenant,
    report: PatternReport,
    limit: usize,
) -> Result<()> {
    let cancel = &services.cancel;
    let engine = &services.patterns;
    let (title, patterns) = match report {
        PatternReport::Popular => (
            "Popular patterns",
            engine
                .find_popular_patterns(tenant, limit, DEFAULT_MIN_USE_COUNT, cancel)
                .await,
        ),
        PatternReport::Failing => (
            "Failing patterns",
            engine
                .identify_failing_patterns(tenant, DEFAULT_MAX_FAILING_RATE, cancel)
                .await
                .map(|mut patterns| {
                    patterns.truncate(limit);
                    patterns
                }),
        ),
        PatternReport::Recent => (
            "Recently used patterns",
            engine
                .find_recently_used_patterns(tenant, DEFAULT_RECENT_DAYS, limit, cancel)
                .await,
        ),
    };
    let patterns = patterns.context("Failed to read patterns")?;

    println!("{} in {}", title, tenant);
    println!("==========================");
    if patterns.is_empty() {
        println!("  (none)");
    }
    for pattern in &patterns {
        print_pattern(pattern);
    }
    Ok(())
}
