//! Pure weight derivation from the feedback ledger.
//!
//! Nothing here touches storage: `WeightCalculator` folds ledger entries into
//! per-table and per-column tallies and turns them into a weight snapshot.
//! Feeding the same entries in the same order always yields the same snapshot.

use std::collections::{BTreeMap, BTreeSet};
use tablescout_index::{ColumnWeight, FeedbackAction, LedgerEntry, TableWeight, Tenant};

pub const MIN_WEIGHT: f64 = 0.2;
pub const MAX_WEIGHT: f64 = 1.5;
/// Weight of an entity that has no feedback.
pub const NEUTRAL_WEIGHT: f64 = 1.0;

const BASE_WEIGHT: f64 = 0.5;
const APPROVAL_BONUS: f64 = 0.15;
const REJECTION_PENALTY: f64 = 0.10;
const CONFIDENCE_FACTOR: f64 = 0.05;
const FREQUENCY_BONUS: f64 = 0.02;
const FREQUENCY_CAP: u32 = 10;

/// `clip(0.5 + 0.15·approvals − 0.10·rejections + 0.05·avg_confidence, 0.2, 1.5)`
pub fn table_weight(approvals: u32, rejections: u32, average_confidence: f64) -> f64 {
    clip(base_score(approvals, rejections, average_confidence))
}

/// Table formula plus `0.02·min(frequency, 10)`, clipped to the same range.
pub fn column_weight(approvals: u32, rejections: u32, average_confidence: f64, frequency: u32) -> f64 {
    clip(
        base_score(approvals, rejections, average_confidence)
            + FREQUENCY_BONUS * f64::from(frequency.min(FREQUENCY_CAP)),
    )
}

fn base_score(approvals: u32, rejections: u32, average_confidence: f64) -> f64 {
    BASE_WEIGHT + APPROVAL_BONUS * f64::from(approvals) - REJECTION_PENALTY * f64::from(rejections)
        + CONFIDENCE_FACTOR * average_confidence
}

fn clip(weight: f64) -> f64 {
    if weight.is_nan() {
        return NEUTRAL_WEIGHT;
    }
    weight.clamp(MIN_WEIGHT, MAX_WEIGHT)
}

#[derive(Debug, Default, Clone)]
struct Tally {
    approvals: u32,
    rejections: u32,
    modifications: u32,
    /// Generations referencing the entity, answered or not.
    occurrences: u32,
    responses: u32,
    confidence_sum: f64,
    last_updated: i64,
}

impl Tally {
    fn record(&mut self, entry: &LedgerEntry) {
        self.occurrences += 1;
        self.last_updated = self.last_updated.max(entry.generation.created_at);

        if let Some(response) = &entry.response {
            self.responses += 1;
            match response.action {
                FeedbackAction::Approve => self.approvals += 1,
                FeedbackAction::Reject => self.rejections += 1,
                FeedbackAction::Modify => self.modifications += 1,
            }
            self.confidence_sum += response.user_confidence;
            self.last_updated = self.last_updated.max(response.responded_at);
        }
    }

    /// Confidence sum over every occurrence; unanswered generations count as 0.
    fn average_confidence(&self) -> f64 {
        if self.occurrences == 0 {
            0.0
        } else {
            self.confidence_sum / f64::from(self.occurrences)
        }
    }
}

/// Derived weights for one tenant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeightSnapshot {
    pub tables: Vec<TableWeight>,
    pub columns: Vec<ColumnWeight>,
}

/// Folds ledger entries of one tenant into a [`WeightSnapshot`].
pub struct WeightCalculator {
    tenant: Tenant,
    tables: BTreeMap<String, Tally>,
    columns: BTreeMap<(String, String), Tally>,
    skipped: usize,
}

impl WeightCalculator {
    pub fn new(tenant: Tenant) -> Self {
        Self {
            tenant,
            tables: BTreeMap::new(),
            columns: BTreeMap::new(),
            skipped: 0,
        }
    }

    pub fn add(&mut self, entry: &LedgerEntry) {
        let generation = &entry.generation;
        let table = generation.selected_table.trim();
        if generation.tenant != self.tenant || table.is_empty() {
            self.skipped += 1;
            return;
        }

        self.tables.entry(table.to_string()).or_default().record(entry);

        let columns: BTreeSet<&str> = generation
            .selected_columns
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();
        for column in columns {
            self.columns
                .entry((table.to_string(), column.to_string()))
                .or_default()
                .record(entry);
        }
    }

    /// Entries ignored because they had no table or belonged to another tenant.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Entities whose generations never received a response are left out, so
    /// they keep the neutral weight.
    pub fn finish(self) -> WeightSnapshot {
        let tenant = self.tenant;

        let tables = self
            .tables
            .into_iter()
            .filter(|(_, tally)| tally.responses > 0)
            .map(|(table_name, tally)| {
                let average_confidence = tally.average_confidence();
                TableWeight {
                    tenant: tenant.clone(),
                    table_name,
                    approval_count: tally.approvals,
                    rejection_count: tally.rejections,
                    modify_count: tally.modifications,
                    total_feedback: tally.occurrences,
                    average_confidence,
                    calculated_weight: table_weight(
                        tally.approvals,
                        tally.rejections,
                        average_confidence,
                    ),
                    last_updated: tally.last_updated,
                }
            })
            .collect();

        let columns = self
            .columns
            .into_iter()
            .filter(|(_, tally)| tally.responses > 0)
            .map(|((table_name, column_name), tally)| {
                let average_confidence = tally.average_confidence();
                ColumnWeight {
                    tenant: tenant.clone(),
                    table_name,
                    column_name,
                    approval_count: tally.approvals,
                    rejection_count: tally.rejections,
                    modify_count: tally.modifications,
                    frequency: tally.occurrences,
                    average_confidence,
                    calculated_weight: column_weight(
                        tally.approvals,
                        tally.rejections,
                        average_confidence,
                        tally.occurrences,
                    ),
                    last_updated: tally.last_updated,
                }
            })
            .collect();

        WeightSnapshot { tables, columns }
    }
}
