//! CLI command implementations for TableScout

pub mod common;
mod feedback;
mod index_table;
pub mod patterns;
mod search;
mod stats;
mod weights;

pub use feedback::feedback_summary;
pub use index_table::index_table;
pub use patterns::patterns;
pub use search::{search_columns, search_tables};
pub use stats::stats;
pub use weights::{recompute_weights, weights};
