//! Feedback-weighted table and column retrieval with SQL pattern reuse.
//!
//! Every component receives a [`Backend`] (index store, embedding provider
//! and configuration) at construction. Nothing is global.

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod indexer;
pub mod patterns;
pub mod pipeline;
pub mod results;

#[cfg(test)]
mod testing;

pub use backend::Backend;
pub use config::RetrievalConfig;
pub use engine::RetrievalEngine;
pub use error::{Error, Result};
pub use feedback::{FeedbackService, NewExecution, NewGeneration, NewResponse, WeightSnapshot};
pub use indexer::{ColumnMetadata, IndexedTable, MetadataIndexer, TableMetadata};
pub use patterns::{LearnRequest, PatternEngine, PatternMatch, PatternStats};
pub use pipeline::{Pipeline, RetrievalPlan, Stage2Result, TableDetail};
pub use results::{ColumnMatch, SearchResults, TableMatch, WeightedColumn, WeightedTable};
