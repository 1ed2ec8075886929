pub mod error;
pub mod schema;
pub mod store;
pub mod tenant;
pub mod vector;

pub use error::{Result, StoreError};
pub use schema::{
    ATTRIBUTES_VERSION, Collection, ColumnAttributes, ColumnWeight, EntryAttributes,
    ExecutionEvent, ExecutionStatus, FeedbackAction, GenerationEvent, LedgerEntry, LedgerWrite,
    PatternAttributes, PatternChange, ResponseEvent, SqlPattern, StoredEntry, TableAttributes,
    TableWeight, VectorEntry, VectorFilter, VectorHit,
};
pub use store::{IndexStats, IndexStore};
pub use tenant::Tenant;
pub use vector::{VectorIndex, distance_to_similarity};
