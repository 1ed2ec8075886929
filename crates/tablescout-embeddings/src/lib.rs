pub mod model;

pub use model::{
    EmbeddingConfig, EmbeddingError, EmbeddingModel, HashingEmbeddingModel, create_embedding_model,
};

/// Default embedding dimension (matches MiniLM-sized vectors used by the metadata index).
pub const EMBEDDING_DIM: usize = 384;
