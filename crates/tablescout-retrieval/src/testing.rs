//! Fixtures shared by the unit tests of this crate.

use crate::backend::Backend;
use crate::config::RetrievalConfig;
use crate::indexer::{column_entity_id, table_entity_id};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tablescout_embeddings::{EmbeddingError, EmbeddingModel};
use tablescout_index::{
    ColumnAttributes, EntryAttributes, IndexStore, TableAttributes, Tenant, VectorEntry,
    VectorIndex,
};

pub(crate) const DIM: usize = 4;

/// Embedder returning hand-picked vectors for known texts.
///
/// Unknown texts map to a fixed fallback direction.
#[derive(Default)]
pub(crate) struct FixtureEmbedder {
    vectors: Mutex<HashMap<String, Vec<f32>>>,
}

impl FixtureEmbedder {
    pub(crate) fn set(&self, text: &str, vector: [f32; DIM]) {
        if let Ok(mut vectors) = self.vectors.lock() {
            vectors.insert(text.to_string(), unit(vector));
        }
    }
}

impl EmbeddingModel for FixtureEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        let vectors = self
            .vectors
            .lock()
            .map_err(|_| EmbeddingError::Unavailable("fixture lock poisoned".to_string()))?;
        Ok(vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| unit([0.0, 0.0, 0.0, 1.0])))
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

pub(crate) fn unit(v: [f32; DIM]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / norm).collect()
}

/// Unit vector whose L2 distance to `[1, 0, 0, 0]` yields `similarity`.
pub(crate) fn at_similarity(similarity: f32) -> [f32; DIM] {
    // distance = 2(1 - s); for unit vectors d^2 = 2 - 2cos, so cos = 1 - d^2 / 2
    let distance = 2.0 * (1.0 - similarity);
    let cos = 1.0 - distance * distance / 2.0;
    let sin = (1.0 - cos * cos).max(0.0).sqrt();
    [cos, sin, 0.0, 0.0]
}

pub(crate) fn tenant_a() -> Tenant {
    Tenant::new("SMVNPDB", "INFINITY21_JSMES")
}

pub(crate) fn tenant_b() -> Tenant {
    Tenant::new("OTHERDB", "INFINITY21_JSMES")
}

pub(crate) struct Fixture {
    pub(crate) store: Arc<IndexStore>,
    pub(crate) embedder: Arc<FixtureEmbedder>,
    pub(crate) backend: Backend,
}

pub(crate) fn fixture() -> Fixture {
    fixture_with(RetrievalConfig::default())
}

pub(crate) fn fixture_with(config: RetrievalConfig) -> Fixture {
    let store = Arc::new(IndexStore::open_in_memory(DIM).unwrap());
    let embedder = Arc::new(FixtureEmbedder::default());
    let config = RetrievalConfig {
        embedding_dimension: DIM,
        retry_backoff_ms: 1,
        ..config
    };
    let backend = Backend::new(store.clone(), embedder.clone(), config).unwrap();
    Fixture {
        store,
        embedder,
        backend,
    }
}

impl Fixture {
    pub(crate) fn add_table(&self, tenant: &Tenant, name: &str, vector: [f32; DIM]) {
        self.store
            .upsert(&VectorEntry {
                id: table_entity_id(tenant, name),
                tenant: tenant.clone(),
                vector: unit(vector),
                document: format!("Table: {name}"),
                attributes: EntryAttributes::Table(TableAttributes {
                    table_name: name.to_string(),
                    ..Default::default()
                }),
            })
            .unwrap();
    }

    pub(crate) fn add_column(&self, tenant: &Tenant, table: &str, column: &str, vector: [f32; DIM]) {
        self.store
            .upsert(&VectorEntry {
                id: column_entity_id(tenant, table, column),
                tenant: tenant.clone(),
                vector: unit(vector),
                document: format!("Column: {table}.{column}"),
                attributes: EntryAttributes::Column(ColumnAttributes {
                    table_name: table.to_string(),
                    column_name: column.to_string(),
                    ..Default::default()
                }),
            })
            .unwrap();
    }
}
