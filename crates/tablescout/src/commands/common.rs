//! Shared wiring for CLI commands: database path, tenant arguments and the
//! retrieval services built on one backend.

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tablescout_embeddings::{EmbeddingConfig, create_embedding_model};
use tablescout_index::{IndexStore, Tenant};
use tablescout_retrieval::{
    Backend, FeedbackService, MetadataIndexer, PatternEngine, RetrievalConfig, RetrievalEngine,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default database filename
pub const DEFAULT_DB_NAME: &str = ".tablescout.db";

/// Returns the database path, using the provided path or defaulting to
/// `DEFAULT_DB_NAME` in `dir`.
pub fn resolve_db_path(database: Option<PathBuf>, dir: &Path) -> PathBuf {
    database.unwrap_or_else(|| dir.join(DEFAULT_DB_NAME))
}

/// Reads the retrieval configuration, falling back to defaults.
pub fn load_config(path: Option<&Path>) -> Result<RetrievalConfig> {
    match path {
        Some(path) => RetrievalConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path)),
        None => Ok(RetrievalConfig::default()),
    }
}

/// Database and schema every tenant-scoped command requires.
#[derive(Args, Debug, Clone)]
pub struct TenantArgs {
    /// Database identifier
    #[arg(long)]
    pub db: String,

    /// Schema name
    #[arg(long)]
    pub schema: String,
}

impl TenantArgs {
    pub fn tenant(&self) -> Tenant {
        Tenant::new(self.db.trim(), self.schema.trim())
    }
}

/// Retrieval components sharing one backend.
pub struct Services {
    pub db_path: PathBuf,
    pub store: Arc<IndexStore>,
    pub engine: RetrievalEngine,
    pub indexer: MetadataIndexer,
    pub feedback: FeedbackService,
    pub patterns: PatternEngine,
    pub cancel: CancellationToken,
}

impl Services {
    /// Open the store and build the services.
    ///
    /// Unless `create` is set, a missing database is an error rather than
    /// an empty index.
    pub fn open(database: Option<PathBuf>, config: Option<PathBuf>, create: bool) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let db_path = resolve_db_path(database, &cwd);
        if !create && !db_path.exists() {
            anyhow::bail!(
                "Database not found: {:?}. Run 'tablescout index-table' first.",
                db_path
            );
        }

        let config = load_config(config.as_deref())?;
        let embedder = create_embedding_model(Some(EmbeddingConfig {
            dimension: config.embedding_dimension,
            ..Default::default()
        }));
        let store = Arc::new(
            IndexStore::open(&db_path, config.embedding_dimension)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );
        debug!(path = ?db_path, dimension = config.embedding_dimension, "Store opened");

        let backend = Backend::new(Arc::clone(&store), embedder, config)
            .context("Failed to initialize retrieval backend")?;

        Ok(Self {
            db_path,
            store,
            engine: RetrievalEngine::new(backend.clone()),
            indexer: MetadataIndexer::new(backend.clone()),
            feedback: FeedbackService::new(backend.clone()),
            patterns: PatternEngine::new(backend),
            cancel: cancel_on_ctrl_c(),
        })
    }
}

/// A token cancelled when the process receives Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}
