//! Shared handle on the external collaborators (index store and embedding
//! provider) with per-call timeout, cancellation and retry.
//!
//! Both collaborators are synchronous, so every call runs on the blocking
//! pool. Components receive a `Backend` at construction; nothing here is
//! global.

use crate::config::RetrievalConfig;
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tablescout_embeddings::{EmbeddingError, EmbeddingModel};
use tablescout_index::{IndexStore, StoreError, Tenant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// How a store call may be retried and cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    /// Pure read: raced against cancellation, retried on retryable failure.
    Read,
    /// Write that is safe to repeat: checked for cancellation before it starts,
    /// then run to completion; retried on retryable failure.
    IdempotentWrite,
    /// Write that must run at most once: never retried, and awaited to
    /// completion rather than timed out.
    Write,
}

#[derive(Clone)]
pub struct Backend {
    store: Arc<IndexStore>,
    embedder: Arc<dyn EmbeddingModel>,
    config: Arc<RetrievalConfig>,
}

impl Backend {
    /// Fails when the embedder and the store disagree on the vector dimension.
    pub fn new(
        store: Arc<IndexStore>,
        embedder: Arc<dyn EmbeddingModel>,
        config: RetrievalConfig,
    ) -> Result<Self> {
        config.validate()?;
        if embedder.dimension() != store.dimension() {
            return Err(Error::Config {
                field: "embedding_dimension".to_string(),
                message: format!(
                    "embedding provider produces {} dimensions, index stores {}",
                    embedder.dimension(),
                    store.dimension()
                ),
            });
        }
        Ok(Self {
            store,
            embedder,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    /// Embed `text` for `operation`, with timeout and retry.
    pub(crate) async fn embed(
        &self,
        operation: &'static str,
        tenant: &Tenant,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::invalid(operation, "text to embed is empty"));
        }
        let text: Arc<str> = Arc::from(text);
        let embedder = Arc::clone(&self.embedder);
        let expected = self.store.dimension();

        let vector = self
            .with_retry(operation, tenant, cancel, true, move || {
                let text = Arc::clone(&text);
                let embedder = Arc::clone(&embedder);
                self.run_blocking(
                    operation,
                    tenant,
                    cancel,
                    true,
                    Some(self.config.embedding_timeout()),
                    move || embedder.embed(&text),
                    move |message| Error::EmbeddingUnavailable {
                        operation,
                        tenant: tenant.to_string(),
                        message,
                    },
                    move |err: EmbeddingError| Error::from_embedding(operation, tenant, err),
                )
            })
            .await?;

        check_dimension(operation, tenant, expected, &vector)?;
        Ok(vector)
    }

    /// Embed several texts in one provider call, with timeout and retry.
    ///
    /// Vectors come back in the order of `texts`.
    pub(crate) async fn embed_batch(
        &self,
        operation: &'static str,
        tenant: &Tenant,
        texts: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|text| text.trim().is_empty()) {
            return Err(Error::invalid(operation, "text to embed is empty"));
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let count = texts.len();
        let texts: Arc<[String]> = Arc::from(texts);
        let embedder = Arc::clone(&self.embedder);
        let expected = self.store.dimension();

        let vectors = self
            .with_retry(operation, tenant, cancel, true, move || {
                let texts = Arc::clone(&texts);
                let embedder = Arc::clone(&embedder);
                self.run_blocking(
                    operation,
                    tenant,
                    cancel,
                    true,
                    Some(self.config.embedding_timeout()),
                    move || embedder.embed_batch(&texts),
                    move |message| Error::EmbeddingUnavailable {
                        operation,
                        tenant: tenant.to_string(),
                        message,
                    },
                    move |err: EmbeddingError| Error::from_embedding(operation, tenant, err),
                )
            })
            .await?;

        if vectors.len() != count {
            return Err(Error::Internal {
                operation,
                tenant: tenant.to_string(),
                message: format!("provider returned {} vectors for {count} texts", vectors.len()),
            });
        }
        for vector in &vectors {
            check_dimension(operation, tenant, expected, vector)?;
        }
        Ok(vectors)
    }

    /// Run `f` against the store for `operation`, with timeout and retry.
    pub(crate) async fn store_call<T, F>(
        &self,
        operation: &'static str,
        tenant: &Tenant,
        cancel: &CancellationToken,
        access: Access,
        f: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&IndexStore) -> Result<T, StoreError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let retry = access != Access::Write;
        let race_cancel = access == Access::Read;
        // A timed-out write still commits on the blocking pool, so an
        // at-most-once write is awaited to completion instead.
        let timeout = (access != Access::Write).then(|| self.config.index_timeout());

        self.with_retry(operation, tenant, cancel, retry, move || {
            let f = Arc::clone(&f);
            let store = Arc::clone(&self.store);
            self.run_blocking(
                operation,
                tenant,
                cancel,
                race_cancel,
                timeout,
                move || (*f)(&store),
                move |message| Error::IndexUnavailable {
                    operation,
                    tenant: tenant.to_string(),
                    message,
                },
                move |err: StoreError| Error::from_store(operation, tenant, err),
            )
        })
        .await
    }

    async fn with_retry<T, Fut, A>(
        &self,
        operation: &'static str,
        tenant: &Tenant,
        cancel: &CancellationToken,
        retry: bool,
        mut attempt_fn: A,
    ) -> Result<T>
    where
        A: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::cancelled(operation, tenant));
            }

            match attempt_fn().await {
                Err(err) if retry && err.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.backoff(attempt);
                    warn!(
                        operation,
                        tenant = %tenant,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying external call"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::cancelled(operation, tenant)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_blocking<T, E, F>(
        &self,
        operation: &'static str,
        tenant: &Tenant,
        cancel: &CancellationToken,
        race_cancel: bool,
        timeout: Option<Duration>,
        f: F,
        unavailable: impl FnOnce(String) -> Error,
        map_err: impl FnOnce(E) -> Error,
    ) -> Result<T>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let call = async move {
            let task = tokio::task::spawn_blocking(f);
            match timeout {
                Some(limit) => tokio::time::timeout(limit, task).await.map_err(|_| limit),
                None => Ok(task.await),
            }
        };

        let outcome = if race_cancel {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::cancelled(operation, tenant)),
                outcome = call => outcome,
            }
        } else {
            call.await
        };

        match outcome {
            Err(limit) => Err(unavailable(format!(
                "timed out after {} ms",
                limit.as_millis()
            ))),
            Ok(Err(join_err)) => Err(unavailable(format!("blocking task failed: {join_err}"))),
            Ok(Ok(result)) => result.map_err(map_err),
        }
    }
}

fn check_dimension(
    operation: &'static str,
    tenant: &Tenant,
    expected: usize,
    vector: &[f32],
) -> Result<()> {
    if vector.len() != expected {
        return Err(Error::from_embedding(
            operation,
            tenant,
            EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            },
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyEmbedder {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    impl EmbeddingModel for FlakyEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(EmbeddingError::Unavailable("connection refused".to_string()));
            }
            Ok(vec![1.0, 0.0, 0.0, 0.0])
        }

        fn dimension(&self) -> usize {
            4
        }
    }

    fn backend_with(embedder: Arc<dyn EmbeddingModel>, config: RetrievalConfig) -> Backend {
        let store = Arc::new(IndexStore::open_in_memory(4).unwrap());
        Backend::new(store, embedder, config).unwrap()
    }

    fn fast_config() -> RetrievalConfig {
        RetrievalConfig {
            retry_backoff_ms: 1,
            embedding_dimension: 4,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_embed_retries_transient_failure() {
        let embedder = Arc::new(FlakyEmbedder {
            failures_left: AtomicUsize::new(2),
            calls: AtomicUsize::new(0),
        });
        let backend = backend_with(embedder.clone(), fast_config());
        let tenant = Tenant::new("DB", "S");

        let vector = backend
            .embed("search", &tenant, "orders", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(vector.len(), 4);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_embed_gives_up_after_max_retries() {
        let embedder = Arc::new(FlakyEmbedder {
            failures_left: AtomicUsize::new(10),
            calls: AtomicUsize::new(0),
        });
        let backend = backend_with(embedder.clone(), fast_config());
        let tenant = Tenant::new("DB", "S");

        let err = backend
            .embed("search", &tenant, "orders", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmbeddingUnavailable { .. }));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let embedder = Arc::new(FlakyEmbedder {
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let backend = backend_with(embedder.clone(), fast_config());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = backend
            .store_call(
                "stats",
                &Tenant::new("DB", "S"),
                &cancel,
                Access::Read,
                |store| store.get_stats().map(|s| s.table_count),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
    }

    fn steady_embedder() -> Arc<FlakyEmbedder> {
        Arc::new(FlakyEmbedder {
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    fn slow_index_config() -> RetrievalConfig {
        RetrievalConfig {
            index_timeout_ms: 50,
            ..fast_config()
        }
    }

    #[tokio::test]
    async fn test_slow_read_times_out() {
        let backend = backend_with(steady_embedder(), slow_index_config());

        let err = backend
            .store_call(
                "stats",
                &Tenant::new("DB", "S"),
                &CancellationToken::new(),
                Access::Read,
                |store| {
                    std::thread::sleep(Duration::from_millis(120));
                    store.get_stats().map(|s| s.table_count)
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IndexUnavailable { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_slow_write_runs_once_to_completion() {
        let backend = backend_with(steady_embedder(), slow_index_config());
        let commits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&commits);

        let committed = backend
            .store_call(
                "learn",
                &Tenant::new("DB", "S"),
                &CancellationToken::new(),
                Access::Write,
                move |_store| {
                    std::thread::sleep(Duration::from_millis(150));
                    Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
                },
            )
            .await
            .unwrap();
        assert_eq!(committed, 1);
        assert_eq!(commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_embed_batch_keeps_order() {
        let embedder = steady_embedder();
        let backend = backend_with(embedder.clone(), fast_config());
        let tenant = Tenant::new("DB", "S");
        let cancel = CancellationToken::new();

        let vectors = backend
            .embed_batch(
                "index_table",
                &tenant,
                vec!["orders".to_string(), "status".to_string()],
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|v| v.len() == 4));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

        assert!(
            backend
                .embed_batch("index_table", &tenant, Vec::new(), &cancel)
                .await
                .unwrap()
                .is_empty()
        );
        let err = backend
            .embed_batch("index_table", &tenant, vec![" ".to_string()], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let store = Arc::new(IndexStore::open_in_memory(8).unwrap());
        let embedder = Arc::new(FlakyEmbedder {
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        assert!(matches!(
            Backend::new(store, embedder, RetrievalConfig::default()),
            Err(Error::Config { .. })
        ));
    }
}
