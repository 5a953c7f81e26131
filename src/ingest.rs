//! Document ingestion: chunk, embed, index.
//!
//! [`Ingestor::ingest`] processes one document end to end.
//! [`Ingestor::ingest_batch`] fans a batch out over a bounded pool of
//! tasks (a `tokio::sync::Semaphore` sized by `ingest.concurrency`) and
//! reports per-document outcomes; one failure never aborts the batch.
//!
//! # Steps
//!
//! 1. Split the content with the configured [`Chunker`].
//! 2. Embed the content unless the document already carries an embedding.
//! 3. Upsert the document, then replace its chunks.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::guard;
use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result, Stage, StageExt};
use crate::models::Document;
use crate::store::VectorStore;

/// Result of ingesting a single document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub document_id: String,
    pub chunks: usize,
    /// Whether the provider was called for this document.
    pub embedded: bool,
}

#[derive(Debug)]
pub struct IngestFailure {
    pub document_id: String,
    pub error: RagError,
}

/// Per-document results of a batch, each list in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<IngestOutcome>,
    pub failed: Vec<IngestFailure>,
    pub elapsed_ms: u64,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

#[derive(Clone)]
pub struct Ingestor {
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    concurrency: usize,
}

impl Ingestor {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        concurrency: usize,
    ) -> Result<Self> {
        if concurrency == 0 {
            return Err(RagError::Validation("ingest concurrency must be >= 1".into()));
        }
        Ok(Self {
            chunker,
            embedder,
            store,
            concurrency,
        })
    }

    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        let chunker = Chunker::from_config(&config.chunking)?;
        Self::new(chunker, embedder, store, config.ingest.concurrency)
    }

    pub async fn ingest(&self, mut doc: Document, cancel: &CancellationToken) -> Result<IngestOutcome> {
        let chunks = self.chunker.chunk(&doc.id, &doc.content);
        let chunk_count = chunks.len();

        let embedded = doc.embedding.is_none();
        if embedded {
            let vector = guard(cancel, None, self.embedder.embed(&doc.content))
                .await
                .stage(Stage::Embed)?;
            doc.embedding = Some(vector);
        }

        let id = doc.id.clone();
        guard(cancel, None, async {
            self.store.upsert_document(doc).await?;
            self.store.replace_chunks(&id, chunks).await
        })
        .await
        .stage(Stage::Ingest)?;

        debug!(document_id = %id, chunks = chunk_count, embedded, "document ingested");
        Ok(IngestOutcome {
            document_id: id,
            chunks: chunk_count,
            embedded,
        })
    }

    /// Ingest `docs` with at most `concurrency` documents in flight.
    pub async fn ingest_batch(&self, docs: Vec<Document>, cancel: &CancellationToken) -> BatchReport {
        let started = Instant::now();
        let total = docs.len();
        let permits = Arc::new(Semaphore::new(self.concurrency));

        let handles: Vec<_> = docs
            .into_iter()
            .map(|doc| {
                let ingestor = self.clone();
                let permits = permits.clone();
                let cancel = cancel.clone();
                let document_id = doc.id.clone();
                let handle = tokio::spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| RagError::CapacityExceeded("ingest worker pool closed".into()))?;
                    ingestor.ingest(doc, &cancel).await
                });
                (document_id, handle)
            })
            .collect();

        let mut report = BatchReport::default();
        for (document_id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(RagError::Provider(format!("ingest task failed: {}", e)).at(Stage::Ingest)),
            };
            match result {
                Ok(outcome) => report.succeeded.push(outcome),
                Err(error) => {
                    warn!(document_id = %document_id, error = %error, "document ingestion failed");
                    report.failed.push(IngestFailure { document_id, error });
                }
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            total,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            elapsed_ms = report.elapsed_ms,
            "batch ingestion finished"
        );
        report
    }
}
