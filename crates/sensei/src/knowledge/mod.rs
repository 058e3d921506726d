//! Knowledge Integration Layer
//!
//! Turns registered certification material into a queryable knowledge base:
//! detect the content type, extract text, chunk it, embed every chunk, and
//! write vectors + chunk rows. Processing is all-or-nothing from the
//! registry's point of view: a run that fails anywhere issues compensating
//! deletes for whatever it wrote, marks the content `failed` with the error
//! recorded verbatim, and leaves zero chunks behind.

pub mod chunker;
pub mod content_type;
pub mod embedding;
pub mod vector_store;

pub use chunker::{chunk_document, ChunkPiece, ChunkingStrategy};
pub use content_type::{detect, extract_text, ContentType};
pub use embedding::{embed_with_retry, EmbeddingProvider, HashEmbedder};
pub use vector_store::{
    build_vector_store, ChromaVectorStore, InMemoryVectorStore, VectorEntry, VectorMatch,
    VectorStore,
};

use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ChunkingConfig, EmbeddingConfig, PipelineConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::registry::{
    CertificationContent, ChunkId, ContentChunk, ContentId, ContentRegistry, ContentStatus,
};
use crate::sync::{with_deadline, KeyedMutex};

/// Outcome of a successful `process` run
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub content_id: ContentId,
    pub content_type: ContentType,
    pub chunks_written: usize,
    /// Non-fatal notes, e.g. embeddings that needed retries
    pub errors: Vec<String>,
}

/// Drives content through detect → extract → chunk → embed → write.
///
/// A per-content lock plus the registry's compare-and-swap keeps two
/// concurrent `process` calls for one content from both running; the loser
/// sees a non-processable status and fails with `InvalidState`.
pub struct KnowledgeIntegrator {
    registry: ContentRegistry,
    embedder: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    chunking: ChunkingConfig,
    embedding: EmbeddingConfig,
    embed_timeout: Duration,
    locks: KeyedMutex<ContentId>,
}

impl KnowledgeIntegrator {
    pub fn new(
        registry: ContentRegistry,
        embedder: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStore>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            registry,
            embedder,
            vector_store,
            chunking: config.chunking.clone(),
            embedding: config.embedding.clone(),
            embed_timeout: Duration::from_secs(config.timeouts.embed_secs),
            locks: KeyedMutex::new(),
        }
    }

    /// Override the embedding-stage timeout (primarily for tests and tuning).
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    /// Process a registered (or failed, for retry) content end to end.
    pub async fn process(&self, content_id: ContentId) -> PipelineResult<ProcessingResult> {
        self.process_cancellable(content_id, &CancellationToken::new())
            .await
    }

    /// [`process`](Self::process) with a cancellation token, honored at phase
    /// boundaries before any vector write begins.
    pub async fn process_cancellable(
        &self,
        content_id: ContentId,
        cancel: &CancellationToken,
    ) -> PipelineResult<ProcessingResult> {
        let _guard = self.locks.lock(content_id).await;

        let content = self.registry.get(content_id).await?;
        if !matches!(
            content.status,
            ContentStatus::Registered | ContentStatus::Failed
        ) {
            return Err(PipelineError::invalid_state(format!(
                "content {content_id} is {}; only registered or failed content can be processed",
                content.status
            )));
        }
        self.registry
            .update_status(content_id, ContentStatus::Processing, None)
            .await?;

        // A run that died without finalizing can leave rows and vectors
        // behind
        if let Err(err) = self.clear_stale(content_id).await {
            return self.fail(content_id, err).await;
        }

        let (content_type, pieces) = match self.stage_pieces(&content, cancel).await {
            Ok(staged) => staged,
            Err(err) => return self.fail(content_id, err).await,
        };
        let (chunks, errors) = match self.embed_pieces(content_id, pieces, content_type).await {
            Ok(embedded) => embedded,
            Err(err) => return self.fail(content_id, err).await,
        };
        if cancel.is_cancelled() {
            let err = PipelineError::cancelled(format!(
                "processing of content {content_id} was cancelled"
            ));
            return self.fail(content_id, err).await;
        }

        if let Err(err) = self.commit(&chunks).await {
            self.rollback(content_id, &chunks).await;
            return self.fail(content_id, err).await;
        }
        if let Err(err) = self
            .registry
            .update_status(content_id, ContentStatus::Processed, None)
            .await
        {
            self.rollback(content_id, &chunks).await;
            return self.fail(content_id, err).await;
        }

        info!(
            content_id = %content_id,
            %content_type,
            chunks = chunks.len(),
            retried = errors.len(),
            "content processed"
        );
        Ok(ProcessingResult {
            content_id,
            content_type,
            chunks_written: chunks.len(),
            errors,
        })
    }

    /// Embed `query` and rank stored chunk vectors against it.
    pub async fn search(&self, query: &str, top_k: usize) -> PipelineResult<Vec<VectorMatch>> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let backoff = Duration::from_millis(self.embedding.retry_backoff_ms);
        let (vector, _) = embed_with_retry(
            self.embedder.as_ref(),
            query,
            self.embedding.max_retries,
            backoff,
        )
        .await?;
        let matches = self.vector_store.query(&vector, top_k).await?;
        debug!(top_k, hits = matches.len(), "similarity search");
        Ok(matches)
    }

    /// Purge chunk rows and vectors left by a run that died without
    /// finalizing, so reprocessing starts clean and `search` cannot serve
    /// orphans. Vectors first: a failed vector delete leaves the rows for
    /// the next attempt to find.
    async fn clear_stale(&self, content_id: ContentId) -> PipelineResult<()> {
        let stale = self.registry.chunk_ids(content_id).await?;
        if stale.is_empty() {
            return Ok(());
        }
        self.vector_store.delete(&stale).await?;
        let removed = self.registry.delete_chunks(content_id).await?;
        warn!(content_id = %content_id, rows = removed, "cleared stale chunks before reprocessing");
        Ok(())
    }

    /// Read, detect, extract, and chunk. Nothing is written yet, so errors
    /// here need no compensation beyond the status change.
    async fn stage_pieces(
        &self,
        content: &CertificationContent,
        cancel: &CancellationToken,
    ) -> PipelineResult<(ContentType, Vec<ChunkPiece>)> {
        let path = Path::new(&content.source_path);
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            PipelineError::invalid_source(&content.source_path, e.to_string())
        })?;

        let content_type = detect(path, &bytes)?;
        debug!(content_id = %content.id, %content_type, bytes = bytes.len(), "detected content type");
        let text = extract_text(content_type, &bytes)?;

        if cancel.is_cancelled() {
            return Err(PipelineError::cancelled(format!(
                "processing of content {} was cancelled",
                content.id
            )));
        }
        let pieces = chunk_document(&text, content_type, &self.chunking)?;
        Ok((content_type, pieces))
    }

    /// Embed every piece with bounded concurrency, order preserved, under
    /// the embedding-stage timeout. Rate-limit retries happen per piece
    /// inside [`embed_with_retry`]; anything that survives them fails the
    /// run.
    async fn embed_pieces(
        &self,
        content_id: ContentId,
        pieces: Vec<ChunkPiece>,
        content_type: ContentType,
    ) -> PipelineResult<(Vec<ContentChunk>, Vec<String>)> {
        let concurrency = usize::max(self.embedding.concurrency, 1);
        let max_retries = self.embedding.max_retries;
        let backoff = Duration::from_millis(self.embedding.retry_backoff_ms);

        let embed_all = stream::iter(pieces.into_iter().enumerate().map(|(index, piece)| {
            let embedder = Arc::clone(&self.embedder);
            async move {
                let (vector, attempts) =
                    embed_with_retry(embedder.as_ref(), &piece.text, max_retries, backoff).await?;
                Ok::<_, PipelineError>((index, piece, vector, attempts))
            }
        }))
        .buffered(concurrency)
        .try_collect::<Vec<_>>();

        let embedded = with_deadline(
            self.embed_timeout,
            format!("embedding for content {content_id}"),
            embed_all,
        )
        .await?;

        let mut errors = Vec::new();
        let mut chunks = Vec::with_capacity(embedded.len());
        for (index, piece, vector, attempts) in embedded {
            if attempts > 0 {
                errors.push(format!(
                    "chunk {index}: embedding succeeded after {attempts} retries"
                ));
            }
            let mut chunk = ContentChunk::new(content_id, piece.text, index)
                .with_embedding(vector)
                .with_metadata("content_type", serde_json::json!(content_type.to_string()));
            chunk.metadata.extend(piece.metadata);
            chunks.push(chunk);
        }
        Ok((chunks, errors))
    }

    /// Vectors first, then chunk rows; the caller rolls both back on error.
    async fn commit(&self, chunks: &[ContentChunk]) -> PipelineResult<()> {
        let entries: Vec<VectorEntry> = chunks
            .iter()
            .map(|chunk| VectorEntry {
                chunk_id: chunk.id,
                vector: chunk.embedding.clone(),
                metadata: chunk.metadata.clone(),
            })
            .collect();
        self.vector_store.upsert(&entries).await?;
        self.registry.put_chunks(chunks).await?;
        Ok(())
    }

    /// Compensating delete for a partially written run
    async fn rollback(&self, content_id: ContentId, chunks: &[ContentChunk]) {
        let ids: Vec<ChunkId> = chunks.iter().map(|chunk| chunk.id).collect();
        if let Err(err) = self.vector_store.delete(&ids).await {
            warn!(content_id = %content_id, error = %err, "rollback failed to delete vectors");
        }
        if let Err(err) = self.registry.delete_chunks(content_id).await {
            warn!(content_id = %content_id, error = %err, "rollback failed to delete chunk rows");
        }
    }

    /// Mark the content failed with the error recorded verbatim, then hand
    /// the error back unchanged.
    async fn fail(
        &self,
        content_id: ContentId,
        err: PipelineError,
    ) -> PipelineResult<ProcessingResult> {
        warn!(content_id = %content_id, kind = %err.kind(), error = %err, "content processing failed");
        if let Err(update_err) = self
            .registry
            .update_status(content_id, ContentStatus::Failed, Some(err.detail()))
            .await
        {
            warn!(content_id = %content_id, error = %update_err, "failed to record processing failure");
        }
        Err(err)
    }
}
