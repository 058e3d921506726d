//! Content Registry
//!
//! Owns the lifecycle of ingested certification material and its derived
//! chunks. All status changes go through the lifecycle table in
//! [`schema::ContentStatus`]; a compare-and-swap in the store keeps
//! concurrent writers from both succeeding.

pub mod schema;
pub mod storage;

pub use schema::{
    CertificationContent, ContentChunk, ContentFilter, ContentId, ContentStatus, ChunkId,
};
pub use storage::{ContentStore, InMemoryContentStore};

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{ErrorDetail, PipelineError, PipelineResult};

/// Service facade over a [`ContentStore`]
#[derive(Clone)]
pub struct ContentRegistry {
    store: Arc<dyn ContentStore>,
}

impl ContentRegistry {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Register a source file as certification material for a role.
    ///
    /// The path must point at a readable, non-empty file; content starts in
    /// the `registered` state.
    pub async fn register(
        &self,
        source_path: &str,
        certification_name: &str,
        role: &str,
    ) -> PipelineResult<ContentId> {
        let metadata = tokio::fs::metadata(source_path)
            .await
            .map_err(|e| PipelineError::invalid_source(source_path, e.to_string()))?;
        if !metadata.is_file() {
            return Err(PipelineError::invalid_source(source_path, "not a file"));
        }
        if metadata.len() == 0 {
            return Err(PipelineError::invalid_source(source_path, "file is empty"));
        }

        let content = CertificationContent::new(source_path, certification_name, role);
        let id = content.id;
        self.store.insert_content(content).await?;
        info!(content_id = %id, role, certification_name, "registered certification content");
        Ok(id)
    }

    pub async fn get(&self, id: ContentId) -> PipelineResult<CertificationContent> {
        self.store
            .get_content(id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("content {id}")))
    }

    pub async fn list(&self, filter: ContentFilter) -> PipelineResult<Vec<CertificationContent>> {
        self.store.list_content(&filter).await
    }

    /// Move a content to `to`, enforcing the lifecycle table.
    ///
    /// Fails with `InvalidTransition` when the table forbids the edge or a
    /// concurrent writer changed the status first.
    pub async fn update_status(
        &self,
        id: ContentId,
        to: ContentStatus,
        error: Option<ErrorDetail>,
    ) -> PipelineResult<()> {
        let current = self.get(id).await?;
        if !current.status.can_transition_to(to) {
            return Err(PipelineError::invalid_transition(current.status, to));
        }
        let swapped = self
            .store
            .compare_and_set_status(id, current.status, to, error)
            .await?;
        if !swapped {
            // Lost the race; report against whatever is stored now
            let observed = self.get(id).await?;
            return Err(PipelineError::invalid_transition(observed.status, to));
        }
        debug!(content_id = %id, from = %current.status, to = %to, "content status updated");
        Ok(())
    }

    /// Mark a registered content as a reusable template, excluded from
    /// processing.
    pub async fn mark_template(&self, id: ContentId) -> PipelineResult<()> {
        self.update_status(id, ContentStatus::Template, None).await
    }

    pub async fn put_chunks(&self, chunks: &[ContentChunk]) -> PipelineResult<()> {
        self.store.put_chunks(chunks).await
    }

    pub async fn delete_chunks(&self, id: ContentId) -> PipelineResult<usize> {
        let removed = self.store.delete_chunks(id).await?;
        if removed > 0 {
            debug!(content_id = %id, removed, "deleted chunk rows");
        }
        Ok(removed)
    }

    /// Chunks of a processed content, ordered by `sequence_index`.
    ///
    /// Partial artifacts of failed runs are never exposed: anything other
    /// than `processed` fails with `ContentNotReady`.
    pub async fn chunks(&self, id: ContentId) -> PipelineResult<Vec<ContentChunk>> {
        let content = self.get(id).await?;
        if content.status != ContentStatus::Processed {
            return Err(PipelineError::content_not_ready(format!(
                "content {id} is {}",
                content.status
            )));
        }
        self.store.get_chunks(id).await
    }

    /// Raw chunk-row count, not gated on status
    pub async fn chunk_count(&self, id: ContentId) -> PipelineResult<usize> {
        self.store.count_chunks(id).await
    }

    /// Raw chunk-row ids, not gated on status
    pub async fn chunk_ids(&self, id: ContentId) -> PipelineResult<Vec<ChunkId>> {
        let chunks = self.store.get_chunks(id).await?;
        Ok(chunks.into_iter().map(|chunk| chunk.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    fn registry() -> ContentRegistry {
        ContentRegistry::new(Arc::new(InMemoryContentStore::new()))
    }

    fn temp_source(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = registry();
        let source = temp_source("# PMP Study Guide\nRisk management.");

        let id = registry
            .register(source.path().to_str().unwrap(), "PMP", "project_manager")
            .await
            .unwrap();

        let content = registry.get(id).await.unwrap();
        assert_eq!(content.status, ContentStatus::Registered);
        assert_eq!(content.role, "project_manager");
        assert_eq!(content.certification_name, "PMP");
    }

    #[tokio::test]
    async fn test_register_rejects_missing_file() {
        let registry = registry();
        let err = registry
            .register("/nonexistent/material.md", "PMP", "project_manager")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSource);
    }

    #[tokio::test]
    async fn test_register_rejects_empty_file() {
        let registry = registry();
        let source = temp_source("");
        let err = registry
            .register(source.path().to_str().unwrap(), "PMP", "project_manager")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSource);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let registry = registry();
        let err = registry.get(ContentId::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_status_lifecycle() {
        let registry = registry();
        let source = temp_source("material");
        let id = registry
            .register(source.path().to_str().unwrap(), "PMP", "project_manager")
            .await
            .unwrap();

        registry
            .update_status(id, ContentStatus::Processing, None)
            .await
            .unwrap();
        registry
            .update_status(id, ContentStatus::Processed, None)
            .await
            .unwrap();

        // Terminal: no way back
        let err = registry
            .update_status(id, ContentStatus::Processing, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn test_failed_can_retry() {
        let registry = registry();
        let source = temp_source("material");
        let id = registry
            .register(source.path().to_str().unwrap(), "PMP", "project_manager")
            .await
            .unwrap();

        registry
            .update_status(id, ContentStatus::Processing, None)
            .await
            .unwrap();
        let detail = PipelineError::provider("embedding backend down").detail();
        registry
            .update_status(id, ContentStatus::Failed, Some(detail.clone()))
            .await
            .unwrap();

        let content = registry.get(id).await.unwrap();
        assert_eq!(content.status, ContentStatus::Failed);
        assert_eq!(content.error, Some(detail));

        registry
            .update_status(id, ContentStatus::Processing, None)
            .await
            .unwrap();
        let content = registry.get(id).await.unwrap();
        assert!(content.error.is_none());
    }

    #[tokio::test]
    async fn test_chunks_gated_until_processed() {
        let registry = registry();
        let source = temp_source("material");
        let id = registry
            .register(source.path().to_str().unwrap(), "PMP", "project_manager")
            .await
            .unwrap();

        let err = registry.chunks(id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContentNotReady);

        registry
            .update_status(id, ContentStatus::Processing, None)
            .await
            .unwrap();
        registry
            .put_chunks(&[ContentChunk::new(id, "a", 0), ContentChunk::new(id, "b", 1)])
            .await
            .unwrap();
        registry
            .update_status(id, ContentStatus::Processed, None)
            .await
            .unwrap();

        let chunks = registry.chunks(id).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].sequence_index, 0);
    }

    #[tokio::test]
    async fn test_template_is_terminal() {
        let registry = registry();
        let source = temp_source("template material");
        let id = registry
            .register(source.path().to_str().unwrap(), "PMP", "project_manager")
            .await
            .unwrap();

        registry.mark_template(id).await.unwrap();
        let err = registry
            .update_status(id, ContentStatus::Processing, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }
}
