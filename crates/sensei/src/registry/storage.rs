//! Content storage backends

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::schema::{
    CertificationContent, ContentChunk, ContentFilter, ContentId, ContentStatus,
};
use crate::error::{ErrorDetail, PipelineResult};

/// Trait for content registry storage backends
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store a newly registered content
    async fn insert_content(&self, content: CertificationContent) -> PipelineResult<()>;

    /// Retrieve a content by id
    async fn get_content(&self, id: ContentId) -> PipelineResult<Option<CertificationContent>>;

    /// List contents matching the filter, ordered by creation time then id
    async fn list_content(
        &self,
        filter: &ContentFilter,
    ) -> PipelineResult<Vec<CertificationContent>>;

    /// Atomically move a content from `from` to `to`, recording `error` and
    /// bumping `updated_at`. Returns `Ok(false)` when the stored status no
    /// longer matches `from` (a concurrent writer won), without modifying the
    /// row. Unknown ids are `Ok(false)` as well; existence is checked by the
    /// caller before attempting the swap.
    async fn compare_and_set_status(
        &self,
        id: ContentId,
        from: ContentStatus,
        to: ContentStatus,
        error: Option<ErrorDetail>,
    ) -> PipelineResult<bool>;

    /// Persist chunk rows (each chunk carries its owning content id)
    async fn put_chunks(&self, chunks: &[ContentChunk]) -> PipelineResult<()>;

    /// Remove all chunk rows for a content, returning how many were removed
    async fn delete_chunks(&self, content_id: ContentId) -> PipelineResult<usize>;

    /// All chunk rows for a content, ordered by `sequence_index`
    async fn get_chunks(&self, content_id: ContentId) -> PipelineResult<Vec<ContentChunk>>;

    /// Number of chunk rows stored for a content
    async fn count_chunks(&self, content_id: ContentId) -> PipelineResult<usize>;
}

/// In-memory store for testing and development
#[derive(Default)]
pub struct InMemoryContentStore {
    contents: Arc<RwLock<HashMap<ContentId, CertificationContent>>>,
    chunks: Arc<RwLock<HashMap<ContentId, Vec<ContentChunk>>>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn insert_content(&self, content: CertificationContent) -> PipelineResult<()> {
        let mut contents = self.contents.write().await;
        contents.insert(content.id, content);
        Ok(())
    }

    async fn get_content(&self, id: ContentId) -> PipelineResult<Option<CertificationContent>> {
        let contents = self.contents.read().await;
        Ok(contents.get(&id).cloned())
    }

    async fn list_content(
        &self,
        filter: &ContentFilter,
    ) -> PipelineResult<Vec<CertificationContent>> {
        let contents = self.contents.read().await;
        let mut matching: Vec<CertificationContent> = contents
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(matching)
    }

    async fn compare_and_set_status(
        &self,
        id: ContentId,
        from: ContentStatus,
        to: ContentStatus,
        error: Option<ErrorDetail>,
    ) -> PipelineResult<bool> {
        let mut contents = self.contents.write().await;
        match contents.get_mut(&id) {
            Some(content) if content.status == from => {
                content.status = to;
                content.error = error;
                content.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn put_chunks(&self, chunks: &[ContentChunk]) -> PipelineResult<()> {
        let mut stored = self.chunks.write().await;
        for chunk in chunks {
            stored
                .entry(chunk.content_id)
                .or_default()
                .push(chunk.clone());
        }
        for rows in stored.values_mut() {
            rows.sort_by_key(|c| c.sequence_index);
        }
        Ok(())
    }

    async fn delete_chunks(&self, content_id: ContentId) -> PipelineResult<usize> {
        let mut stored = self.chunks.write().await;
        Ok(stored.remove(&content_id).map_or(0, |rows| rows.len()))
    }

    async fn get_chunks(&self, content_id: ContentId) -> PipelineResult<Vec<ContentChunk>> {
        let stored = self.chunks.read().await;
        Ok(stored.get(&content_id).cloned().unwrap_or_default())
    }

    async fn count_chunks(&self, content_id: ContentId) -> PipelineResult<usize> {
        let stored = self.chunks.read().await;
        Ok(stored.get(&content_id).map_or(0, |rows| rows.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = InMemoryContentStore::new();
        let content = CertificationContent::new("/tmp/pmp.md", "PMP", "project_manager");
        let id = content.id;

        store.insert_content(content).await.unwrap();
        let found = store.get_content(id).await.unwrap().unwrap();
        assert_eq!(found.certification_name, "PMP");
        assert!(store
            .get_content(ContentId::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_is_ordered_and_filtered() {
        let store = InMemoryContentStore::new();
        let mut first = CertificationContent::new("/a.md", "A", "project_manager");
        let mut second = CertificationContent::new("/b.md", "B", "analyst");
        // Force distinct creation times regardless of clock resolution
        second.created_at = first.created_at + chrono::Duration::milliseconds(5);
        first.updated_at = first.created_at;
        second.updated_at = second.created_at;

        store.insert_content(second.clone()).await.unwrap();
        store.insert_content(first.clone()).await.unwrap();

        let all = store.list_content(&ContentFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, first.id);
        assert_eq!(all[1].id, second.id);

        let pms = store
            .list_content(&ContentFilter::default().with_role("project_manager"))
            .await
            .unwrap();
        assert_eq!(pms.len(), 1);
        assert_eq!(pms[0].id, first.id);
    }

    #[tokio::test]
    async fn test_compare_and_set_status() {
        let store = InMemoryContentStore::new();
        let content = CertificationContent::new("/a.md", "A", "project_manager");
        let id = content.id;
        store.insert_content(content).await.unwrap();

        let swapped = store
            .compare_and_set_status(id, ContentStatus::Registered, ContentStatus::Processing, None)
            .await
            .unwrap();
        assert!(swapped);

        // Second swap from the same expected status loses
        let swapped = store
            .compare_and_set_status(id, ContentStatus::Registered, ContentStatus::Processing, None)
            .await
            .unwrap();
        assert!(!swapped);

        let found = store.get_content(id).await.unwrap().unwrap();
        assert_eq!(found.status, ContentStatus::Processing);
        assert!(found.updated_at > found.created_at);

        // Unknown id never swaps
        let swapped = store
            .compare_and_set_status(
                ContentId::new(),
                ContentStatus::Registered,
                ContentStatus::Processing,
                None,
            )
            .await
            .unwrap();
        assert!(!swapped);
    }

    #[tokio::test]
    async fn test_chunk_lifecycle() {
        let store = InMemoryContentStore::new();
        let content_id = ContentId::new();
        let chunks = vec![
            ContentChunk::new(content_id, "second", 1),
            ContentChunk::new(content_id, "first", 0),
        ];

        store.put_chunks(&chunks).await.unwrap();
        assert_eq!(store.count_chunks(content_id).await.unwrap(), 2);

        let fetched = store.get_chunks(content_id).await.unwrap();
        assert_eq!(fetched[0].text, "first");
        assert_eq!(fetched[1].text, "second");

        assert_eq!(store.delete_chunks(content_id).await.unwrap(), 2);
        assert_eq!(store.count_chunks(content_id).await.unwrap(), 0);
        assert!(store.get_chunks(content_id).await.unwrap().is_empty());
    }
}
