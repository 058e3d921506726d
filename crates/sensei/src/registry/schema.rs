//! Content registry records
//!
//! Certification content and its derived chunks. Status moves through a
//! fixed lifecycle; the only backward edge is `failed -> processing` for
//! retries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::ErrorDetail;

/// Identifier of an ingested certification content bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(pub Uuid);

impl ContentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for ContentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identifier of a single processed chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub Uuid);

impl ChunkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChunkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for ChunkId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle state of a registered content
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContentStatus {
    Registered,
    Processing,
    Processed,
    Failed,
    Template,
}

impl ContentStatus {
    /// Whether the lifecycle table allows moving from `self` to `next`
    pub fn can_transition_to(self, next: ContentStatus) -> bool {
        use ContentStatus::*;
        matches!(
            (self, next),
            (Registered, Processing)
                | (Registered, Template)
                | (Processing, Processed)
                | (Processing, Failed)
                | (Failed, Processing)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ContentStatus::Processed | ContentStatus::Template)
    }
}

/// One ingested source bundle of certification material
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificationContent {
    pub id: ContentId,
    pub source_path: String,
    pub certification_name: String,
    /// Target agent role this material trains
    pub role: String,
    pub status: ContentStatus,
    /// Set only after a failed processing run
    #[serde(default)]
    pub error: Option<ErrorDetail>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CertificationContent {
    pub fn new(
        source_path: impl Into<String>,
        certification_name: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ContentId::new(),
            source_path: source_path.into(),
            certification_name: certification_name.into(),
            role: role.into(),
            status: ContentStatus::Registered,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A unit of processed text with its embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentChunk {
    pub id: ChunkId,
    pub content_id: ContentId,
    pub text: String,
    pub embedding: Vec<f32>,
    /// Position within the source document, 0-based and gap-free
    pub sequence_index: usize,
    /// Section titles, page numbers, detected content type
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ContentChunk {
    pub fn new(content_id: ContentId, text: impl Into<String>, sequence_index: usize) -> Self {
        Self {
            id: ChunkId::new(),
            content_id,
            text: text.into(),
            embedding: Vec::new(),
            sequence_index,
            metadata: HashMap::new(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Filter for listing registered content
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    pub status: Option<ContentStatus>,
    pub role: Option<String>,
}

impl ContentFilter {
    pub fn with_status(mut self, status: ContentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn matches(&self, content: &CertificationContent) -> bool {
        if let Some(status) = self.status {
            if content.status != status {
                return false;
            }
        }
        if let Some(ref role) = self.role {
            if &content.role != role {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use ContentStatus::*;
        assert!(Registered.can_transition_to(Processing));
        assert!(Registered.can_transition_to(Template));
        assert!(Processing.can_transition_to(Processed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Processing));

        assert!(!Processed.can_transition_to(Processing));
        assert!(!Template.can_transition_to(Processing));
        assert!(!Registered.can_transition_to(Processed));
        assert!(!Failed.can_transition_to(Processed));
        assert!(!Processing.can_transition_to(Registered));
    }

    #[test]
    fn test_terminal_states() {
        assert!(ContentStatus::Processed.is_terminal());
        assert!(ContentStatus::Template.is_terminal());
        assert!(!ContentStatus::Registered.is_terminal());
        assert!(!ContentStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ContentStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        assert_eq!(ContentStatus::Registered.to_string(), "registered");
    }

    #[test]
    fn test_new_content_is_registered() {
        let content = CertificationContent::new("/tmp/pmp.md", "PMP", "project_manager");
        assert_eq!(content.status, ContentStatus::Registered);
        assert!(content.error.is_none());
        assert_eq!(content.created_at, content.updated_at);
    }

    #[test]
    fn test_chunk_builder() {
        let content_id = ContentId::new();
        let chunk = ContentChunk::new(content_id, "risk management basics", 0)
            .with_embedding(vec![0.1, 0.2])
            .with_metadata("section", serde_json::json!("Risk"));
        assert_eq!(chunk.content_id, content_id);
        assert_eq!(chunk.sequence_index, 0);
        assert_eq!(chunk.embedding.len(), 2);
        assert_eq!(chunk.metadata["section"], serde_json::json!("Risk"));
    }

    #[test]
    fn test_filter_matches() {
        let content = CertificationContent::new("/tmp/a.md", "PMP", "project_manager");
        assert!(ContentFilter::default().matches(&content));
        assert!(ContentFilter::default()
            .with_role("project_manager")
            .with_status(ContentStatus::Registered)
            .matches(&content));
        assert!(!ContentFilter::default().with_role("analyst").matches(&content));
        assert!(!ContentFilter::default()
            .with_status(ContentStatus::Processed)
            .matches(&content));
    }
}
