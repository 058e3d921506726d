//! Vector store backends
//!
//! Chunk vectors live behind [`VectorStore`]; the pipeline never assumes a
//! particular product. The in-memory backend ranks by cosine similarity and
//! is the test/dev default; [`ChromaVectorStore`] talks to a Chroma server
//! over its REST API.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::warn;

use crate::config::{VectorStoreBackend, VectorStoreConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::registry::ChunkId;

/// One vector with its chunk identity and scalar metadata
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub chunk_id: ChunkId,
    pub vector: Vec<f32>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A ranked query hit
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub chunk_id: ChunkId,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace vectors. Vectors whose dimension does not match the
    /// store's configured dimension are rejected.
    async fn upsert(&self, entries: &[VectorEntry]) -> PipelineResult<()>;

    /// Top `top_k` entries ranked by similarity to `vector`, best first
    async fn query(&self, vector: &[f32], top_k: usize) -> PipelineResult<Vec<VectorMatch>>;

    /// Remove vectors by chunk id; unknown ids are ignored
    async fn delete(&self, chunk_ids: &[ChunkId]) -> PipelineResult<()>;
}

/// Build the backend selected by configuration.
pub fn build_vector_store(config: &VectorStoreConfig, dimension: usize) -> Arc<dyn VectorStore> {
    match config.backend {
        VectorStoreBackend::Memory => Arc::new(InMemoryVectorStore::new(dimension)),
        VectorStoreBackend::Chroma => {
            let url = config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:8000".to_string());
            Arc::new(ChromaVectorStore::new(
                url,
                config.index_name.clone(),
                dimension,
            ))
        }
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Cosine-ranked store backed by a hash map
pub struct InMemoryVectorStore {
    dimension: usize,
    entries: RwLock<HashMap<ChunkId, VectorEntry>>,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn check_dimension(&self, vector: &[f32]) -> PipelineResult<()> {
        if vector.len() != self.dimension {
            return Err(PipelineError::config(format!(
                "vector has {} dimensions, store is configured for {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, entries: &[VectorEntry]) -> PipelineResult<()> {
        for entry in entries {
            self.check_dimension(&entry.vector)?;
        }
        let mut stored = self.entries.write().await;
        for entry in entries {
            stored.insert(entry.chunk_id, entry.clone());
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> PipelineResult<Vec<VectorMatch>> {
        self.check_dimension(vector)?;
        let stored = self.entries.read().await;
        let mut matches: Vec<VectorMatch> = stored
            .values()
            .map(|entry| VectorMatch {
                chunk_id: entry.chunk_id,
                score: cosine_similarity(vector, &entry.vector),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_id.0.cmp(&b.chunk_id.0))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, chunk_ids: &[ChunkId]) -> PipelineResult<()> {
        let mut stored = self.entries.write().await;
        for id in chunk_ids {
            stored.remove(id);
        }
        Ok(())
    }
}

/// Chroma REST client. The collection is created (or fetched) on first use
/// and its id cached for the life of the store.
pub struct ChromaVectorStore {
    client: reqwest::Client,
    base_url: String,
    collection_name: String,
    dimension: usize,
    collection_id: OnceCell<String>,
}

impl ChromaVectorStore {
    pub fn new(
        base_url: impl Into<String>,
        collection_name: impl Into<String>,
        dimension: usize,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            collection_name: collection_name.into(),
            dimension,
            collection_id: OnceCell::new(),
        }
    }

    async fn collection_id(&self) -> PipelineResult<&str> {
        self.collection_id
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .post(format!("{}/api/v1/collections", self.base_url))
                    .json(&json!({
                        "name": self.collection_name,
                        "get_or_create": true,
                        "metadata": { "dimension": self.dimension },
                    }))
                    .send()
                    .await
                    .map_err(|e| PipelineError::provider(format!("chroma: {e}")))?;
                let body = Self::check_response(response).await?;
                body.get("id")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .ok_or_else(|| {
                        PipelineError::provider("chroma: collection response missing id")
                    })
            })
            .await
            .map(String::as_str)
    }

    async fn check_response(response: reqwest::Response) -> PipelineResult<serde_json::Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let brief: String = body.chars().take(200).collect();
            return Err(PipelineError::provider(format!(
                "chroma returned {status}: {brief}"
            )));
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(serde_json::Value::Null);
        }
        // Mutating endpoints return trivial bodies; tolerate anything
        Ok(response
            .json()
            .await
            .unwrap_or(serde_json::Value::Null))
    }

    async fn post(
        &self,
        endpoint: &str,
        payload: serde_json::Value,
    ) -> PipelineResult<serde_json::Value> {
        let collection = self.collection_id().await?;
        let url = format!(
            "{}/api/v1/collections/{collection}/{endpoint}",
            self.base_url
        );
        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PipelineError::provider(format!("chroma: {e}")))?;
        Self::check_response(response).await
    }
}

#[async_trait]
impl VectorStore for ChromaVectorStore {
    async fn upsert(&self, entries: &[VectorEntry]) -> PipelineResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        for entry in entries {
            if entry.vector.len() != self.dimension {
                return Err(PipelineError::config(format!(
                    "vector has {} dimensions, store is configured for {}",
                    entry.vector.len(),
                    self.dimension
                )));
            }
        }
        let ids: Vec<String> = entries.iter().map(|e| e.chunk_id.to_string()).collect();
        let embeddings: Vec<&Vec<f32>> = entries.iter().map(|e| &e.vector).collect();
        let metadatas: Vec<&HashMap<String, serde_json::Value>> =
            entries.iter().map(|e| &e.metadata).collect();
        self.post(
            "upsert",
            json!({ "ids": ids, "embeddings": embeddings, "metadatas": metadatas }),
        )
        .await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> PipelineResult<Vec<VectorMatch>> {
        let body = self
            .post(
                "query",
                json!({
                    "query_embeddings": [vector],
                    "n_results": top_k,
                    "include": ["distances"],
                }),
            )
            .await?;

        let ids = body
            .pointer("/ids/0")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let distances = body
            .pointer("/distances/0")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut matches = Vec::with_capacity(ids.len());
        for (id_value, distance) in ids.iter().zip(distances.iter()) {
            let Some(id_str) = id_value.as_str() else {
                continue;
            };
            match ChunkId::from_str(id_str) {
                Ok(chunk_id) => matches.push(VectorMatch {
                    chunk_id,
                    score: 1.0 - distance.as_f64().unwrap_or(1.0) as f32,
                }),
                Err(_) => warn!(id = id_str, "chroma returned a non-uuid chunk id"),
            }
        }
        Ok(matches)
    }

    async fn delete(&self, chunk_ids: &[ChunkId]) -> PipelineResult<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = chunk_ids.iter().map(ChunkId::to_string).collect();
        self.post("delete", json!({ "ids": ids })).await?;
        Ok(())
    }
}
