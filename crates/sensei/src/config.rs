//! Pipeline configuration
//!
//! Loadable from YAML or JSON. Every knob has a default so an empty document
//! is a valid config; `validate` reports fatal problems as errors and
//! questionable-but-workable settings as warnings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::adaptation::BlendKind;
use crate::error::{PipelineError, PipelineResult};
use crate::knowledge::ChunkingStrategy;

/// Top-level configuration for a [`TrainingPipeline`](crate::TrainingPipeline)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// How adapted knowledge is blended into role behavior
    #[serde(default)]
    pub blend: BlendKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub strategy: ChunkingStrategy,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    100
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            strategy: ChunkingStrategy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Retries per chunk on rate-limited embedding calls
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// In-flight embedding calls per content
    #[serde(default = "default_embed_concurrency")]
    pub concurrency: usize,
}

fn default_dimension() -> usize {
    384
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_embed_concurrency() -> usize {
    8
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            concurrency: default_embed_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VectorStoreBackend {
    #[default]
    Memory,
    Chroma,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub backend: VectorStoreBackend,
    /// Base URL for remote backends (chroma)
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_index_name")]
    pub index_name: String,
}

fn default_index_name() -> String {
    "sensei-knowledge".to_string()
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: VectorStoreBackend::default(),
            url: None,
            index_name: default_index_name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Database file for the sqlite backend
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Per-stage deadlines, enforced inside the owning layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_collect_secs")]
    pub collect_secs: u64,
    #[serde(default = "default_embed_secs")]
    pub embed_secs: u64,
    #[serde(default = "default_train_secs")]
    pub train_secs: u64,
}

fn default_collect_secs() -> u64 {
    30
}

fn default_embed_secs() -> u64 {
    120
}

fn default_train_secs() -> u64 {
    300
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            collect_secs: default_collect_secs(),
            embed_secs: default_embed_secs(),
            train_secs: default_train_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml(content: &str) -> PipelineResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| PipelineError::config(format!("failed to parse YAML config: {e}")))
    }

    pub fn from_json(content: &str) -> PipelineResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| PipelineError::config(format!("failed to parse JSON config: {e}")))
    }

    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::config(format!("failed to read {}: {e}", path.display())))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Check the config for problems. Fatal misconfiguration is an error;
    /// anything the pipeline can work around is returned as a warning.
    pub fn validate(&self) -> PipelineResult<Vec<String>> {
        let mut warnings = Vec::new();

        if self.chunking.chunk_size == 0 {
            return Err(PipelineError::config("chunk_size must be greater than 0"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(PipelineError::config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.embedding.dimension == 0 {
            return Err(PipelineError::config("embedding dimension must be greater than 0"));
        }
        if self.embedding.concurrency == 0 {
            warnings.push("embedding concurrency of 0 treated as 1".to_string());
        }

        match self.vector_store.backend {
            VectorStoreBackend::Chroma if self.vector_store.url.is_none() => {
                warnings.push(
                    "chroma backend selected without url; defaulting to http://localhost:8000"
                        .to_string(),
                );
            }
            _ => {}
        }

        if self.storage.backend == StorageBackend::Sqlite && self.storage.path.is_none() {
            return Err(PipelineError::config(
                "sqlite storage backend requires storage.path",
            ));
        }

        if self.timeouts.collect_secs == 0
            || self.timeouts.embed_secs == 0
            || self.timeouts.train_secs == 0
        {
            warnings.push("a stage timeout of 0 disables that deadline".to_string());
        }

        Ok(warnings)
    }
}
