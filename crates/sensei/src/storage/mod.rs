//! Storage backend selection
//!
//! Every layer talks to its store through a trait object, so the whole
//! pipeline can run on in-memory maps or on a shared SQLite file without any
//! layer knowing the difference.

pub mod sqlite;

pub use sqlite::SqliteStore;

use std::sync::Arc;

use crate::adaptation::{AdaptationStore, InMemoryAdaptationStore};
use crate::config::{StorageBackend, StorageConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{InMemoryRunStore, RunStore};
use crate::registry::{ContentStore, InMemoryContentStore};
use crate::training::{InMemoryTrainingJobStore, TrainingJobStore};

/// The four persistence handles a pipeline runs on.
#[derive(Clone)]
pub struct PipelineStores {
    pub content: Arc<dyn ContentStore>,
    pub jobs: Arc<dyn TrainingJobStore>,
    pub adaptations: Arc<dyn AdaptationStore>,
    pub runs: Arc<dyn RunStore>,
}

impl std::fmt::Debug for PipelineStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineStores").finish_non_exhaustive()
    }
}

/// Build the store set named by the configuration.
///
/// The sqlite backend opens one pool and serves all four collections from it.
pub async fn build_stores(config: &StorageConfig) -> PipelineResult<PipelineStores> {
    match config.backend {
        StorageBackend::Memory => Ok(PipelineStores {
            content: Arc::new(InMemoryContentStore::new()),
            jobs: Arc::new(InMemoryTrainingJobStore::new()),
            adaptations: Arc::new(InMemoryAdaptationStore::new()),
            runs: Arc::new(InMemoryRunStore::new()),
        }),
        StorageBackend::Sqlite => {
            let path = config.path.as_ref().ok_or_else(|| {
                PipelineError::config("storage.path is required for the sqlite backend")
            })?;
            let store = Arc::new(SqliteStore::connect(path).await?);
            Ok(PipelineStores {
                content: store.clone(),
                jobs: store.clone(),
                adaptations: store.clone(),
                runs: store,
            })
        }
    }
}
