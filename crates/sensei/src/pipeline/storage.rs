//! Pipeline run persistence
//!
//! Runs have a single writer (the orchestrating task that created them), so
//! updates replace the whole record; the compare-and-swap machinery of the
//! layer stores is not needed here.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::schema::{PipelineRun, RunId};
use crate::error::{PipelineError, PipelineResult};
use crate::training::TrainingId;

/// Storage backend for pipeline runs
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert_run(&self, run: PipelineRun) -> PipelineResult<()>;

    async fn get_run(&self, id: RunId) -> PipelineResult<Option<PipelineRun>>;

    /// The run that produced a training job, if any
    async fn find_run_by_training(
        &self,
        training_id: TrainingId,
    ) -> PipelineResult<Option<PipelineRun>>;

    /// All runs, ordered by creation time
    async fn list_runs(&self) -> PipelineResult<Vec<PipelineRun>>;

    async fn update_run(&self, run: PipelineRun) -> PipelineResult<()>;
}

/// In-memory store for tests and single-process runs
#[derive(Default, Clone)]
pub struct InMemoryRunStore {
    runs: Arc<RwLock<HashMap<RunId, PipelineRun>>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn insert_run(&self, run: PipelineRun) -> PipelineResult<()> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.id) {
            return Err(PipelineError::storage(format!(
                "pipeline run {} already exists",
                run.id
            )));
        }
        runs.insert(run.id, run);
        Ok(())
    }

    async fn get_run(&self, id: RunId) -> PipelineResult<Option<PipelineRun>> {
        Ok(self.runs.read().await.get(&id).cloned())
    }

    async fn find_run_by_training(
        &self,
        training_id: TrainingId,
    ) -> PipelineResult<Option<PipelineRun>> {
        Ok(self
            .runs
            .read()
            .await
            .values()
            .find(|run| run.training_id == Some(training_id))
            .cloned())
    }

    async fn list_runs(&self) -> PipelineResult<Vec<PipelineRun>> {
        let runs = self.runs.read().await;
        let mut all: Vec<PipelineRun> = runs.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(all)
    }

    async fn update_run(&self, run: PipelineRun) -> PipelineResult<()> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&run.id) {
            Some(stored) => {
                *stored = run;
                Ok(())
            }
            None => Err(PipelineError::storage(format!(
                "pipeline run {} does not exist",
                run.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::schema::PipelineStage;

    #[tokio::test]
    async fn test_insert_update_get() {
        let store = InMemoryRunStore::new();
        let mut run = PipelineRun::new("project_manager", "PMP Module 1");
        let id = run.id;
        store.insert_run(run.clone()).await.unwrap();

        run.advance(PipelineStage::ContentRegistered);
        store.update_run(run).await.unwrap();

        let fetched = store.get_run(id).await.unwrap().unwrap();
        assert_eq!(fetched.stage, PipelineStage::ContentRegistered);

        let orphan = PipelineRun::new("analyst", "CFA Level 1");
        assert!(store.update_run(orphan).await.is_err());
    }

    #[tokio::test]
    async fn test_find_by_training() {
        let store = InMemoryRunStore::new();
        let mut run = PipelineRun::new("project_manager", "PMP Module 1");
        let training_id = TrainingId::new();
        run.training_id = Some(training_id);
        store.insert_run(run.clone()).await.unwrap();
        store
            .insert_run(PipelineRun::new("analyst", "CFA Level 1"))
            .await
            .unwrap();

        let found = store.find_run_by_training(training_id).await.unwrap().unwrap();
        assert_eq!(found.id, run.id);
        assert!(store
            .find_run_by_training(TrainingId::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_ordered_by_creation() {
        let store = InMemoryRunStore::new();
        for name in ["first", "second", "third"] {
            store
                .insert_run(PipelineRun::new("project_manager", name))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let runs = store.list_runs().await.unwrap();
        let names: Vec<&str> = runs.iter().map(|run| run.certification_name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }
}
