//! Training job storage backends

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::schema::{
    CapabilityManifest, JobFilter, JobStatus, ModelArtifact, TrainingId, TrainingJob,
};
use crate::error::{ErrorDetail, PipelineResult};

/// Trait for training job storage backends
#[async_trait]
pub trait TrainingJobStore: Send + Sync {
    /// Persist a newly created job
    async fn insert_job(&self, job: TrainingJob) -> PipelineResult<()>;

    /// Retrieve a job by id
    async fn get_job(&self, id: TrainingId) -> PipelineResult<Option<TrainingJob>>;

    /// List jobs matching the filter, ordered by creation time then id
    async fn list_jobs(&self, filter: &JobFilter) -> PipelineResult<Vec<TrainingJob>>;

    /// Atomically move a job from `from` to `to`. `Ok(false)` when the stored
    /// status no longer matches (a concurrent writer won) or the id is
    /// unknown. Leaving `queued` stamps `started_at`.
    async fn compare_and_set_job_status(
        &self,
        id: TrainingId,
        from: JobStatus,
        to: JobStatus,
    ) -> PipelineResult<bool>;

    /// CAS `training → completed`, attaching the artifact and manifest and
    /// stamping `completed_at`
    async fn complete_job(
        &self,
        id: TrainingId,
        artifact: ModelArtifact,
        manifest: CapabilityManifest,
    ) -> PipelineResult<bool>;

    /// CAS `from → failed`, recording the error verbatim and stamping
    /// `completed_at`
    async fn fail_job(
        &self,
        id: TrainingId,
        from: JobStatus,
        error: ErrorDetail,
    ) -> PipelineResult<bool>;
}

/// In-memory store for testing and development
#[derive(Default)]
pub struct InMemoryTrainingJobStore {
    jobs: Arc<RwLock<HashMap<TrainingId, TrainingJob>>>,
}

impl InMemoryTrainingJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrainingJobStore for InMemoryTrainingJobStore {
    async fn insert_job(&self, job: TrainingJob) -> PipelineResult<()> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn get_job(&self, id: TrainingId) -> PipelineResult<Option<TrainingJob>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> PipelineResult<Vec<TrainingJob>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<TrainingJob> = jobs
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(matching)
    }

    async fn compare_and_set_job_status(
        &self,
        id: TrainingId,
        from: JobStatus,
        to: JobStatus,
    ) -> PipelineResult<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == from => {
                job.status = to;
                let now = Utc::now();
                if from == JobStatus::Queued && job.started_at.is_none() {
                    job.started_at = Some(now);
                }
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_job(
        &self,
        id: TrainingId,
        artifact: ModelArtifact,
        manifest: CapabilityManifest,
    ) -> PipelineResult<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Training => {
                let now = Utc::now();
                job.status = JobStatus::Completed;
                job.artifact = Some(artifact);
                job.manifest = Some(manifest);
                job.completed_at = Some(now);
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_job(
        &self,
        id: TrainingId,
        from: JobStatus,
        error: ErrorDetail,
    ) -> PipelineResult<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == from => {
                let now = Utc::now();
                job.status = JobStatus::Failed;
                job.error = Some(error);
                job.completed_at = Some(now);
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, PipelineError};
    use crate::registry::ContentId;
    use crate::training::schema::TrainingConfig;

    fn job(role: &str) -> TrainingJob {
        TrainingJob::new(role, vec![ContentId::new()], TrainingConfig::default())
    }

    fn artifact() -> ModelArtifact {
        ModelArtifact {
            reference: "specialized/project_manager/abc123def456".to_string(),
            digest: "abc123".to_string(),
            model_type: Default::default(),
            chunk_count: 3,
        }
    }

    #[tokio::test]
    async fn test_insert_get_list() {
        let store = InMemoryTrainingJobStore::new();
        let mut first = job("project_manager");
        let mut second = job("analyst");
        second.created_at = first.created_at + chrono::Duration::milliseconds(5);
        first.updated_at = first.created_at;
        second.updated_at = second.created_at;

        store.insert_job(second.clone()).await.unwrap();
        store.insert_job(first.clone()).await.unwrap();

        assert!(store.get_job(first.id).await.unwrap().is_some());
        assert!(store.get_job(TrainingId::new()).await.unwrap().is_none());

        let all = store.list_jobs(&JobFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, first.id);

        let pms = store
            .list_jobs(&JobFilter::default().with_role("project_manager"))
            .await
            .unwrap();
        assert_eq!(pms.len(), 1);
        assert_eq!(pms[0].id, first.id);
    }

    #[tokio::test]
    async fn test_cas_stamps_started_at() {
        let store = InMemoryTrainingJobStore::new();
        let created = job("project_manager");
        let id = created.id;
        store.insert_job(created).await.unwrap();

        assert!(store
            .compare_and_set_job_status(id, JobStatus::Queued, JobStatus::Collecting)
            .await
            .unwrap());
        let stored = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Collecting);
        assert!(stored.started_at.is_some());

        // A second writer expecting queued loses
        assert!(!store
            .compare_and_set_job_status(id, JobStatus::Queued, JobStatus::Collecting)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_complete_requires_training_status() {
        let store = InMemoryTrainingJobStore::new();
        let created = job("project_manager");
        let id = created.id;
        store.insert_job(created).await.unwrap();

        // Still queued: completion is refused
        assert!(!store
            .complete_job(id, artifact(), CapabilityManifest::default())
            .await
            .unwrap());

        store
            .compare_and_set_job_status(id, JobStatus::Queued, JobStatus::Collecting)
            .await
            .unwrap();
        store
            .compare_and_set_job_status(id, JobStatus::Collecting, JobStatus::Training)
            .await
            .unwrap();
        assert!(store
            .complete_job(id, artifact(), CapabilityManifest::default())
            .await
            .unwrap());

        let stored = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.artifact.is_some());
        assert!(stored.manifest.is_some());
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_fail_records_error_verbatim() {
        let store = InMemoryTrainingJobStore::new();
        let created = job("project_manager");
        let id = created.id;
        store.insert_job(created).await.unwrap();

        let detail = PipelineError::cancelled("cancelled by operator").detail();
        assert!(store
            .fail_job(id, JobStatus::Queued, detail.clone())
            .await
            .unwrap());

        let stored = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
        assert_eq!(stored.error, Some(detail));

        // Already failed: nothing to do
        let detail = PipelineError::provider("x").detail();
        assert!(!store.fail_job(id, JobStatus::Queued, detail).await.unwrap());
    }
}
