//! Model Training Layer
//!
//! Collects processed chunks for a role, runs the configured training
//! strategy, and stores a versioned artifact plus capability manifest on the
//! job record. Jobs move strictly forward through
//! `queued → collecting → training → completed | failed` via store-level
//! compare-and-swap; a per-role lock keeps one job training against a role's
//! artifact slot at a time, with contenders observably `queued`.

pub mod schema;
pub mod storage;
pub mod strategy;

pub use schema::{
    Capability, CapabilityManifest, JobFilter, JobStatus, ModelArtifact, ModelType,
    TrainingConfig, TrainingId, TrainingJob, TrainingMethod,
};
pub use storage::{InMemoryTrainingJobStore, TrainingJobStore};
pub use strategy::{FineTuningStrategy, RetrievalAugmentedStrategy, TrainingStrategy};

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::registry::{ContentChunk, ContentId, ContentRegistry, ContentStatus};
use crate::sync::{with_deadline, KeyedMutex};

/// Runs training jobs against the content registry
pub struct TrainingManager {
    registry: ContentRegistry,
    store: Arc<dyn TrainingJobStore>,
    strategies: HashMap<TrainingMethod, Arc<dyn TrainingStrategy>>,
    role_locks: KeyedMutex<String>,
    cancel_tokens: DashMap<TrainingId, CancellationToken>,
    collect_timeout: Duration,
    train_timeout: Duration,
}

impl TrainingManager {
    /// Build a manager with both built-in strategies registered.
    pub fn new(
        registry: ContentRegistry,
        store: Arc<dyn TrainingJobStore>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            registry,
            store,
            strategies: HashMap::new(),
            role_locks: KeyedMutex::new(),
            cancel_tokens: DashMap::new(),
            collect_timeout: Duration::from_secs(config.timeouts.collect_secs),
            train_timeout: Duration::from_secs(config.timeouts.train_secs),
        }
        .with_strategy(Arc::new(FineTuningStrategy::default()))
        .with_strategy(Arc::new(RetrievalAugmentedStrategy::default()))
    }

    /// Register (or replace) the strategy for its training method.
    pub fn with_strategy(mut self, strategy: Arc<dyn TrainingStrategy>) -> Self {
        self.strategies.insert(strategy.method(), strategy);
        self
    }

    /// Override the stage timeouts (primarily for tests and tuning).
    pub fn with_timeouts(mut self, collect: Duration, train: Duration) -> Self {
        self.collect_timeout = collect;
        self.train_timeout = train;
        self
    }

    /// Create and run a job to completion, returning its id.
    pub async fn train(
        &self,
        role: &str,
        content_ids: Vec<ContentId>,
        config: TrainingConfig,
    ) -> PipelineResult<TrainingId> {
        let training_id = self.create_job(role, content_ids, config).await?;
        self.execute_job(training_id).await?;
        Ok(training_id)
    }

    /// Validate inputs and persist a `queued` job without running it.
    ///
    /// Split from [`execute_job`](Self::execute_job) so callers can record
    /// the job id before execution and still find the job when it fails.
    pub async fn create_job(
        &self,
        role: &str,
        content_ids: Vec<ContentId>,
        config: TrainingConfig,
    ) -> PipelineResult<TrainingId> {
        if content_ids.is_empty() {
            return Err(PipelineError::invalid_state(
                "training requires at least one content id",
            ));
        }
        let mut not_ready = Vec::new();
        for &content_id in &content_ids {
            match self.registry.get(content_id).await {
                Ok(content) if content.status == ContentStatus::Processed => {}
                Ok(content) => not_ready.push(format!("{content_id} is {}", content.status)),
                Err(_) => not_ready.push(format!("{content_id} is unknown")),
            }
        }
        if !not_ready.is_empty() {
            return Err(PipelineError::content_not_ready(not_ready.join(", ")));
        }
        if !self.strategies.contains_key(&config.training_method) {
            return Err(PipelineError::config(format!(
                "no strategy registered for training method {}",
                config.training_method
            )));
        }

        let job = TrainingJob::new(role, content_ids, config);
        let training_id = job.id;
        self.store.insert_job(job).await?;
        info!(training_id = %training_id, role, "training job queued");
        Ok(training_id)
    }

    /// Run a queued job to a terminal state, serialized per role.
    pub async fn execute_job(&self, training_id: TrainingId) -> PipelineResult<TrainingJob> {
        let job = self.fetch(training_id).await?;
        if job.status != JobStatus::Queued {
            return Err(PipelineError::invalid_state(format!(
                "training job {training_id} is {}; only queued jobs can execute",
                job.status
            )));
        }

        let cancel = CancellationToken::new();
        self.cancel_tokens.insert(training_id, cancel.clone());
        // The artifact slot: contenders for the same role wait here, still
        // observably queued
        let _slot = self.role_locks.lock(job.role.clone()).await;
        let result = self.run(job, &cancel).await;
        self.cancel_tokens.remove(&training_id);
        result
    }

    /// Fetch a job by id.
    pub async fn get_job(&self, training_id: TrainingId) -> PipelineResult<TrainingJob> {
        self.fetch(training_id).await
    }

    pub async fn list_jobs(&self, filter: JobFilter) -> PipelineResult<Vec<TrainingJob>> {
        self.store.list_jobs(&filter).await
    }

    /// Cancel a job. `Ok(true)` when it was hard-cancelled (still queued or
    /// collecting); `Ok(false)` when it is already training (token
    /// propagated, completion awaited by the executor) or terminal.
    pub async fn cancel(&self, training_id: TrainingId) -> PipelineResult<bool> {
        let job = self.fetch(training_id).await?;
        let err = PipelineError::cancelled(format!("training job {training_id} was cancelled"));
        for from in [JobStatus::Queued, JobStatus::Collecting] {
            if self.store.fail_job(training_id, from, err.detail()).await? {
                if let Some(token) = self.cancel_tokens.get(&training_id) {
                    token.cancel();
                }
                info!(training_id = %training_id, from = %from, "training job cancelled");
                return Ok(true);
            }
        }
        if job.status == JobStatus::Training || job.status == JobStatus::Collecting {
            if let Some(token) = self.cancel_tokens.get(&training_id) {
                token.cancel();
                debug!(training_id = %training_id, "cancellation requested for running job");
            }
        }
        Ok(false)
    }

    /// Create and run a fresh job with a failed job's inputs.
    pub async fn retry(&self, training_id: TrainingId) -> PipelineResult<TrainingId> {
        let job = self.fetch(training_id).await?;
        if job.status != JobStatus::Failed {
            return Err(PipelineError::invalid_state(format!(
                "training job {training_id} is {}; only failed jobs can be retried",
                job.status
            )));
        }

        let mut fresh = TrainingJob::new(&job.role, job.content_ids.clone(), job.config.clone());
        fresh.retry_of = Some(training_id);
        let fresh_id = fresh.id;
        self.store.insert_job(fresh).await?;
        info!(training_id = %fresh_id, retry_of = %training_id, "retry job queued");
        self.execute_job(fresh_id).await?;
        Ok(fresh_id)
    }

    async fn fetch(&self, training_id: TrainingId) -> PipelineResult<TrainingJob> {
        self.store
            .get_job(training_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("training job {training_id}")))
    }

    async fn run(
        &self,
        job: TrainingJob,
        cancel: &CancellationToken,
    ) -> PipelineResult<TrainingJob> {
        let training_id = job.id;
        // Resolved before the first transition so a missing strategy still
        // finalizes the record
        let Some(strategy) = self.strategies.get(&job.config.training_method).cloned() else {
            let err = PipelineError::config(format!(
                "no strategy registered for training method {}",
                job.config.training_method
            ));
            return self.finalize_failure(training_id, JobStatus::Queued, err).await;
        };

        if !self
            .store
            .compare_and_set_job_status(training_id, JobStatus::Queued, JobStatus::Collecting)
            .await?
        {
            return self.bail_lost_cas(training_id).await;
        }

        let collected = with_deadline(
            self.collect_timeout,
            format!("chunk collection for training job {training_id}"),
            self.collect(&job),
        )
        .await;
        let chunks = match collected {
            Ok(chunks) => chunks,
            Err(err) => {
                return self
                    .finalize_failure(training_id, JobStatus::Collecting, err)
                    .await
            }
        };
        if cancel.is_cancelled() {
            let err =
                PipelineError::cancelled(format!("training job {training_id} was cancelled"));
            return self
                .finalize_failure(training_id, JobStatus::Collecting, err)
                .await;
        }

        if !self
            .store
            .compare_and_set_job_status(training_id, JobStatus::Collecting, JobStatus::Training)
            .await?
        {
            return self.bail_lost_cas(training_id).await;
        }

        let trained = with_deadline(
            self.train_timeout,
            format!("strategy dispatch for training job {training_id}"),
            strategy.train(&job.role, &chunks, &job.config, cancel),
        )
        .await;
        let (artifact, manifest) = match trained {
            Ok(output) => output,
            Err(err) => {
                return self
                    .finalize_failure(training_id, JobStatus::Training, err)
                    .await
            }
        };

        if !self.store.complete_job(training_id, artifact, manifest).await? {
            return self.bail_lost_cas(training_id).await;
        }
        info!(training_id = %training_id, role = %job.role, "training job completed");
        self.fetch(training_id).await
    }

    /// Gather chunks for every content, per-content order preserved,
    /// concatenated in input order.
    async fn collect(&self, job: &TrainingJob) -> PipelineResult<Vec<ContentChunk>> {
        let mut all = Vec::new();
        for &content_id in &job.content_ids {
            let chunks = self.registry.chunks(content_id).await?;
            all.extend(chunks);
        }
        debug!(training_id = %job.id, chunks = all.len(), "collected training chunks");
        Ok(all)
    }

    /// Record the failure verbatim and hand the error back unchanged.
    async fn finalize_failure(
        &self,
        training_id: TrainingId,
        from: JobStatus,
        err: PipelineError,
    ) -> PipelineResult<TrainingJob> {
        warn!(training_id = %training_id, kind = %err.kind(), error = %err, "training job failed");
        let recorded = self.store.fail_job(training_id, from, err.detail()).await?;
        if !recorded {
            // cancel() can beat us to the terminal state; the record already
            // carries a cancellation error
            debug!(training_id = %training_id, "job was finalized by a concurrent writer");
        }
        Err(err)
    }

    /// A transition CAS lost means someone else finalized the job, almost
    /// always `cancel`.
    async fn bail_lost_cas(&self, training_id: TrainingId) -> PipelineResult<TrainingJob> {
        let job = self.fetch(training_id).await?;
        if job.status == JobStatus::Failed
            && job.error.as_ref().is_some_and(|e| e.kind == ErrorKind::Cancelled)
        {
            return Err(PipelineError::cancelled(format!(
                "training job {training_id} was cancelled"
            )));
        }
        Err(PipelineError::invalid_state(format!(
            "training job {training_id} is {}; a concurrent writer finalized it",
            job.status
        )))
    }
}
