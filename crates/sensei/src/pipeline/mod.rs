//! Training Orchestration Layer
//!
//! Drives one certification file through the full
//! register → process → train → adapt sequence, persisting a [`PipelineRun`]
//! that advances stage by stage. A stage failure marks the run `failed` with
//! the stage it had reached and the layer's error recorded verbatim, then
//! propagates that same error to the caller. Completed stages are never
//! rolled back: a processed content or completed training job survives a
//! later adaptation failure and can be reused.

pub mod schema;
pub mod storage;

pub use schema::{
    PipelineRun, PipelineStage, RunId, StageError, TrainRequest, TrainingStatus,
};
pub use storage::{InMemoryRunStore, RunStore};

use std::sync::Arc;
use tracing::{info, warn};

use crate::adaptation::{AdaptationManager, AgentRuntime};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::knowledge::{
    build_vector_store, EmbeddingProvider, HashEmbedder, KnowledgeIntegrator, VectorStore,
};
use crate::registry::ContentRegistry;
use crate::storage::{build_stores, PipelineStores};
use crate::training::{JobStatus, TrainingId, TrainingManager, TrainingStrategy};

/// Assembles a [`TrainingPipeline`] from configuration, with hooks to swap
/// in a custom embedder, vector store, stores, runtime, or strategies.
pub struct TrainingPipelineBuilder {
    config: PipelineConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    stores: Option<PipelineStores>,
    runtime: Option<Arc<AgentRuntime>>,
    strategies: Vec<Arc<dyn TrainingStrategy>>,
}

impl TrainingPipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            embedder: None,
            vector_store: None,
            stores: None,
            runtime: None,
            strategies: Vec::new(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_vector_store(mut self, vector_store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(vector_store);
        self
    }

    /// Use pre-built stores instead of the ones `storage` config names.
    pub fn with_stores(mut self, stores: PipelineStores) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn with_runtime(mut self, runtime: Arc<AgentRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Register an extra training strategy on top of the built-ins.
    pub fn with_strategy(mut self, strategy: Arc<dyn TrainingStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub async fn build(self) -> PipelineResult<TrainingPipeline> {
        let config = self.config;
        for warning in config.validate()? {
            warn!(%warning, "pipeline configuration");
        }

        let stores = match self.stores {
            Some(stores) => stores,
            None => build_stores(&config.storage).await?,
        };
        let embedder = self
            .embedder
            .unwrap_or_else(|| Arc::new(HashEmbedder::new(config.embedding.dimension)));
        let vector_store = self
            .vector_store
            .unwrap_or_else(|| build_vector_store(&config.vector_store, config.embedding.dimension));
        let runtime = self.runtime.unwrap_or_else(|| Arc::new(AgentRuntime::new()));

        let registry = ContentRegistry::new(stores.content.clone());
        let knowledge =
            KnowledgeIntegrator::new(registry.clone(), embedder, vector_store, &config);
        let mut training = TrainingManager::new(registry.clone(), stores.jobs.clone(), &config);
        for strategy in self.strategies {
            training = training.with_strategy(strategy);
        }
        let adaptation =
            AdaptationManager::new(stores.jobs.clone(), stores.adaptations, runtime.clone())
                .with_default_blend(config.blend);

        Ok(TrainingPipeline {
            config,
            registry,
            knowledge,
            training,
            adaptation,
            runtime,
            runs: stores.runs,
        })
    }
}

/// The full certification-to-capability pipeline.
///
/// Owns all four layers; each stays independently usable through its
/// accessor, so callers can register content without training or re-adapt
/// an old training job without reprocessing.
pub struct TrainingPipeline {
    config: PipelineConfig,
    registry: ContentRegistry,
    knowledge: KnowledgeIntegrator,
    training: TrainingManager,
    adaptation: AdaptationManager,
    runtime: Arc<AgentRuntime>,
    runs: Arc<dyn RunStore>,
}

impl std::fmt::Debug for TrainingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingPipeline").finish_non_exhaustive()
    }
}

impl TrainingPipeline {
    pub fn builder(config: PipelineConfig) -> TrainingPipelineBuilder {
        TrainingPipelineBuilder::new(config)
    }

    /// Run the whole pipeline for one certification file.
    ///
    /// The job id is recorded on the run before training executes, so the
    /// run is addressable by training id while the model is still training.
    pub async fn train_agent_from_certification(
        &self,
        request: TrainRequest,
    ) -> PipelineResult<TrainingStatus> {
        let TrainRequest {
            role,
            content_path,
            certification_name,
            training_config,
            adaptation_config,
        } = request;

        let mut run = PipelineRun::new(&role, &certification_name);
        self.runs.insert_run(run.clone()).await?;
        info!(run_id = %run.id, role = %role, certification = %certification_name, "pipeline run started");

        let content_id = match self
            .registry
            .register(&content_path, &certification_name, &role)
            .await
        {
            Ok(id) => id,
            Err(err) => return self.fail_run(run, err).await,
        };
        run.content_id = Some(content_id);
        run.advance(PipelineStage::ContentRegistered);
        self.runs.update_run(run.clone()).await?;

        if let Err(err) = self.knowledge.process(content_id).await {
            return self.fail_run(run, err).await;
        }
        run.advance(PipelineStage::ContentProcessed);
        self.runs.update_run(run.clone()).await?;

        let training_id = match self
            .training
            .create_job(&role, vec![content_id], training_config)
            .await
        {
            Ok(id) => id,
            Err(err) => return self.fail_run(run, err).await,
        };
        run.training_id = Some(training_id);
        self.runs.update_run(run.clone()).await?;
        if let Err(err) = self.training.execute_job(training_id).await {
            return self.fail_run(run, err).await;
        }
        run.advance(PipelineStage::ModelTrained);
        self.runs.update_run(run.clone()).await?;

        let adaptation_id = match self
            .adaptation
            .adapt(&role, training_id, adaptation_config)
            .await
        {
            Ok(id) => id,
            Err(err) => return self.fail_run(run, err).await,
        };
        run.adaptation_id = Some(adaptation_id);
        run.advance(PipelineStage::AgentAdapted);
        self.runs.update_run(run.clone()).await?;

        run.advance(PipelineStage::Completed);
        self.runs.update_run(run.clone()).await?;
        info!(run_id = %run.id, training_id = %training_id, "pipeline run completed");

        self.get_training_status(training_id).await
    }

    /// Report where a training job stands, enriched with its run when the
    /// job came from the orchestrator. Jobs created directly through the
    /// training layer have their stage derived from the job status.
    pub async fn get_training_status(
        &self,
        training_id: TrainingId,
    ) -> PipelineResult<TrainingStatus> {
        let job = self.training.get_job(training_id).await?;
        let run = self.runs.find_run_by_training(training_id).await?;

        let stage = run
            .as_ref()
            .map(|r| r.stage)
            .unwrap_or_else(|| stage_for_job(job.status));
        let error = match run.as_ref().and_then(|r| r.error.clone()) {
            Some(stage_error) => Some(stage_error),
            // A direct job had processed content by the time it failed
            None => job.error.clone().map(|detail| StageError {
                stage: PipelineStage::ContentProcessed,
                detail,
            }),
        };
        let adaptation_id = run.as_ref().and_then(|r| r.adaptation_id);
        let adaptation_status = match adaptation_id {
            Some(id) => self.adaptation.get(id).await?.map(|record| record.status),
            None => None,
        };

        Ok(TrainingStatus {
            training_id,
            role: job.role,
            stage,
            job_status: job.status,
            content_ids: job.content_ids,
            adaptation_id,
            adaptation_status,
            error,
        })
    }

    pub async fn get_run(&self, id: RunId) -> PipelineResult<PipelineRun> {
        self.runs
            .get_run(id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("pipeline run {id}")))
    }

    pub async fn list_runs(&self) -> PipelineResult<Vec<PipelineRun>> {
        self.runs.list_runs().await
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ContentRegistry {
        &self.registry
    }

    pub fn knowledge(&self) -> &KnowledgeIntegrator {
        &self.knowledge
    }

    pub fn training(&self) -> &TrainingManager {
        &self.training
    }

    pub fn adaptation(&self) -> &AdaptationManager {
        &self.adaptation
    }

    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        &self.runtime
    }

    /// Mark the run failed at its current stage and hand the error back.
    async fn fail_run<T>(&self, mut run: PipelineRun, err: PipelineError) -> PipelineResult<T> {
        warn!(run_id = %run.id, stage = %run.stage, error = %err, "pipeline run failed");
        run.fail(err.detail());
        if let Err(update_err) = self.runs.update_run(run).await {
            warn!(error = %update_err, "failed to persist failed run");
        }
        Err(err)
    }
}

fn stage_for_job(status: JobStatus) -> PipelineStage {
    match status {
        JobStatus::Completed => PipelineStage::ModelTrained,
        JobStatus::Failed => PipelineStage::Failed,
        _ => PipelineStage::ContentProcessed,
    }
}
