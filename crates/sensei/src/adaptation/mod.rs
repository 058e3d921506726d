//! Agent adaptation
//!
//! Turns a completed training job's capability manifest into behavior
//! overlays and installs them on every agent of a role, live instances and
//! future spawns alike. Each adaptation is recorded so operators can see
//! which training run shaped which agents, and with what settings.

pub mod blending;
pub mod runtime;
pub mod schema;
pub mod storage;

pub use blending::{blend_strategy, BlendKind, BlendStrategy, LinearBlend, WeightedVoteBlend};
pub use runtime::{
    Agent, AgentFactory, AgentRuntime, RoleAgent, RoleAgentFactory, TaskOutcome, TaskRequest,
};
pub use schema::{
    AdaptationConfig, AdaptationFilter, AdaptationId, AdaptationRecord, AdaptationStatus,
    BehaviorOverlay, IntegrationPoint,
};
pub use storage::{AdaptationStore, InMemoryAdaptationStore};

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::training::{CapabilityManifest, JobStatus, TrainingId, TrainingJobStore};

/// Applies trained capabilities to the agents of a role
pub struct AdaptationManager {
    jobs: Arc<dyn TrainingJobStore>,
    store: Arc<dyn AdaptationStore>,
    runtime: Arc<AgentRuntime>,
    default_blend: BlendKind,
}

impl AdaptationManager {
    pub fn new(
        jobs: Arc<dyn TrainingJobStore>,
        store: Arc<dyn AdaptationStore>,
        runtime: Arc<AgentRuntime>,
    ) -> Self {
        Self {
            jobs,
            store,
            runtime,
            default_blend: BlendKind::default(),
        }
    }

    /// Blend used when an adaptation config does not name one
    pub fn with_default_blend(mut self, blend: BlendKind) -> Self {
        self.default_blend = blend;
        self
    }

    /// Adapt a role's agents with the capabilities of a completed training
    /// job.
    ///
    /// Validates the job, persists a pending record, builds one overlay per
    /// integration point from the manifest capabilities at or above the
    /// confidence threshold, and installs them through the runtime. The
    /// record ends applied or failed; out-of-range settings are clamped and
    /// noted as warnings rather than rejected.
    pub async fn adapt(
        &self,
        role: &str,
        training_id: TrainingId,
        config: AdaptationConfig,
    ) -> PipelineResult<AdaptationId> {
        let job = self
            .jobs
            .get_job(training_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("training job {training_id}")))?;
        if job.status != JobStatus::Completed {
            return Err(PipelineError::training_not_complete(format!(
                "training job {training_id} is {}",
                job.status
            )));
        }
        let manifest = job.manifest.ok_or_else(|| {
            PipelineError::invalid_state(format!(
                "completed training job {training_id} has no capability manifest"
            ))
        })?;
        if job.role != role {
            return Err(PipelineError::invalid_state(format!(
                "training job {training_id} trained role '{}', not '{role}'",
                job.role
            )));
        }
        if config.integration_points.is_empty() {
            return Err(PipelineError::invalid_state(
                "adaptation requires at least one integration point",
            ));
        }

        let mut warnings = Vec::new();
        let knowledge_weight = clamp_unit(config.knowledge_weight, "knowledge_weight", &mut warnings);
        let confidence_threshold = clamp_unit(
            config.confidence_threshold,
            "confidence_threshold",
            &mut warnings,
        );

        let mut points = config.integration_points;
        points.sort();
        points.dedup();

        let blend = config.blend.unwrap_or(self.default_blend);

        let (capabilities, skipped) = gate_capabilities(&manifest, confidence_threshold);
        if capabilities.is_empty() {
            warnings.push(format!(
                "no capabilities at or above confidence threshold {confidence_threshold}; \
                 agents keep their current behavior"
            ));
        } else if !skipped.is_empty() {
            debug!(
                role,
                threshold = confidence_threshold,
                skipped = ?skipped,
                "capabilities below confidence threshold skipped"
            );
        }

        let record = AdaptationRecord::new(
            role,
            training_id,
            points.clone(),
            knowledge_weight,
            confidence_threshold,
            blend,
            warnings,
        );
        let adaptation_id = record.id;
        self.store.insert_record(record).await?;

        // An adaptation with nothing over the threshold installs no overlays,
        // so agents keep whatever behavior they already had
        let overlays: Vec<BehaviorOverlay> = if capabilities.is_empty() {
            Vec::new()
        } else {
            points
                .iter()
                .map(|&point| BehaviorOverlay {
                    adaptation_id,
                    training_id,
                    point,
                    knowledge_weight,
                    blend,
                    capabilities: capabilities.clone(),
                })
                .collect()
        };

        match self.runtime.apply_adaptation(role, &overlays).await {
            Ok(classes) => {
                self.store.mark_applied(adaptation_id, classes.clone()).await?;
                info!(
                    adaptation_id = %adaptation_id,
                    role,
                    training_id = %training_id,
                    classes = classes.len(),
                    capabilities = capabilities.len(),
                    "adaptation applied"
                );
                Ok(adaptation_id)
            }
            Err(err) => {
                warn!(adaptation_id = %adaptation_id, role, error = %err, "adaptation failed");
                if let Err(store_err) = self.store.mark_failed(adaptation_id, err.detail()).await {
                    warn!(
                        adaptation_id = %adaptation_id,
                        error = %store_err,
                        "failed to record adaptation failure"
                    );
                }
                Err(err)
            }
        }
    }

    pub async fn get(&self, id: AdaptationId) -> PipelineResult<Option<AdaptationRecord>> {
        self.store.get_record(id).await
    }

    pub async fn list(&self, filter: &AdaptationFilter) -> PipelineResult<Vec<AdaptationRecord>> {
        self.store.list_records(filter).await
    }
}

fn clamp_unit(value: f64, name: &str, warnings: &mut Vec<String>) -> f64 {
    if (0.0..=1.0).contains(&value) {
        value
    } else {
        let clamped = value.clamp(0.0, 1.0);
        warnings.push(format!("{name} {value} clamped to {clamped}"));
        clamped
    }
}

/// Split a manifest at the confidence threshold: entries to install and the
/// names left out.
fn gate_capabilities(
    manifest: &CapabilityManifest,
    threshold: f64,
) -> (BTreeMap<String, f64>, Vec<String>) {
    let kept: BTreeMap<String, f64> = manifest
        .at_or_above(threshold)
        .into_iter()
        .map(|(name, capability)| (name.clone(), capability.confidence))
        .collect();
    let skipped: Vec<String> = manifest
        .capabilities
        .keys()
        .filter(|name| !kept.contains_key(*name))
        .cloned()
        .collect();
    (kept, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::registry::ContentId;
    use crate::training::{
        Capability, CapabilityManifest, InMemoryTrainingJobStore, ModelArtifact, ModelType,
        TrainingConfig, TrainingJob,
    };

    fn completed_job(role: &str, capabilities: &[(&str, f64)]) -> TrainingJob {
        let mut job = TrainingJob::new(role, vec![ContentId::new()], TrainingConfig::default());
        job.status = JobStatus::Completed;
        job.artifact = Some(ModelArtifact {
            reference: format!("specialized/{role}/abc123def456"),
            digest: "abc123def456".repeat(5) + "abcd",
            model_type: ModelType::Specialized,
            chunk_count: 3,
        });
        job.manifest = Some(CapabilityManifest {
            capabilities: capabilities
                .iter()
                .map(|(name, confidence)| {
                    (
                        name.to_string(),
                        Capability {
                            confidence: *confidence,
                            description: format!("knowledge of {name}"),
                            source_chunks: 3,
                        },
                    )
                })
                .collect(),
        });
        job
    }

    struct Harness {
        manager: AdaptationManager,
        jobs: Arc<InMemoryTrainingJobStore>,
        store: Arc<InMemoryAdaptationStore>,
        runtime: Arc<AgentRuntime>,
    }

    fn harness() -> Harness {
        let jobs = Arc::new(InMemoryTrainingJobStore::new());
        let store = Arc::new(InMemoryAdaptationStore::new());
        let runtime = Arc::new(AgentRuntime::new());
        let manager = AdaptationManager::new(
            Arc::clone(&jobs) as Arc<dyn TrainingJobStore>,
            Arc::clone(&store) as Arc<dyn AdaptationStore>,
            Arc::clone(&runtime),
        );
        Harness {
            manager,
            jobs,
            store,
            runtime,
        }
    }

    async fn seed_pm(h: &Harness, capabilities: &[(&str, f64)]) -> TrainingId {
        let job = completed_job("project_manager", capabilities);
        let id = job.id;
        h.jobs.insert_job(job).await.unwrap();
        h.runtime
            .register_class(
                "project_manager",
                Arc::new(RoleAgentFactory::new("ProjectManagerAgent")),
            )
            .await;
        id
    }

    #[tokio::test]
    async fn test_adapt_happy_path() {
        let h = harness();
        let training_id = seed_pm(&h, &[("risk", 0.9), ("scheduling", 0.6), ("budget", 0.2)]).await;
        let agent = h.runtime.spawn("project_manager").await.unwrap();

        let adaptation_id = h
            .manager
            .adapt("project_manager", training_id, AdaptationConfig::default())
            .await
            .unwrap();

        let record = h.manager.get(adaptation_id).await.unwrap().unwrap();
        assert_eq!(record.status, AdaptationStatus::Applied);
        assert_eq!(
            record.adapted_agent_classes,
            vec!["ProjectManagerAgent".to_string()]
        );
        assert!(record.applied_at.is_some());
        assert!(record.warnings.is_empty());

        let behavior = agent.behavior().await;
        let overlay = &behavior[&IntegrationPoint::DecisionMaking];
        assert_eq!(overlay.adaptation_id, adaptation_id);
        assert!(overlay.capabilities.contains_key("risk"));
        // 0.2 is under the default 0.3 threshold
        assert!(!overlay.capabilities.contains_key("budget"));

        let outcome = agent
            .process_task(TaskRequest::new("Mitigate the top risk"))
            .await
            .unwrap();
        // linear blend of baseline 0.5 with the matched 0.9 at weight 0.7
        assert!((outcome.confidence - 0.78).abs() < 1e-9);
        assert_eq!(outcome.applied_capabilities, vec!["risk".to_string()]);
    }

    #[tokio::test]
    async fn test_adapt_requires_completed_training() {
        let h = harness();
        let queued = TrainingJob::new(
            "project_manager",
            vec![ContentId::new()],
            TrainingConfig::default(),
        );
        let queued_id = queued.id;
        h.jobs.insert_job(queued).await.unwrap();

        let err = h
            .manager
            .adapt("project_manager", queued_id, AdaptationConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TrainingNotComplete);
        assert!(err.to_string().contains("queued"));

        let err = h
            .manager
            .adapt("project_manager", TrainingId::new(), AdaptationConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // Nothing was recorded for either rejection
        let records = h.manager.list(&AdaptationFilter::default()).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_adapt_rejects_role_mismatch() {
        let h = harness();
        let job = completed_job("analyst", &[("forecasting", 0.8)]);
        let job_id = job.id;
        h.jobs.insert_job(job).await.unwrap();

        let err = h
            .manager
            .adapt("project_manager", job_id, AdaptationConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(err.to_string().contains("analyst"));
    }

    #[tokio::test]
    async fn test_unknown_role_marks_record_failed() {
        let h = harness();
        let job = completed_job("project_manager", &[("risk", 0.9)]);
        let job_id = job.id;
        h.jobs.insert_job(job).await.unwrap();
        // No agent class registered for the role

        let err = h
            .manager
            .adapt("project_manager", job_id, AdaptationConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RoleNotFound);

        let records = h.manager.list(&AdaptationFilter::default()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AdaptationStatus::Failed);
        let detail = records[0].error.as_ref().unwrap();
        assert_eq!(detail.kind, ErrorKind::RoleNotFound);
    }

    #[tokio::test]
    async fn test_out_of_range_settings_clamp_with_warnings() {
        let h = harness();
        let training_id = seed_pm(&h, &[("risk", 0.9)]).await;

        let config = AdaptationConfig {
            knowledge_weight: 1.7,
            confidence_threshold: -0.2,
            ..Default::default()
        };
        let adaptation_id = h
            .manager
            .adapt("project_manager", training_id, config)
            .await
            .unwrap();

        let record = h.manager.get(adaptation_id).await.unwrap().unwrap();
        assert_eq!(record.status, AdaptationStatus::Applied);
        assert!((record.knowledge_weight - 1.0).abs() < f64::EPSILON);
        assert!(record.confidence_threshold.abs() < f64::EPSILON);
        assert_eq!(record.warnings.len(), 2);
        assert!(record.warnings[0].contains("knowledge_weight 1.7 clamped to 1"));
        assert!(record.warnings[1].contains("confidence_threshold -0.2 clamped to 0"));
    }

    #[tokio::test]
    async fn test_high_threshold_leaves_behavior_alone() {
        let h = harness();
        let training_id = seed_pm(&h, &[("risk", 0.6), ("scheduling", 0.4)]).await;
        let agent = h.runtime.spawn("project_manager").await.unwrap();

        let config = AdaptationConfig {
            confidence_threshold: 0.95,
            ..Default::default()
        };
        let adaptation_id = h
            .manager
            .adapt("project_manager", training_id, config)
            .await
            .unwrap();

        let record = h.manager.get(adaptation_id).await.unwrap().unwrap();
        assert_eq!(record.status, AdaptationStatus::Applied);
        assert!(record
            .warnings
            .iter()
            .any(|warning| warning.contains("no capabilities at or above")));
        assert!(agent.behavior().await.is_empty());

        let outcome = agent
            .process_task(TaskRequest::new("Assess the project risk register"))
            .await
            .unwrap();
        assert!((outcome.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_threshold_gate_skips_by_name() {
        let manifest = completed_job(
            "project_manager",
            &[("risk", 0.9), ("scheduling", 0.6), ("budget", 0.2)],
        )
        .manifest
        .unwrap();

        let (kept, skipped) = gate_capabilities(&manifest, 0.3);
        assert_eq!(kept.len(), 2);
        assert!((kept["risk"] - 0.9).abs() < f64::EPSILON);
        assert_eq!(skipped, vec!["budget".to_string()]);

        let (kept, skipped) = gate_capabilities(&manifest, 0.0);
        assert_eq!(kept.len(), 3);
        assert!(skipped.is_empty());
    }

    #[tokio::test]
    async fn test_points_are_sorted_and_deduped() {
        let h = harness();
        let training_id = seed_pm(&h, &[("risk", 0.9)]).await;
        let agent = h.runtime.spawn("project_manager").await.unwrap();

        let config = AdaptationConfig {
            integration_points: vec![
                IntegrationPoint::Communication,
                IntegrationPoint::DecisionMaking,
                IntegrationPoint::Communication,
            ],
            ..Default::default()
        };
        let adaptation_id = h
            .manager
            .adapt("project_manager", training_id, config)
            .await
            .unwrap();

        let record = h.manager.get(adaptation_id).await.unwrap().unwrap();
        assert_eq!(
            record.integration_points,
            vec![IntegrationPoint::DecisionMaking, IntegrationPoint::Communication]
        );
        assert_eq!(agent.behavior().await.len(), 2);

        let err = h
            .manager
            .adapt(
                "project_manager",
                training_id,
                AdaptationConfig {
                    integration_points: Vec::new(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_readaptation_supersedes_previous_overlay() {
        let h = harness();
        let first_training = seed_pm(&h, &[("risk", 0.9)]).await;
        let second = completed_job("project_manager", &[("scheduling", 0.8)]);
        let second_training = second.id;
        h.jobs.insert_job(second).await.unwrap();
        let agent = h.runtime.spawn("project_manager").await.unwrap();

        h.manager
            .adapt("project_manager", first_training, AdaptationConfig::default())
            .await
            .unwrap();
        let second_adaptation = h
            .manager
            .adapt("project_manager", second_training, AdaptationConfig::default())
            .await
            .unwrap();

        let behavior = agent.behavior().await;
        let overlay = &behavior[&IntegrationPoint::DecisionMaking];
        assert_eq!(overlay.adaptation_id, second_adaptation);
        assert_eq!(overlay.training_id, second_training);
        assert!(!overlay.capabilities.contains_key("risk"));

        let records = h
            .manager
            .list(&AdaptationFilter::default().with_role("project_manager"))
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .all(|record| record.status == AdaptationStatus::Applied));
    }

    #[tokio::test]
    async fn test_same_adaptation_twice_is_idempotent_on_behavior() {
        let h = harness();
        let training_id = seed_pm(&h, &[("risk", 0.9), ("scheduling", 0.6)]).await;
        let agent = h.runtime.spawn("project_manager").await.unwrap();

        h.manager
            .adapt("project_manager", training_id, AdaptationConfig::default())
            .await
            .unwrap();
        let first = agent.behavior().await;
        h.manager
            .adapt("project_manager", training_id, AdaptationConfig::default())
            .await
            .unwrap();
        let second = agent.behavior().await;

        assert_eq!(first.len(), second.len());
        for (point, overlay) in &first {
            let repeat = &second[point];
            assert_eq!(overlay.capabilities, repeat.capabilities);
            assert_eq!(overlay.training_id, repeat.training_id);
            assert!((overlay.knowledge_weight - repeat.knowledge_weight).abs() < f64::EPSILON);
        }

        let outcome = agent
            .process_task(TaskRequest::new("Mitigate the top risk"))
            .await
            .unwrap();
        assert!((outcome.confidence - 0.78).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_store_keeps_full_audit_trail() {
        let h = harness();
        let training_id = seed_pm(&h, &[("risk", 0.9)]).await;

        let adaptation_id = h
            .manager
            .adapt("project_manager", training_id, AdaptationConfig::default())
            .await
            .unwrap();

        let record = h.store.get_record(adaptation_id).await.unwrap().unwrap();
        assert_eq!(record.role, "project_manager");
        assert_eq!(record.training_id, training_id);
        assert_eq!(record.blend, BlendKind::Linear);
        assert!((record.knowledge_weight - 0.7).abs() < f64::EPSILON);
        assert!((record.confidence_threshold - 0.3).abs() < f64::EPSILON);
    }
}
