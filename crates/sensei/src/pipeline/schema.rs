//! Pipeline run records
//!
//! A [`PipelineRun`] is the audit record of one end-to-end orchestration:
//! which stages completed, which layer records were produced, and on failure
//! the stage the run failed from with the originating error untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adaptation::{AdaptationConfig, AdaptationId, AdaptationStatus};
use crate::error::ErrorDetail;
use crate::registry::ContentId;
use crate::training::{JobStatus, TrainingConfig, TrainingId};

/// Unique identifier for a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Stage of the composite pipeline state machine.
///
/// Non-failed stages name the last completed milestone; `failed` is terminal
/// and the run's [`StageError`] names the stage it failed from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Default,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PipelineStage {
    #[default]
    Initiated,
    ContentRegistered,
    ContentProcessed,
    ModelTrained,
    AgentAdapted,
    Completed,
    Failed,
}

impl PipelineStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// The stage a run failed from, with the originating error verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: PipelineStage,
    pub detail: ErrorDetail,
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "at {}: {}", self.stage, self.detail)
    }
}

/// One end-to-end orchestration run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub role: String,
    pub certification_name: String,
    pub stage: PipelineStage,
    /// Filled as the corresponding stages complete
    pub content_id: Option<ContentId>,
    pub training_id: Option<TrainingId>,
    pub adaptation_id: Option<AdaptationId>,
    pub error: Option<StageError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn new(role: impl Into<String>, certification_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            role: role.into(),
            certification_name: certification_name.into(),
            stage: PipelineStage::Initiated,
            content_id: None,
            training_id: None,
            adaptation_id: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn advance(&mut self, stage: PipelineStage) {
        self.stage = stage;
        self.updated_at = Utc::now();
    }

    /// Mark the run failed, keeping the stage it failed from and the error
    /// exactly as the failing layer reported it.
    pub fn fail(&mut self, detail: ErrorDetail) {
        self.error = Some(StageError {
            stage: self.stage,
            detail,
        });
        self.stage = PipelineStage::Failed;
        self.updated_at = Utc::now();
    }
}

/// Everything needed to train and adapt a role from one certification source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainRequest {
    pub role: String,
    pub content_path: String,
    pub certification_name: String,
    #[serde(default)]
    pub training_config: TrainingConfig,
    #[serde(default)]
    pub adaptation_config: AdaptationConfig,
}

impl TrainRequest {
    pub fn new(
        role: impl Into<String>,
        content_path: impl Into<String>,
        certification_name: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            content_path: content_path.into(),
            certification_name: certification_name.into(),
            training_config: TrainingConfig::default(),
            adaptation_config: AdaptationConfig::default(),
        }
    }

    pub fn with_training_config(mut self, config: TrainingConfig) -> Self {
        self.training_config = config;
        self
    }

    pub fn with_adaptation_config(mut self, config: AdaptationConfig) -> Self {
        self.adaptation_config = config;
        self
    }
}

/// Consolidated status snapshot for a training id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingStatus {
    pub training_id: TrainingId,
    pub role: String,
    pub stage: PipelineStage,
    pub job_status: JobStatus,
    pub content_ids: Vec<ContentId>,
    pub adaptation_id: Option<AdaptationId>,
    pub adaptation_status: Option<AdaptationStatus>,
    pub error: Option<StageError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_fail_keeps_failing_stage() {
        let mut run = PipelineRun::new("project_manager", "PMP Module 1");
        run.advance(PipelineStage::ContentRegistered);
        run.fail(ErrorDetail::new(ErrorKind::Timeout, "embedding stage deadline"));

        assert_eq!(run.stage, PipelineStage::Failed);
        let error = run.error.as_ref().unwrap();
        assert_eq!(error.stage, PipelineStage::ContentRegistered);
        assert_eq!(error.detail.kind, ErrorKind::Timeout);
        assert!(run.stage.is_terminal());
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let json = serde_json::to_string(&PipelineStage::ContentProcessed).unwrap();
        assert_eq!(json, "\"content_processed\"");
        assert_eq!(PipelineStage::ModelTrained.to_string(), "model_trained");

        let back: PipelineStage = serde_json::from_str("\"agent_adapted\"").unwrap();
        assert_eq!(back, PipelineStage::AgentAdapted);
    }

    #[test]
    fn test_request_defaults() {
        let request = TrainRequest::new("project_manager", "/tmp/pmp.md", "PMP Module 1");
        assert_eq!(request.training_config, TrainingConfig::default());
        assert_eq!(
            request.adaptation_config.integration_points,
            AdaptationConfig::default().integration_points
        );

        let json = serde_json::to_string(&request).unwrap();
        let back: TrainRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, "project_manager");
    }
}
