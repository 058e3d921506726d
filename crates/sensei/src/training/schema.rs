//! Training job records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ErrorDetail;
use crate::registry::ContentId;

/// Opaque identifier for a training job
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TrainingId(pub Uuid);

impl TrainingId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrainingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrainingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TrainingId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle of a training job.
///
/// Strictly forward: `queued → collecting → training → completed`, with
/// `failed` reachable from every non-terminal status (validation errors,
/// cancellation, strategy failures, timeouts).
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
pub enum JobStatus {
    Queued,
    Collecting,
    Training,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        matches!(
            (self, to),
            (JobStatus::Queued, JobStatus::Collecting)
                | (JobStatus::Collecting, JobStatus::Training)
                | (JobStatus::Training, JobStatus::Completed)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Collecting, JobStatus::Failed)
                | (JobStatus::Training, JobStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// What kind of model a job produces
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
pub enum ModelType {
    #[default]
    Specialized,
    General,
}

/// Which built-in (or registered) strategy executes the job
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Default,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrainingMethod {
    #[default]
    FineTuning,
    RetrievalAugmented,
}

/// Per-job training parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrainingConfig {
    #[serde(default)]
    pub model_type: ModelType,
    #[serde(default)]
    pub training_method: TrainingMethod,
    /// Free-form strategy parameters. Ordered map so the canonical form that
    /// feeds the artifact digest is stable.
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

/// One capability extracted from trained material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Strategy-assigned confidence in [0, 1]
    pub confidence: f64,
    pub description: String,
    /// How many chunks contributed
    pub source_chunks: usize,
}

/// Capability-name → capability map produced by a completed job.
///
/// Keyed by a `BTreeMap` so iteration order, serialization, and digests are
/// deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CapabilityManifest {
    pub capabilities: BTreeMap<String, Capability>,
}

impl CapabilityManifest {
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.capabilities.get(name)
    }

    /// Entries whose confidence meets `threshold`, in name order
    pub fn at_or_above(&self, threshold: f64) -> Vec<(&String, &Capability)> {
        self.capabilities
            .iter()
            .filter(|(_, capability)| capability.confidence >= threshold)
            .collect()
    }
}

/// Versioned reference to a trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Stable reference, e.g. `specialized/project_manager/3fd2a81c90b4`
    pub reference: String,
    /// SHA-256 over role, ordered chunk text, and canonical config
    pub digest: String,
    pub model_type: ModelType,
    pub chunk_count: usize,
}

/// One training run, retained indefinitely for audit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJob {
    pub id: TrainingId,
    pub role: String,
    /// Contents consumed, in input order
    pub content_ids: Vec<ContentId>,
    pub config: TrainingConfig,
    pub status: JobStatus,
    pub artifact: Option<ModelArtifact>,
    pub manifest: Option<CapabilityManifest>,
    pub error: Option<ErrorDetail>,
    /// Set when this job was created by retrying a failed one
    pub retry_of: Option<TrainingId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TrainingJob {
    pub fn new(role: impl Into<String>, content_ids: Vec<ContentId>, config: TrainingConfig) -> Self {
        let now = Utc::now();
        Self {
            id: TrainingId::new(),
            role: role.into(),
            content_ids,
            config,
            status: JobStatus::Queued,
            artifact: None,
            manifest: None,
            error: None,
            retry_of: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }
}

/// Filter for listing training jobs
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub role: Option<String>,
    pub status: Option<JobStatus>,
}

impl JobFilter {
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, job: &TrainingJob) -> bool {
        if let Some(role) = &self.role {
            if &job.role != role {
                return false;
            }
        }
        if let Some(status) = self.status {
            if job.status != status {
                return false;
            }
        }
        true
    }
}
