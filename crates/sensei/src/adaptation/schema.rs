//! Adaptation records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::blending::BlendKind;
use crate::error::ErrorDetail;
use crate::training::TrainingId;

/// Opaque identifier for an adaptation
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AdaptationId(pub Uuid);

impl AdaptationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AdaptationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AdaptationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AdaptationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Behavior hooks a trained artifact can be integrated into
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IntegrationPoint {
    DecisionMaking,
    TaskPlanning,
    Communication,
    ToolSelection,
}

/// Lifecycle of an adaptation record
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
pub enum AdaptationStatus {
    Pending,
    Applied,
    Failed,
}

/// How a trained artifact is integrated into a role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationConfig {
    /// Behavior hooks to patch; must name at least one
    #[serde(default = "default_integration_points")]
    pub integration_points: Vec<IntegrationPoint>,
    /// How strongly trained knowledge outweighs default behavior, in [0, 1].
    /// Out-of-range input is clamped with a warning, never rejected.
    #[serde(default = "default_knowledge_weight")]
    pub knowledge_weight: f64,
    /// Manifest entries below this confidence are skipped, in [0, 1]
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Blend strategy override; the pipeline default applies when unset
    #[serde(default)]
    pub blend: Option<BlendKind>,
}

fn default_integration_points() -> Vec<IntegrationPoint> {
    vec![IntegrationPoint::DecisionMaking]
}

fn default_knowledge_weight() -> f64 {
    0.7
}

fn default_confidence_threshold() -> f64 {
    0.3
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            integration_points: default_integration_points(),
            knowledge_weight: default_knowledge_weight(),
            confidence_threshold: default_confidence_threshold(),
            blend: None,
        }
    }
}

/// One integration point's slice of an applied adaptation, as installed on
/// agents. A later adaptation's overlay for the same point fully replaces
/// the earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorOverlay {
    pub adaptation_id: AdaptationId,
    pub training_id: TrainingId,
    pub point: IntegrationPoint,
    pub knowledge_weight: f64,
    pub blend: BlendKind,
    /// Surviving capability names with their confidences
    pub capabilities: BTreeMap<String, f64>,
}

/// Result of patching a role with a trained artifact, one per patch
/// operation, retained for audit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationRecord {
    pub id: AdaptationId,
    pub role: String,
    pub training_id: TrainingId,
    pub integration_points: Vec<IntegrationPoint>,
    /// Class identifiers patched; filled when applied
    pub adapted_agent_classes: Vec<String>,
    /// Effective (clamped) weight
    pub knowledge_weight: f64,
    /// Effective (clamped) threshold
    pub confidence_threshold: f64,
    pub blend: BlendKind,
    /// Clamp notices and skipped-entry notes; informational, never errors
    pub warnings: Vec<String>,
    pub status: AdaptationStatus,
    pub error: Option<ErrorDetail>,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
}

impl AdaptationRecord {
    pub fn new(
        role: impl Into<String>,
        training_id: TrainingId,
        integration_points: Vec<IntegrationPoint>,
        knowledge_weight: f64,
        confidence_threshold: f64,
        blend: BlendKind,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            id: AdaptationId::new(),
            role: role.into(),
            training_id,
            integration_points,
            adapted_agent_classes: Vec::new(),
            knowledge_weight,
            confidence_threshold,
            blend,
            warnings,
            status: AdaptationStatus::Pending,
            error: None,
            created_at: Utc::now(),
            applied_at: None,
        }
    }
}

/// Filter for listing adaptation records
#[derive(Debug, Clone, Default)]
pub struct AdaptationFilter {
    pub role: Option<String>,
    pub status: Option<AdaptationStatus>,
}

impl AdaptationFilter {
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_status(mut self, status: AdaptationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, record: &AdaptationRecord) -> bool {
        if let Some(role) = &self.role {
            if &record.role != role {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        true
    }
}
