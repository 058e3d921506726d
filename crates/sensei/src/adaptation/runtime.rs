//! Agent runtime registry
//!
//! An explicit role → agent-class registry populated at startup. Adaptation
//! patches a role's class prototype (so future instances inherit it) and
//! every live instance under the runtime's write lock, so nothing observes
//! a role with only part of an adaptation's integration points in place.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::blending::blend_strategy;
use super::schema::{BehaviorOverlay, IntegrationPoint};
use crate::error::{PipelineError, PipelineResult};

/// A unit of work handed to an agent
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub description: String,
    pub params: HashMap<String, serde_json::Value>,
}

impl TaskRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            params: HashMap::new(),
        }
    }
}

/// What an agent produced for a task
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub summary: String,
    /// Decision confidence in [0, 1], blended from trained knowledge when
    /// the agent is adapted
    pub confidence: f64,
    /// Trained capabilities that informed this outcome, sorted
    pub applied_capabilities: Vec<String>,
}

/// A live agent instance
#[async_trait]
pub trait Agent: Send + Sync {
    fn class_name(&self) -> &str;

    fn role(&self) -> &str;

    /// Snapshot of the installed behavior overlays
    async fn behavior(&self) -> HashMap<IntegrationPoint, BehaviorOverlay>;

    /// Install overlays, replacing any existing overlay for the same point.
    /// All given overlays land in one step.
    async fn apply_behavior(&self, overlays: &[BehaviorOverlay]);

    async fn process_task(&self, request: TaskRequest) -> anyhow::Result<TaskOutcome>;
}

impl std::fmt::Debug for dyn Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("class_name", &self.class_name())
            .field("role", &self.role())
            .finish_non_exhaustive()
    }
}

/// Builds agent instances for a role
pub trait AgentFactory: Send + Sync {
    fn class_name(&self) -> &str;

    fn build(&self, role: &str) -> Arc<dyn Agent>;
}

/// Reference agent: decides with a fixed baseline inclination until an
/// adaptation overlays trained knowledge on its decision making.
pub struct RoleAgent {
    class_name: String,
    role: String,
    baseline: f64,
    behavior: RwLock<HashMap<IntegrationPoint, BehaviorOverlay>>,
}

impl RoleAgent {
    pub fn new(class_name: impl Into<String>, role: impl Into<String>, baseline: f64) -> Self {
        Self {
            class_name: class_name.into(),
            role: role.into(),
            baseline,
            behavior: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Agent for RoleAgent {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn role(&self) -> &str {
        &self.role
    }

    async fn behavior(&self) -> HashMap<IntegrationPoint, BehaviorOverlay> {
        self.behavior.read().await.clone()
    }

    async fn apply_behavior(&self, overlays: &[BehaviorOverlay]) {
        let mut behavior = self.behavior.write().await;
        for overlay in overlays {
            behavior.insert(overlay.point, overlay.clone());
        }
    }

    async fn process_task(&self, request: TaskRequest) -> anyhow::Result<TaskOutcome> {
        let behavior = self.behavior.read().await;
        let description = request.description.to_lowercase();

        let mut applied: Vec<String> = Vec::new();
        let mut confidence = self.baseline;
        if let Some(overlay) = behavior.get(&IntegrationPoint::DecisionMaking) {
            let mut strongest = 0.0f64;
            for (name, capability_confidence) in &overlay.capabilities {
                if description.contains(&name.to_lowercase()) {
                    applied.push(name.clone());
                    strongest = strongest.max(*capability_confidence);
                }
            }
            confidence =
                blend_strategy(overlay.blend).blend(self.baseline, strongest, overlay.knowledge_weight);
        }
        // Other points contribute matched capabilities without steering the
        // decision score
        for (point, overlay) in behavior.iter() {
            if *point == IntegrationPoint::DecisionMaking {
                continue;
            }
            for name in overlay.capabilities.keys() {
                if description.contains(&name.to_lowercase()) && !applied.contains(name) {
                    applied.push(name.clone());
                }
            }
        }
        applied.sort();

        Ok(TaskOutcome {
            summary: format!(
                "{} handled '{}' with {} trained capabilities",
                self.role,
                request.description,
                applied.len()
            ),
            confidence,
            applied_capabilities: applied,
        })
    }
}

/// Factory for [`RoleAgent`]s
pub struct RoleAgentFactory {
    class_name: String,
    baseline: f64,
}

impl RoleAgentFactory {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            baseline: 0.5,
        }
    }

    pub fn with_baseline(mut self, baseline: f64) -> Self {
        self.baseline = baseline;
        self
    }
}

impl AgentFactory for RoleAgentFactory {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn build(&self, role: &str) -> Arc<dyn Agent> {
        Arc::new(RoleAgent::new(&self.class_name, role, self.baseline))
    }
}

#[derive(Default)]
struct RoleEntry {
    factories: Vec<Arc<dyn AgentFactory>>,
    instances: Vec<Arc<dyn Agent>>,
    /// Overlays every future instance inherits
    prototype: HashMap<IntegrationPoint, BehaviorOverlay>,
}

/// Role → agent-class registry with instance tracking
#[derive(Default)]
pub struct AgentRuntime {
    roles: RwLock<HashMap<String, RoleEntry>>,
}

impl AgentRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent class for a role. A class registered twice under
    /// the same name replaces the earlier factory.
    pub async fn register_class(&self, role: impl Into<String>, factory: Arc<dyn AgentFactory>) {
        let role = role.into();
        let mut roles = self.roles.write().await;
        let entry = roles.entry(role.clone()).or_default();
        entry
            .factories
            .retain(|existing| existing.class_name() != factory.class_name());
        entry.factories.push(factory);
        debug!(role, classes = entry.factories.len(), "agent class registered");
    }

    pub async fn has_role(&self, role: &str) -> bool {
        self.roles.read().await.contains_key(role)
    }

    /// Registered role names, sorted
    pub async fn role_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.roles.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Class names registered for a role
    pub async fn class_names(&self, role: &str) -> PipelineResult<Vec<String>> {
        let roles = self.roles.read().await;
        let entry = roles
            .get(role)
            .ok_or_else(|| PipelineError::role_not_found(role))?;
        Ok(entry
            .factories
            .iter()
            .map(|factory| factory.class_name().to_string())
            .collect())
    }

    /// Spawn an instance of the role's first registered class, tracked for
    /// future adaptations and already carrying the role's prototype.
    pub async fn spawn(&self, role: &str) -> PipelineResult<Arc<dyn Agent>> {
        let mut roles = self.roles.write().await;
        let entry = roles
            .get_mut(role)
            .ok_or_else(|| PipelineError::role_not_found(role))?;
        let factory = entry
            .factories
            .first()
            .ok_or_else(|| PipelineError::role_not_found(role))?;

        let agent = factory.build(role);
        let inherited: Vec<BehaviorOverlay> = entry.prototype.values().cloned().collect();
        if !inherited.is_empty() {
            agent.apply_behavior(&inherited).await;
        }
        entry.instances.push(Arc::clone(&agent));
        Ok(agent)
    }

    pub async fn instance_count(&self, role: &str) -> usize {
        self.roles
            .read()
            .await
            .get(role)
            .map_or(0, |entry| entry.instances.len())
    }

    /// Install overlays on the role's prototype and every live instance in
    /// one step under the runtime write lock. Returns the patched class
    /// names.
    pub async fn apply_adaptation(
        &self,
        role: &str,
        overlays: &[BehaviorOverlay],
    ) -> PipelineResult<Vec<String>> {
        let mut roles = self.roles.write().await;
        let entry = roles
            .get_mut(role)
            .ok_or_else(|| PipelineError::role_not_found(role))?;

        for overlay in overlays {
            entry.prototype.insert(overlay.point, overlay.clone());
        }
        for instance in &entry.instances {
            instance.apply_behavior(overlays).await;
        }
        debug!(
            role,
            points = overlays.len(),
            instances = entry.instances.len(),
            "adaptation applied to runtime"
        );
        Ok(entry
            .factories
            .iter()
            .map(|factory| factory.class_name().to_string())
            .collect())
    }
}
