//! Adaptation record persistence

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::schema::{AdaptationFilter, AdaptationId, AdaptationRecord, AdaptationStatus};
use crate::error::{ErrorDetail, PipelineError, PipelineResult};

/// Storage backend for adaptation records
#[async_trait]
pub trait AdaptationStore: Send + Sync {
    async fn insert_record(&self, record: AdaptationRecord) -> PipelineResult<()>;

    async fn get_record(&self, id: AdaptationId) -> PipelineResult<Option<AdaptationRecord>>;

    /// Records matching the filter, ordered by creation time
    async fn list_records(&self, filter: &AdaptationFilter)
        -> PipelineResult<Vec<AdaptationRecord>>;

    /// Move a pending record to applied, recording which agent classes were
    /// patched. Returns false if the record is missing or no longer pending.
    async fn mark_applied(
        &self,
        id: AdaptationId,
        adapted_agent_classes: Vec<String>,
    ) -> PipelineResult<bool>;

    /// Move a pending record to failed with the error that stopped it.
    /// Returns false if the record is missing or no longer pending.
    async fn mark_failed(&self, id: AdaptationId, error: ErrorDetail) -> PipelineResult<bool>;
}

/// In-memory store for tests and single-process runs
#[derive(Default, Clone)]
pub struct InMemoryAdaptationStore {
    records: Arc<RwLock<HashMap<AdaptationId, AdaptationRecord>>>,
}

impl InMemoryAdaptationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdaptationStore for InMemoryAdaptationStore {
    async fn insert_record(&self, record: AdaptationRecord) -> PipelineResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(PipelineError::storage(format!(
                "adaptation record {} already exists",
                record.id
            )));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn get_record(&self, id: AdaptationId) -> PipelineResult<Option<AdaptationRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn list_records(
        &self,
        filter: &AdaptationFilter,
    ) -> PipelineResult<Vec<AdaptationRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<AdaptationRecord> = records
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(matching)
    }

    async fn mark_applied(
        &self,
        id: AdaptationId,
        adapted_agent_classes: Vec<String>,
    ) -> PipelineResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&id) {
            Some(record) if record.status == AdaptationStatus::Pending => {
                record.status = AdaptationStatus::Applied;
                record.adapted_agent_classes = adapted_agent_classes;
                record.applied_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, id: AdaptationId, error: ErrorDetail) -> PipelineResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&id) {
            Some(record) if record.status == AdaptationStatus::Pending => {
                record.status = AdaptationStatus::Failed;
                record.error = Some(error);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
