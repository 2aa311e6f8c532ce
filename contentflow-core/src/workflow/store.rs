//! Workflow persistence boundary.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::workflow::record::{WorkflowRecord, WorkflowStatus, WorkflowType};

/// Compact view of one workflow, used in owner activity listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub workflow_id: Uuid,
    #[serde(rename = "type")]
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    pub subject_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&WorkflowRecord> for WorkflowSummary {
    fn from(record: &WorkflowRecord) -> Self {
        Self {
            workflow_id: record.workflow_id,
            workflow_type: record.workflow_type,
            status: record.status,
            subject_id: record.subject_id.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Aggregate statistics over one owner's workflow history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub in_progress: usize,
    pub by_type: HashMap<String, usize>,
    /// Mean wall-clock duration over terminal runs that carry metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_duration_ms: Option<u64>,
    pub recent_activity: Vec<WorkflowSummary>,
}

/// Durable storage for workflow records.
///
/// The engine is the only writer. `update` is optimistic: an implementation
/// must reject a write whose record is staler than what it already holds.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Persist a new record.
    ///
    /// # Errors
    ///
    /// Returns a store error if a record with the same id already exists.
    async fn create(&self, record: &WorkflowRecord) -> Result<()>;

    /// Replace an existing record.
    ///
    /// # Errors
    ///
    /// Returns not-found if the record was never created, or a store error
    /// if the stored copy is newer than the incoming one.
    async fn update(&self, record: &WorkflowRecord) -> Result<()>;

    /// Fetch a record by id.
    async fn find_by_id(&self, workflow_id: Uuid) -> Result<Option<WorkflowRecord>>;

    /// The owner's most recent workflows, newest first.
    async fn find_recent_by_owner(&self, owner_id: &str, limit: usize)
        -> Result<Vec<WorkflowRecord>>;

    /// Aggregate statistics over the owner's full history.
    async fn aggregate_stats(&self, owner_id: &str, recent_limit: usize) -> Result<OwnerStats>;
}

/// In-memory store, suitable for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    records: RwLock<HashMap<Uuid, WorkflowRecord>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn create(&self, record: &WorkflowRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.workflow_id) {
            return Err(EngineError::Store(format!(
                "Workflow {} already exists",
                record.workflow_id
            )));
        }
        records.insert(record.workflow_id, record.clone());
        Ok(())
    }

    async fn update(&self, record: &WorkflowRecord) -> Result<()> {
        let mut records = self.records.write().await;
        match records.get(&record.workflow_id) {
            None => Err(EngineError::NotFound(format!(
                "Workflow {} not found",
                record.workflow_id
            ))),
            Some(stored) if stored.updated_at > record.updated_at => {
                Err(EngineError::Store(format!(
                    "Stale write rejected for workflow {}",
                    record.workflow_id
                )))
            }
            Some(_) => {
                records.insert(record.workflow_id, record.clone());
                Ok(())
            }
        }
    }

    async fn find_by_id(&self, workflow_id: Uuid) -> Result<Option<WorkflowRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&workflow_id).cloned())
    }

    async fn find_recent_by_owner(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<WorkflowRecord>> {
        let records = self.records.read().await;
        let mut owned: Vec<WorkflowRecord> = records
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        owned.truncate(limit);
        Ok(owned)
    }

    async fn aggregate_stats(&self, owner_id: &str, recent_limit: usize) -> Result<OwnerStats> {
        let records = self.records.read().await;
        let mut owned: Vec<&WorkflowRecord> = records
            .values()
            .filter(|r| r.owner_id == owner_id)
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut stats = OwnerStats {
            total: owned.len(),
            completed: 0,
            failed: 0,
            cancelled: 0,
            in_progress: 0,
            by_type: HashMap::new(),
            avg_duration_ms: None,
            recent_activity: owned
                .iter()
                .take(recent_limit)
                .map(|r| WorkflowSummary::from(*r))
                .collect(),
        };

        let mut durations: Vec<u64> = Vec::new();
        for record in owned {
            match record.status {
                WorkflowStatus::Completed => stats.completed += 1,
                WorkflowStatus::Failed => stats.failed += 1,
                WorkflowStatus::Cancelled => stats.cancelled += 1,
                WorkflowStatus::Pending | WorkflowStatus::InProgress => stats.in_progress += 1,
            }
            *stats
                .by_type
                .entry(record.workflow_type.as_str().to_string())
                .or_insert(0) += 1;
            if record.is_terminal() {
                if let Some(metrics) = &record.metrics {
                    durations.push(metrics.total_duration_ms);
                }
            }
        }
        if !durations.is_empty() {
            stats.avg_duration_ms =
                Some(durations.iter().sum::<u64>() / durations.len() as u64);
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(owner: &str, workflow_type: WorkflowType) -> WorkflowRecord {
        WorkflowRecord::new(workflow_type, owner, "subject-1", json!({"business": {}}))
    }

    #[tokio::test]
    async fn test_create_then_find() {
        let store = InMemoryWorkflowStore::new();
        let r = record("u1", WorkflowType::ContentGeneration);
        store.create(&r).await.unwrap();

        let found = store.find_by_id(r.workflow_id).await.unwrap().unwrap();
        assert_eq!(found.workflow_id, r.workflow_id);
        assert_eq!(found.status, WorkflowStatus::Pending);
    }

    #[tokio::test]
    async fn test_create_duplicate_rejected() {
        let store = InMemoryWorkflowStore::new();
        let r = record("u1", WorkflowType::ContentGeneration);
        store.create(&r).await.unwrap();
        assert!(matches!(
            store.create(&r).await,
            Err(EngineError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_update_unknown_is_not_found() {
        let store = InMemoryWorkflowStore::new();
        let r = record("u1", WorkflowType::ContentGeneration);
        assert!(matches!(
            store.update(&r).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_update_rejected() {
        let store = InMemoryWorkflowStore::new();
        let mut r = record("u1", WorkflowType::ContentGeneration);
        store.create(&r).await.unwrap();

        // Newer copy lands first.
        let stale = r.clone();
        r.mark_in_progress();
        store.update(&r).await.unwrap();

        assert!(matches!(
            store.update(&stale).await,
            Err(EngineError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_recent_by_owner_ordering_and_limit() {
        let store = InMemoryWorkflowStore::new();
        for _ in 0..5 {
            store
                .create(&record("u1", WorkflowType::ContentGeneration))
                .await
                .unwrap();
        }
        store
            .create(&record("u2", WorkflowType::StrategyGeneration))
            .await
            .unwrap();

        let recent = store.find_recent_by_owner("u1", 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent.windows(2).all(|w| w[0].created_at >= w[1].created_at));
        assert!(recent.iter().all(|r| r.owner_id == "u1"));
    }

    #[tokio::test]
    async fn test_aggregate_stats() {
        let store = InMemoryWorkflowStore::new();

        let mut completed = record("u1", WorkflowType::ContentGeneration);
        completed.mark_in_progress();
        completed.complete(
            json!({}),
            json!({}),
            crate::workflow::record::WorkflowMetrics {
                total_duration_ms: 5,
                stages_used: vec![],
                steps_completed: 0,
                success_rate_percent: 100,
            },
        );
        store.create(&completed).await.unwrap();

        store
            .create(&record("u1", WorkflowType::PerformanceAnalysis))
            .await
            .unwrap();

        let stats = store.aggregate_stats("u1", 10).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.by_type["content_generation"], 1);
        assert_eq!(stats.avg_duration_ms, Some(5));
        assert_eq!(stats.recent_activity.len(), 2);
    }
}
