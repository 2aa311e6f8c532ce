//! In-memory registry of live workflow runs.
//!
//! Liveness and cancellation are process-local: the registry tracks only
//! runs executing in this process, independent of what the store holds.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::workflow::record::WorkflowType;

/// Handle to one in-flight run.
#[derive(Debug)]
pub struct RunHandle {
    pub workflow_id: Uuid,
    pub owner_id: String,
    pub workflow_type: WorkflowType,
    pub started_at: DateTime<Utc>,
    token: CancellationToken,
}

impl RunHandle {
    pub fn new(workflow_id: Uuid, owner_id: impl Into<String>, workflow_type: WorkflowType) -> Self {
        Self {
            workflow_id,
            owner_id: owner_id.into(),
            workflow_type,
            started_at: Utc::now(),
            token: CancellationToken::new(),
        }
    }

    /// Request cancellation. The run observes it at its next stage boundary.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Registry of runs currently executing in this process.
#[derive(Default)]
pub struct WorkflowRegistry {
    runs: RwLock<HashMap<Uuid, Arc<RunHandle>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: Arc<RunHandle>) {
        self.runs.write().await.insert(handle.workflow_id, handle);
    }

    pub async fn remove(&self, workflow_id: Uuid) -> Option<Arc<RunHandle>> {
        self.runs.write().await.remove(&workflow_id)
    }

    pub async fn get(&self, workflow_id: Uuid) -> Option<Arc<RunHandle>> {
        self.runs.read().await.get(&workflow_id).cloned()
    }

    pub async fn is_active(&self, workflow_id: Uuid) -> bool {
        self.runs.read().await.contains_key(&workflow_id)
    }

    pub async fn active_count(&self) -> usize {
        self.runs.read().await.len()
    }
}
