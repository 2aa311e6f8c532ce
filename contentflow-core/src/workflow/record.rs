//! Workflow record: the durable state of one pipeline execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Workflow type. Each type maps to one pipeline definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    ContentGeneration,
    StrategyGeneration,
    PerformanceAnalysis,
    EngagementOptimization,
}

impl WorkflowType {
    /// All known workflow types.
    pub const ALL: [WorkflowType; 4] = [
        WorkflowType::ContentGeneration,
        WorkflowType::StrategyGeneration,
        WorkflowType::PerformanceAnalysis,
        WorkflowType::EngagementOptimization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::ContentGeneration => "content_generation",
            WorkflowType::StrategyGeneration => "strategy_generation",
            WorkflowType::PerformanceAnalysis => "performance_analysis",
            WorkflowType::EngagementOptimization => "engagement_optimization",
        }
    }
}

impl std::fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content_generation" => Ok(WorkflowType::ContentGeneration),
            "strategy_generation" => Ok(WorkflowType::StrategyGeneration),
            "performance_analysis" => Ok(WorkflowType::PerformanceAnalysis),
            "engagement_optimization" => Ok(WorkflowType::EngagementOptimization),
            other => Err(EngineError::Configuration(format!(
                "Unknown workflow type: {}",
                other
            ))),
        }
    }
}

/// Workflow status.
///
/// Transitions are monotonic:
///
/// ```text
/// pending --(run starts)--> in_progress
/// in_progress --(all stages succeed)--> completed
/// in_progress --(any stage fails)--> failed
/// pending|in_progress --(cancel requested)--> cancelled
/// ```
///
/// `completed`, `failed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Whether this status permits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed stage attempt within a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEntry {
    /// 0-based position in the pipeline
    pub stage_index: usize,

    /// Stage name
    pub stage_name: String,

    /// When the stage started
    pub started_at: DateTime<Utc>,

    /// Stage duration
    pub duration_ms: u64,

    /// Whether the stage succeeded
    pub success: bool,

    /// Stage output (present if success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// Error message (present if not)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepEntry {
    /// Create a successful step entry
    pub fn success(
        stage_index: usize,
        stage_name: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        output: serde_json::Value,
    ) -> Self {
        Self {
            stage_index,
            stage_name: stage_name.into(),
            started_at,
            duration_ms,
            success: true,
            output: Some(output),
            error: None,
        }
    }

    /// Create a failed step entry
    pub fn failure(
        stage_index: usize,
        stage_name: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            stage_index,
            stage_name: stage_name.into(),
            started_at,
            duration_ms,
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Execution metrics, finalized when a workflow reaches a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetrics {
    /// Wall-clock duration from run start to the terminal transition
    pub total_duration_ms: u64,

    /// Names of the stages that executed, in order
    pub stages_used: Vec<String>,

    /// Number of step entries recorded
    pub steps_completed: usize,

    /// 100 exactly when the workflow completed; otherwise the share of
    /// pipeline stages that succeeded
    pub success_rate_percent: u32,
}

/// Error detail for a failed workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowErrorDetail {
    /// Which stage failed and why
    pub message: String,

    /// Underlying error text
    pub detail: String,

    /// When the failure was recorded
    pub timestamp: DateTime<Utc>,
}

/// The durable, versioned state of one pipeline execution.
///
/// Created by the engine at the start of a run, mutated exclusively by the
/// engine during execution, and permanently read-only once terminal.
/// Records are never deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRecord {
    /// Globally unique identifier, assigned at creation
    pub workflow_id: Uuid,

    /// Requesting user
    pub owner_id: String,

    /// Business/profile context
    pub subject_id: String,

    /// Workflow type
    #[serde(rename = "type")]
    pub workflow_type: WorkflowType,

    /// Current status
    pub status: WorkflowStatus,

    /// Opaque input payload supplied at creation
    pub input: serde_json::Value,

    /// Ordered, append-only step log
    pub steps: Vec<StepEntry>,

    /// Structured output of the final stage (completed only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Human-oriented synopsis of the result (completed only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,

    /// Execution metrics (terminal only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<WorkflowMetrics>,

    /// Error detail (failed only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkflowErrorDetail>,

    /// Set once at creation
    pub created_at: DateTime<Utc>,

    /// Set on every mutation
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    /// Create a new record in `pending` status.
    pub fn new(
        workflow_type: WorkflowType,
        owner_id: impl Into<String>,
        subject_id: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            subject_id: subject_id.into(),
            workflow_type,
            status: WorkflowStatus::Pending,
            input,
            steps: Vec::new(),
            result: None,
            summary: None,
            metrics: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the record has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Transition `pending -> in_progress`.
    pub fn mark_in_progress(&mut self) {
        debug_assert_eq!(self.status, WorkflowStatus::Pending);
        self.status = WorkflowStatus::InProgress;
        self.touch();
    }

    /// Append a step entry.
    pub fn push_step(&mut self, entry: StepEntry) {
        debug_assert!(!self.is_terminal());
        self.steps.push(entry);
        self.touch();
    }

    /// Transition to `completed` with result, summary and metrics.
    pub fn complete(
        &mut self,
        result: serde_json::Value,
        summary: serde_json::Value,
        metrics: WorkflowMetrics,
    ) {
        debug_assert!(!self.is_terminal());
        self.status = WorkflowStatus::Completed;
        self.result = Some(result);
        self.summary = Some(summary);
        self.metrics = Some(metrics);
        self.touch();
    }

    /// Transition to `failed` with error detail and metrics.
    pub fn fail(&mut self, message: impl Into<String>, detail: impl Into<String>, metrics: WorkflowMetrics) {
        debug_assert!(!self.is_terminal());
        self.status = WorkflowStatus::Failed;
        self.error = Some(WorkflowErrorDetail {
            message: message.into(),
            detail: detail.into(),
            timestamp: Utc::now(),
        });
        self.metrics = Some(metrics);
        self.touch();
    }

    /// Transition to `cancelled` with metrics. A cancelled record carries
    /// neither result nor error.
    pub fn cancel(&mut self, metrics: WorkflowMetrics) {
        debug_assert!(!self.is_terminal());
        self.status = WorkflowStatus::Cancelled;
        self.metrics = Some(metrics);
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metrics() -> WorkflowMetrics {
        WorkflowMetrics {
            total_duration_ms: 10,
            stages_used: vec!["stage".to_string()],
            steps_completed: 1,
            success_rate_percent: 100,
        }
    }

    #[test]
    fn test_new_record_is_pending() {
        let record = WorkflowRecord::new(
            WorkflowType::ContentGeneration,
            "u1",
            "b1",
            serde_json::json!({}),
        );
        assert_eq!(record.status, WorkflowStatus::Pending);
        assert!(record.steps.is_empty());
        assert!(record.result.is_none());
        assert!(!record.is_terminal());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::Pending.is_terminal());
        assert!(!WorkflowStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_complete_populates_result_only() {
        let mut record = WorkflowRecord::new(
            WorkflowType::StrategyGeneration,
            "u1",
            "b1",
            serde_json::json!({}),
        );
        record.mark_in_progress();
        record.complete(
            serde_json::json!({"strategy": "x"}),
            serde_json::json!({"pillarCount": 3}),
            sample_metrics(),
        );
        assert_eq!(record.status, WorkflowStatus::Completed);
        assert!(record.result.is_some());
        assert!(record.error.is_none());
    }

    #[test]
    fn test_fail_populates_error_only() {
        let mut record = WorkflowRecord::new(
            WorkflowType::ContentGeneration,
            "u1",
            "b1",
            serde_json::json!({}),
        );
        record.mark_in_progress();
        record.fail("Stage 'strategy' failed", "connection refused", sample_metrics());
        assert_eq!(record.status, WorkflowStatus::Failed);
        assert!(record.result.is_none());
        let error = record.error.unwrap();
        assert!(error.message.contains("strategy"));
    }

    #[test]
    fn test_cancel_has_neither_result_nor_error() {
        let mut record = WorkflowRecord::new(
            WorkflowType::ContentGeneration,
            "u1",
            "b1",
            serde_json::json!({}),
        );
        record.cancel(sample_metrics());
        assert_eq!(record.status, WorkflowStatus::Cancelled);
        assert!(record.result.is_none());
        assert!(record.error.is_none());
        assert!(record.metrics.is_some());
    }

    #[test]
    fn test_workflow_type_from_str() {
        assert_eq!(
            "content_generation".parse::<WorkflowType>().unwrap(),
            WorkflowType::ContentGeneration
        );
        assert!("image_generation".parse::<WorkflowType>().is_err());
    }

    #[test]
    fn test_persisted_layout_is_camel_case() {
        let record = WorkflowRecord::new(
            WorkflowType::PerformanceAnalysis,
            "u1",
            "b1",
            serde_json::json!({"metrics": {}}),
        );
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("workflowId").is_some());
        assert!(value.get("createdAt").is_some());
        assert_eq!(value["type"], "performance_analysis");
        assert_eq!(value["status"], "pending");
    }

    #[test]
    fn test_step_entry_serde() {
        let entry = StepEntry::failure(1, "strategy", Utc::now(), 42, "boom");
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["stageIndex"], 1);
        assert_eq!(value["success"], false);
        assert!(value.get("output").is_none());
    }
}
