//! Workflow engine: drives pipeline executions from creation to a terminal
//! status.
//!
//! One engine instance owns the run registry, the completion client and the
//! pipeline table. `start_workflow` runs the pipeline to completion on the
//! caller's task; stage failures surface as a `failed` record, not as an
//! `Err`. Only infrastructure problems (unknown type, missing input context,
//! persistence failures) return errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::completion::CompletionClient;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::workflow::pipeline::PipelineDefinition;
use crate::workflow::record::{
    StepEntry, WorkflowMetrics, WorkflowRecord, WorkflowStatus, WorkflowType,
};
use crate::workflow::registry::{RunHandle, WorkflowRegistry};
use crate::workflow::stage::PipelineState;
use crate::workflow::store::{OwnerStats, WorkflowStore};

/// Progress of a workflow run, derived from the step log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowProgress {
    pub steps_completed: usize,
    pub total_steps: usize,
    pub percentage: u32,
}

/// Point-in-time view of one workflow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatusReport {
    pub workflow_id: Uuid,
    #[serde(rename = "type")]
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    pub active: bool,
    pub progress: WorkflowProgress,
    pub record: WorkflowRecord,
}

pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    client: Arc<dyn CompletionClient>,
    registry: WorkflowRegistry,
    pipelines: HashMap<WorkflowType, Arc<PipelineDefinition>>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn WorkflowStore>,
        client: Arc<dyn CompletionClient>,
    ) -> Self {
        let pipelines = WorkflowType::ALL
            .into_iter()
            .map(|t| (t, Arc::new(PipelineDefinition::for_type(t, &config))))
            .collect();
        Self {
            store,
            client,
            registry: WorkflowRegistry::new(),
            pipelines,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The pipeline registered for a workflow type.
    pub fn pipeline(&self, workflow_type: WorkflowType) -> Option<&PipelineDefinition> {
        self.pipelines.get(&workflow_type).map(|p| p.as_ref())
    }

    /// Create a workflow record and run its pipeline to a terminal status.
    ///
    /// Stage failures and cancellations are reflected in the returned
    /// record's status.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown type, not-found when a
    /// required input key is missing (no record is created in that case),
    /// or a store error if persistence fails mid-run.
    pub async fn start_workflow(
        &self,
        workflow_type: WorkflowType,
        owner_id: &str,
        subject_id: &str,
        input: serde_json::Value,
    ) -> Result<WorkflowRecord> {
        let pipeline = self
            .pipelines
            .get(&workflow_type)
            .cloned()
            .ok_or_else(|| {
                EngineError::Configuration(format!(
                    "No pipeline registered for workflow type {}",
                    workflow_type
                ))
            })?;

        // Input validation happens before any record exists.
        pipeline.validate_input(&input)?;

        let mut record = WorkflowRecord::new(workflow_type, owner_id, subject_id, input);
        self.store.create(&record).await?;

        tracing::info!(
            workflow_id = %record.workflow_id,
            workflow_type = %workflow_type,
            owner_id = %owner_id,
            "Starting workflow"
        );

        let handle = Arc::new(RunHandle::new(record.workflow_id, owner_id, workflow_type));
        self.registry.insert(handle.clone()).await;

        let outcome = self.run_pipeline(&pipeline, &mut record, &handle).await;

        match outcome {
            Ok(()) => {
                self.registry.remove(record.workflow_id).await;
                Ok(record)
            }
            // Persistence failed mid-run. The registry entry stays so the
            // run remains observable and cancellable until cleanup.
            Err(e) => {
                tracing::warn!(
                    workflow_id = %record.workflow_id,
                    error = %e,
                    "Workflow run aborted by persistence failure"
                );
                Err(e)
            }
        }
    }

    /// Execute the pipeline stages, persisting the record after every
    /// transition. Returns `Err` only on persistence failure.
    async fn run_pipeline(
        &self,
        pipeline: &PipelineDefinition,
        record: &mut WorkflowRecord,
        handle: &RunHandle,
    ) -> Result<()> {
        let run_start = Instant::now();

        record.mark_in_progress();
        self.store.update(record).await?;

        let mut state = PipelineState::new(record.input.clone());

        for (index, stage) in pipeline.stages().iter().enumerate() {
            let deadline_hit = self
                .config
                .run_deadline
                .is_some_and(|d| run_start.elapsed() >= d);

            // Cancellation and deadlines are observed at stage boundaries
            // only; a stage in flight always runs to completion.
            if handle.is_cancelled() || deadline_hit {
                let reason = if deadline_hit { "deadline" } else { "request" };
                tracing::info!(
                    workflow_id = %record.workflow_id,
                    stage = stage.name(),
                    reason = reason,
                    "Workflow cancelled at stage boundary"
                );
                record.cancel(self.metrics_for(record, pipeline, run_start));
                self.store.update(record).await?;
                return Ok(());
            }

            let stage_start = Instant::now();
            let started_at = Utc::now();
            tracing::debug!(
                workflow_id = %record.workflow_id,
                stage = stage.name(),
                index = index,
                "Running stage"
            );

            match stage.run(&state, self.client.as_ref()).await {
                Ok(output) => {
                    let duration_ms = stage_start.elapsed().as_millis() as u64;
                    record.push_step(StepEntry::success(
                        index,
                        stage.name(),
                        started_at,
                        duration_ms,
                        output.clone(),
                    ));
                    state.merge(stage.name(), output);
                    self.store.update(record).await?;
                }
                Err(e) => {
                    let duration_ms = stage_start.elapsed().as_millis() as u64;
                    tracing::warn!(
                        workflow_id = %record.workflow_id,
                        stage = stage.name(),
                        error = %e,
                        "Stage failed"
                    );
                    record.push_step(StepEntry::failure(
                        index,
                        stage.name(),
                        started_at,
                        duration_ms,
                        e.to_string(),
                    ));
                    let metrics = self.metrics_for(record, pipeline, run_start);
                    record.fail(
                        format!("Stage '{}' failed: {}", stage.name(), e),
                        e.to_string(),
                        metrics,
                    );
                    self.store.update(record).await?;
                    return Ok(());
                }
            }
        }

        let (result, summary) = pipeline.assemble(&state);
        let metrics = WorkflowMetrics {
            total_duration_ms: run_start.elapsed().as_millis() as u64,
            stages_used: record.steps.iter().map(|s| s.stage_name.clone()).collect(),
            steps_completed: record.steps.len(),
            success_rate_percent: 100,
        };
        record.complete(result, summary, metrics);
        self.store.update(record).await?;

        tracing::info!(
            workflow_id = %record.workflow_id,
            duration_ms = record.metrics.as_ref().map(|m| m.total_duration_ms),
            "Workflow completed"
        );
        Ok(())
    }

    /// Metrics for a run that did not complete. The success rate is the
    /// share of the pipeline's stages that succeeded, so it reaches 100
    /// only on the completed path.
    fn metrics_for(
        &self,
        record: &WorkflowRecord,
        pipeline: &PipelineDefinition,
        run_start: Instant,
    ) -> WorkflowMetrics {
        let successful = record.steps.iter().filter(|s| s.success).count();
        let total = pipeline.stage_count().max(1);
        WorkflowMetrics {
            total_duration_ms: run_start.elapsed().as_millis() as u64,
            stages_used: record.steps.iter().map(|s| s.stage_name.clone()).collect(),
            steps_completed: record.steps.len(),
            success_rate_percent: (successful * 100 / total) as u32,
        }
    }

    /// Request cancellation of a live run.
    ///
    /// # Errors
    ///
    /// Returns not-found if the workflow does not exist or is not running
    /// in this process, and not-cancellable if it already reached a
    /// terminal status.
    pub async fn cancel_workflow(&self, workflow_id: Uuid) -> Result<()> {
        let record = self
            .store
            .find_by_id(workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Workflow {} not found", workflow_id)))?;

        if record.is_terminal() {
            return Err(EngineError::NotCancellable {
                workflow_id,
                status: record.status,
            });
        }

        let handle = self.registry.get(workflow_id).await.ok_or_else(|| {
            EngineError::NotFound(format!(
                "Workflow {} is not running in this process",
                workflow_id
            ))
        })?;

        handle.cancel();
        tracing::info!(workflow_id = %workflow_id, "Cancellation requested");
        Ok(())
    }

    /// Point-in-time status of a workflow.
    pub async fn workflow_status(&self, workflow_id: Uuid) -> Result<WorkflowStatusReport> {
        let record = self
            .store
            .find_by_id(workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Workflow {} not found", workflow_id)))?;

        let total_steps = self
            .pipelines
            .get(&record.workflow_type)
            .map(|p| p.stage_count())
            .unwrap_or(0);
        let steps_completed = record.steps.iter().filter(|s| s.success).count();
        let percentage = if record.status == WorkflowStatus::Completed {
            100
        } else if total_steps == 0 {
            0
        } else {
            (steps_completed * 100 / total_steps) as u32
        };

        Ok(WorkflowStatusReport {
            workflow_id: record.workflow_id,
            workflow_type: record.workflow_type,
            status: record.status,
            active: self.registry.is_active(workflow_id).await,
            progress: WorkflowProgress {
                steps_completed,
                total_steps,
                percentage,
            },
            record,
        })
    }

    /// The owner's most recent workflows, newest first.
    pub async fn recent_workflows(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<WorkflowRecord>> {
        self.store.find_recent_by_owner(owner_id, limit).await
    }

    /// Aggregate statistics over the owner's history.
    pub async fn owner_stats(&self, owner_id: &str) -> Result<OwnerStats> {
        self.store.aggregate_stats(owner_id, 10).await
    }

    /// Number of runs currently executing in this process.
    pub async fn active_count(&self) -> usize {
        self.registry.active_count().await
    }

    /// Whether a run is currently executing in this process.
    pub async fn is_active(&self, workflow_id: Uuid) -> bool {
        self.registry.is_active(workflow_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::store::InMemoryWorkflowStore;
    use crate::workflow::testing::MockCompletionClient;
    use serde_json::json;
    use std::time::Duration;

    fn engine_with(client: MockCompletionClient) -> WorkflowEngine {
        let config = EngineConfig {
            ideas_per_run: 2,
            ..EngineConfig::default()
        };
        WorkflowEngine::new(config, InMemoryWorkflowStore::shared(), Arc::new(client))
    }

    fn business_input() -> serde_json::Value {
        json!({"business": {"name": "Acme", "platforms": ["instagram"]}})
    }

    #[tokio::test]
    async fn test_strategy_generation_completes() {
        let client = MockCompletionClient::ok(&[
            "audience text",
            "strategy text",
            "1. pillar one\n2. pillar two",
        ]);
        let engine = engine_with(client);

        let record = engine
            .start_workflow(
                WorkflowType::StrategyGeneration,
                "u1",
                "b1",
                business_input(),
            )
            .await
            .unwrap();

        assert_eq!(record.status, WorkflowStatus::Completed);
        assert_eq!(record.steps.len(), 3);
        assert!(record.steps.iter().all(|s| s.success));
        let metrics = record.metrics.unwrap();
        assert_eq!(metrics.success_rate_percent, 100);
        assert_eq!(metrics.steps_completed, 3);
        assert_eq!(record.result.unwrap()["pillars"], json!(["pillar one", "pillar two"]));
        assert_eq!(engine.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_stage_failure_fails_fast() {
        let client = MockCompletionClient::new(vec![
            Ok("audience text".to_string()),
            MockCompletionClient::failing("service unavailable"),
        ]);
        let engine = engine_with(client);

        let record = engine
            .start_workflow(
                WorkflowType::StrategyGeneration,
                "u1",
                "b1",
                business_input(),
            )
            .await
            .unwrap();

        assert_eq!(record.status, WorkflowStatus::Failed);
        assert_eq!(record.steps.len(), 2);
        assert!(record.steps[0].success);
        assert!(!record.steps[1].success);
        let error = record.error.unwrap();
        assert!(error.message.contains("content_strategy"));
        let metrics = record.metrics.unwrap();
        assert!(metrics.success_rate_percent < 100);
        assert_eq!(engine.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_input_creates_no_record() {
        let engine = engine_with(MockCompletionClient::ok(&[]));

        let result = engine
            .start_workflow(WorkflowType::ContentGeneration, "u1", "b1", json!({}))
            .await;
        assert!(matches!(result, Err(EngineError::NotFound(_))));

        let recent = engine.recent_workflows("u1", 10).await.unwrap();
        assert!(recent.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_between_stages() {
        let client =
            MockCompletionClient::ok(&["a", "b", "c"]).with_delay(Duration::from_millis(50));
        let engine = Arc::new(engine_with(client));

        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .start_workflow(
                        WorkflowType::StrategyGeneration,
                        "u1",
                        "b1",
                        business_input(),
                    )
                    .await
            })
        };

        // Wait for the run to register, then cancel mid-pipeline.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let recent = engine.recent_workflows("u1", 1).await.unwrap();
        let workflow_id = recent[0].workflow_id;
        engine.cancel_workflow(workflow_id).await.unwrap();

        let record = runner.await.unwrap().unwrap();
        assert_eq!(record.status, WorkflowStatus::Cancelled);
        assert!(record.steps.len() < 3);
        assert!(record.result.is_none());
        assert!(record.error.is_none());
        let metrics = record.metrics.unwrap();
        assert!(metrics.success_rate_percent < 100);
    }

    #[tokio::test]
    async fn test_cancel_terminal_workflow_rejected() {
        let client = MockCompletionClient::ok(&["a", "b", "1. one"]);
        let engine = engine_with(client);

        let record = engine
            .start_workflow(
                WorkflowType::StrategyGeneration,
                "u1",
                "b1",
                business_input(),
            )
            .await
            .unwrap();

        let err = engine.cancel_workflow(record.workflow_id).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotCancellable {
                status: WorkflowStatus::Completed,
                ..
            }
        ));

        // The terminal record is unchanged by the rejected cancel.
        let report = engine.workflow_status(record.workflow_id).await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_unknown_workflow() {
        let engine = engine_with(MockCompletionClient::ok(&[]));
        assert!(matches!(
            engine.cancel_workflow(Uuid::new_v4()).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_status_report_progress() {
        let client = MockCompletionClient::new(vec![
            Ok("audience text".to_string()),
            MockCompletionClient::failing("down"),
        ]);
        let engine = engine_with(client);

        let record = engine
            .start_workflow(
                WorkflowType::StrategyGeneration,
                "u1",
                "b1",
                business_input(),
            )
            .await
            .unwrap();

        let report = engine.workflow_status(record.workflow_id).await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Failed);
        assert!(!report.active);
        assert_eq!(report.progress.total_steps, 3);
        assert_eq!(report.progress.steps_completed, 1);
        assert_eq!(report.progress.percentage, 33);
    }

    #[tokio::test]
    async fn test_deadline_cancels_run() {
        let client =
            MockCompletionClient::ok(&["a", "b", "c"]).with_delay(Duration::from_millis(30));
        let config = EngineConfig {
            run_deadline: Some(Duration::from_millis(10)),
            ..EngineConfig::default()
        };
        let engine = WorkflowEngine::new(
            config,
            InMemoryWorkflowStore::shared(),
            Arc::new(client),
        );

        let record = engine
            .start_workflow(
                WorkflowType::StrategyGeneration,
                "u1",
                "b1",
                business_input(),
            )
            .await
            .unwrap();

        // First stage outlives the deadline; the boundary check cancels.
        assert_eq!(record.status, WorkflowStatus::Cancelled);
        assert!(record.steps.len() < 3);
    }

    #[tokio::test]
    async fn test_owner_stats_after_runs() {
        let client = MockCompletionClient::ok(&[
            "a", "b", "1. one", // first run
            "a", "b", "1. one", // second run
        ]);
        let engine = engine_with(client);

        for _ in 0..2 {
            engine
                .start_workflow(
                    WorkflowType::StrategyGeneration,
                    "u1",
                    "b1",
                    business_input(),
                )
                .await
                .unwrap();
        }

        let stats = engine.owner_stats("u1").await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.by_type["strategy_generation"], 2);
    }
}
