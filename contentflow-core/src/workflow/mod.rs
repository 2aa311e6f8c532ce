//! Workflow orchestration: pipelines of agent stages, their durable
//! records, and the engine that drives them.

mod engine;
mod pipeline;
mod record;
mod registry;
mod stage;
mod store;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use engine::{WorkflowEngine, WorkflowProgress, WorkflowStatusReport};
pub use pipeline::PipelineDefinition;
pub use record::{
    StepEntry, WorkflowErrorDetail, WorkflowMetrics, WorkflowRecord, WorkflowStatus, WorkflowType,
};
pub use registry::{RunHandle, WorkflowRegistry};
pub use stage::{AgentStage, ListStage, PipelineState, PromptBuilder, StageError, StageResult, TextStage};
pub use store::{InMemoryWorkflowStore, OwnerStats, WorkflowStore, WorkflowSummary};
