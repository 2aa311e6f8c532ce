//! Agent stage: one step of a pipeline.
//!
//! A stage builds a prompt deterministically from the accumulated pipeline
//! state, invokes the completion client, and parses the raw text into its
//! declared output shape. Hard failures come only from the completion call
//! itself; imperfect parses degrade per the stage's shape rules.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::completion::CompletionClient;
use crate::parsing;

/// Error type for stage execution
#[derive(Debug, Error)]
pub enum StageError {
    /// The completion call failed (transport or service error)
    #[error("Completion error: {0}")]
    Completion(String),

    /// The completion output could not be parsed into the stage's shape.
    /// Raised only under strict parsing; lenient stages absorb parse
    /// problems into fallback output.
    #[error("Failed to parse stage output: {0}")]
    Parse(String),
}

/// Result type for stage execution
pub type StageResult<T> = Result<T, StageError>;

/// Accumulated pipeline state: the original input plus every prior stage's
/// output, keyed by stage name.
#[derive(Debug, Clone)]
pub struct PipelineState {
    input: serde_json::Value,
    outputs: serde_json::Map<String, serde_json::Value>,
}

impl PipelineState {
    /// Create state from the workflow input.
    pub fn new(input: serde_json::Value) -> Self {
        Self {
            input,
            outputs: serde_json::Map::new(),
        }
    }

    /// The original workflow input.
    pub fn input(&self) -> &serde_json::Value {
        &self.input
    }

    /// Merge a stage output into the state.
    pub fn merge(&mut self, stage_name: &str, output: serde_json::Value) {
        self.outputs.insert(stage_name.to_string(), output);
    }

    /// Get a prior stage's output by name.
    pub fn output(&self, stage_name: &str) -> Option<&serde_json::Value> {
        self.outputs.get(stage_name)
    }

    /// Get a prior stage's output as text (free-text stages).
    pub fn output_text(&self, stage_name: &str) -> &str {
        self.outputs
            .get(stage_name)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }

    /// Get a field from the workflow input.
    pub fn input_field(&self, key: &str) -> Option<&serde_json::Value> {
        self.input.get(key)
    }

    /// Render an input field as a compact, deterministic string for prompt
    /// construction (`serde_json::Map` keys are ordered, so serialization
    /// is stable).
    pub fn input_field_text(&self, key: &str) -> String {
        match self.input.get(key) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => serde_json::to_string(other).unwrap_or_default(),
            None => String::new(),
        }
    }
}

/// A named processing step of a pipeline.
#[async_trait]
pub trait AgentStage: Send + Sync {
    /// Stage name, recorded in the step log.
    fn name(&self) -> &str;

    /// Execute the stage against the accumulated state.
    async fn run(
        &self,
        state: &PipelineState,
        client: &dyn CompletionClient,
    ) -> StageResult<serde_json::Value>;
}

/// Prompt builder: a deterministic function of the pipeline state.
pub type PromptBuilder = Arc<dyn Fn(&PipelineState) -> String + Send + Sync>;

/// Invoke the completion client and map failures into stage errors.
pub(crate) async fn complete_text(
    client: &dyn CompletionClient,
    prompt: &str,
) -> StageResult<String> {
    client
        .complete(prompt)
        .await
        .map(|text| text.trim().to_string())
        .map_err(|e| StageError::Completion(e.to_string()))
}

/// Free-text stage: output is the trimmed raw completion.
pub struct TextStage {
    name: String,
    build_prompt: PromptBuilder,
}

impl TextStage {
    pub fn new<F>(name: impl Into<String>, build_prompt: F) -> Self
    where
        F: Fn(&PipelineState) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            build_prompt: Arc::new(build_prompt),
        }
    }
}

#[async_trait]
impl AgentStage for TextStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        state: &PipelineState,
        client: &dyn CompletionClient,
    ) -> StageResult<serde_json::Value> {
        let prompt = (self.build_prompt)(state);
        let text = complete_text(client, &prompt).await?;
        Ok(serde_json::Value::String(text))
    }
}

/// List stage: output is the enumerated lines of the completion with
/// ordinal markers stripped. A stage that expects N items but parses fewer
/// returns the items it found.
pub struct ListStage {
    name: String,
    build_prompt: PromptBuilder,
}

impl ListStage {
    pub fn new<F>(name: impl Into<String>, build_prompt: F) -> Self
    where
        F: Fn(&PipelineState) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            build_prompt: Arc::new(build_prompt),
        }
    }
}

#[async_trait]
impl AgentStage for ListStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        state: &PipelineState,
        client: &dyn CompletionClient,
    ) -> StageResult<serde_json::Value> {
        let prompt = (self.build_prompt)(state);
        let text = complete_text(client, &prompt).await?;
        let items = parsing::parse_numbered_list(&text);
        Ok(serde_json::Value::Array(
            items.into_iter().map(serde_json::Value::String).collect(),
        ))
    }
}
