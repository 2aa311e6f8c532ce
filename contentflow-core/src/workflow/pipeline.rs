//! Pipeline definitions: the ordered stage sequence for each workflow type.
//!
//! Prompts are built deterministically from the accumulated pipeline state;
//! stage outputs are threaded forward under the producing stage's name.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::completion::CompletionClient;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::parsing;
use crate::workflow::record::WorkflowType;
use crate::workflow::stage::{
    complete_text, AgentStage, ListStage, PipelineState, StageError, StageResult, TextStage,
};

// Stage names double as pipeline-state keys.
pub const STAGE_MARKET_INTELLIGENCE: &str = "market_intelligence";
pub const STAGE_CONTENT_STRATEGY: &str = "content_strategy";
pub const STAGE_CONTENT_DIRECTION: &str = "content_direction";
pub const STAGE_POST_ASSEMBLY: &str = "post_assembly";
pub const STAGE_AUDIENCE_INSIGHT: &str = "audience_insight";
pub const STAGE_STRATEGY_PILLARS: &str = "strategy_pillars";
pub const STAGE_METRICS_DIGEST: &str = "metrics_digest";
pub const STAGE_PERFORMANCE_FINDINGS: &str = "performance_findings";
pub const STAGE_RECOMMENDATIONS: &str = "recommendations";
pub const STAGE_ENGAGEMENT_AUDIT: &str = "engagement_audit";
pub const STAGE_OPTIMIZATION_ACTIONS: &str = "optimization_actions";

const POST_TYPES: [&str; 6] = ["image", "video", "carousel", "story", "reel", "text"];
const DEFAULT_POST_TYPE: &str = "image";
const DEFAULT_PLATFORM: &str = "instagram";

/// The ordered sequence of agent stages for one workflow type.
pub struct PipelineDefinition {
    workflow_type: WorkflowType,
    stages: Vec<Box<dyn AgentStage>>,
    required_input: &'static [&'static str],
}

impl std::fmt::Debug for PipelineDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineDefinition")
            .field("workflow_type", &self.workflow_type)
            .field("stage_count", &self.stages.len())
            .finish()
    }
}

impl PipelineDefinition {
    /// Resolve the pipeline for a workflow type.
    pub fn for_type(workflow_type: WorkflowType, config: &EngineConfig) -> Self {
        match workflow_type {
            WorkflowType::ContentGeneration => Self::content_generation(config),
            WorkflowType::StrategyGeneration => Self::strategy_generation(),
            WorkflowType::PerformanceAnalysis => Self::performance_analysis(),
            WorkflowType::EngagementOptimization => Self::engagement_optimization(),
        }
    }

    pub fn workflow_type(&self) -> WorkflowType {
        self.workflow_type
    }

    pub fn stages(&self) -> &[Box<dyn AgentStage>] {
        &self.stages
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    /// Validate the workflow input before any record is created.
    ///
    /// # Errors
    ///
    /// Returns a not-found error naming the first missing required key.
    pub fn validate_input(&self, input: &Value) -> Result<()> {
        for key in self.required_input {
            let present = input.get(key).map(|v| !v.is_null()).unwrap_or(false);
            if !present {
                return Err(EngineError::NotFound(format!(
                    "No {} context found for this subject",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Assemble the final result and its human-oriented summary from the
    /// terminal pipeline state.
    pub fn assemble(&self, state: &PipelineState) -> (Value, Value) {
        match self.workflow_type {
            WorkflowType::ContentGeneration => assemble_content_generation(state),
            WorkflowType::StrategyGeneration => assemble_strategy_generation(state),
            WorkflowType::PerformanceAnalysis => assemble_performance_analysis(state),
            WorkflowType::EngagementOptimization => assemble_engagement_optimization(state),
        }
    }

    fn content_generation(config: &EngineConfig) -> Self {
        let idea_count = config.ideas_per_run;
        Self {
            workflow_type: WorkflowType::ContentGeneration,
            required_input: &["business"],
            stages: vec![
                Box::new(TextStage::new(STAGE_MARKET_INTELLIGENCE, |state| {
                    format!(
                        "You are a social media market analyst.\n\
                         Business profile: {}\n\
                         Describe the current market trends, audience behavior and \
                         competitive landscape relevant to this business. Be concise \
                         and concrete.",
                        state.input_field_text("business")
                    )
                })),
                Box::new(TextStage::new(STAGE_CONTENT_STRATEGY, |state| {
                    format!(
                        "You are a social media strategist.\n\
                         Business profile: {}\n\
                         Market intelligence: {}\n\
                         Write a focused content strategy for this business: themes, \
                         tone of voice and posting focus.",
                        state.input_field_text("business"),
                        state.output_text(STAGE_MARKET_INTELLIGENCE)
                    )
                })),
                Box::new(ListStage::new(STAGE_CONTENT_DIRECTION, move |state| {
                    format!(
                        "Content strategy: {}\n\
                         Propose exactly {} distinct content ideas that execute this \
                         strategy. Respond with a numbered list, one idea per line.",
                        state.output_text(STAGE_CONTENT_STRATEGY),
                        idea_count
                    )
                })),
                Box::new(PostAssemblyStage {
                    strict: config.strict_parsing,
                }),
            ],
        }
    }

    fn strategy_generation() -> Self {
        Self {
            workflow_type: WorkflowType::StrategyGeneration,
            required_input: &["business"],
            stages: vec![
                Box::new(TextStage::new(STAGE_AUDIENCE_INSIGHT, |state| {
                    format!(
                        "You are an audience researcher.\n\
                         Business profile: {}\n\
                         Describe the target audience segments for this business: \
                         demographics, motivations and content preferences.",
                        state.input_field_text("business")
                    )
                })),
                Box::new(TextStage::new(STAGE_CONTENT_STRATEGY, |state| {
                    format!(
                        "Business profile: {}\n\
                         Audience insight: {}\n\
                         Write a long-term content strategy for this business.",
                        state.input_field_text("business"),
                        state.output_text(STAGE_AUDIENCE_INSIGHT)
                    )
                })),
                Box::new(ListStage::new(STAGE_STRATEGY_PILLARS, |state| {
                    format!(
                        "Content strategy: {}\n\
                         Break this strategy into its core content pillars. Respond \
                         with a numbered list, one pillar per line.",
                        state.output_text(STAGE_CONTENT_STRATEGY)
                    )
                })),
            ],
        }
    }

    fn performance_analysis() -> Self {
        Self {
            workflow_type: WorkflowType::PerformanceAnalysis,
            required_input: &["metrics"],
            stages: vec![
                Box::new(TextStage::new(STAGE_METRICS_DIGEST, |state| {
                    format!(
                        "You are a social media performance analyst.\n\
                         Performance metrics: {}\n\
                         Summarize what these metrics say about recent content \
                         performance.",
                        state.input_field_text("metrics")
                    )
                })),
                Box::new(ListStage::new(STAGE_PERFORMANCE_FINDINGS, |state| {
                    format!(
                        "Performance digest: {}\n\
                         List the key findings. Respond with a numbered list, one \
                         finding per line.",
                        state.output_text(STAGE_METRICS_DIGEST)
                    )
                })),
                Box::new(ListStage::new(STAGE_RECOMMENDATIONS, |state| {
                    format!(
                        "Findings: {}\n\
                         Recommend concrete next actions. Respond with a numbered \
                         list, one recommendation per line.",
                        state
                            .output(STAGE_PERFORMANCE_FINDINGS)
                            .map(|v| v.to_string())
                            .unwrap_or_default()
                    )
                })),
            ],
        }
    }

    fn engagement_optimization() -> Self {
        Self {
            workflow_type: WorkflowType::EngagementOptimization,
            required_input: &["business"],
            stages: vec![
                Box::new(TextStage::new(STAGE_ENGAGEMENT_AUDIT, |state| {
                    format!(
                        "You are an engagement specialist.\n\
                         Business profile: {}\n\
                         Engagement data: {}\n\
                         Audit how this business engages its audience and where \
                         engagement is lost.",
                        state.input_field_text("business"),
                        state.input_field_text("engagement")
                    )
                })),
                Box::new(ListStage::new(STAGE_OPTIMIZATION_ACTIONS, |state| {
                    format!(
                        "Engagement audit: {}\n\
                         List the optimization actions with the highest expected \
                         impact. Respond with a numbered list, one action per line.",
                        state.output_text(STAGE_ENGAGEMENT_AUDIT)
                    )
                })),
            ],
        }
    }
}

/// Final stage of the content-generation pipeline.
///
/// Iterates over the ideas produced by the content-direction stage; for
/// each idea it selects a post format and then creates the complete post
/// (copy, hashtags, visual suggestion). The per-idea loop is sequential
/// and lives inside this single stage.
struct PostAssemblyStage {
    /// Fail on malformed post JSON instead of substituting a fallback
    strict: bool,
}

impl PostAssemblyStage {
    fn ideas(state: &PipelineState) -> Vec<String> {
        state
            .output(STAGE_CONTENT_DIRECTION)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn platforms(state: &PipelineState) -> Vec<String> {
        state
            .input_field("business")
            .and_then(|b| b.get("platforms"))
            .and_then(|p| p.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect::<Vec<_>>()
            })
            .filter(|platforms| !platforms.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_PLATFORM.to_string()])
    }
}

#[async_trait]
impl AgentStage for PostAssemblyStage {
    fn name(&self) -> &str {
        STAGE_POST_ASSEMBLY
    }

    async fn run(
        &self,
        state: &PipelineState,
        client: &dyn CompletionClient,
    ) -> StageResult<Value> {
        let ideas = Self::ideas(state);
        let platforms = Self::platforms(state);
        let strategy = state.output_text(STAGE_CONTENT_STRATEGY);

        let mut posts = Vec::with_capacity(ideas.len());
        for (index, idea) in ideas.iter().enumerate() {
            let platform = &platforms[index % platforms.len()];

            let type_prompt = format!(
                "Content idea: {}\nPlatform: {}\n\
                 Choose the best post format for this idea. Answer with one \
                 word from: image, video, carousel, story, reel, text.",
                idea, platform
            );
            let raw_type = complete_text(client, &type_prompt).await?;
            let post_type = normalize_post_type(&raw_type);

            let post_prompt = format!(
                "Content strategy: {}\nContent idea: {}\nPlatform: {}\nFormat: {}\n\
                 Create the complete post. Respond with JSON only: \
                 {{\"copy\": string, \"hashtags\": [string], \"visualSuggestion\": string}}",
                strategy, idea, platform, post_type
            );
            let raw_post = complete_text(client, &post_prompt).await?;

            let post = match parsing::parse_json_value(&raw_post) {
                Ok(Value::Object(mut fields)) => {
                    fields.insert("idea".to_string(), json!(idea));
                    fields.insert("postType".to_string(), json!(post_type));
                    fields.insert("platform".to_string(), json!(platform));
                    Value::Object(fields)
                }
                other => {
                    let reason = match other {
                        Ok(_) => "expected a JSON object".to_string(),
                        Err(e) => e.to_string(),
                    };
                    if self.strict {
                        return Err(StageError::Parse(format!(
                            "Post creation for idea '{}' returned malformed output: {}",
                            idea, reason
                        )));
                    }
                    tracing::warn!(
                        idea = %idea,
                        reason = %reason,
                        "Malformed post output, substituting fallback"
                    );
                    fallback_post(idea, &post_type, platform)
                }
            };

            posts.push(post);
        }

        Ok(json!({ "generatedPosts": posts }))
    }
}

/// Normalize a format-selection completion to a known post type.
fn normalize_post_type(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    POST_TYPES
        .iter()
        .find(|t| lowered.contains(*t))
        .copied()
        .unwrap_or(DEFAULT_POST_TYPE)
        .to_string()
}

/// Sentinel post used when a malformed completion is absorbed rather than
/// propagated.
fn fallback_post(idea: &str, post_type: &str, platform: &str) -> Value {
    json!({
        "idea": idea,
        "postType": post_type,
        "platform": platform,
        "copy": "Content generation failed - please retry",
        "hashtags": [],
        "visualSuggestion": Value::Null,
        "error": "parse_error",
    })
}

fn assemble_content_generation(state: &PipelineState) -> (Value, Value) {
    let posts = state
        .output(STAGE_POST_ASSEMBLY)
        .and_then(|v| v.get("generatedPosts"))
        .cloned()
        .unwrap_or_else(|| json!([]));

    let platforms: BTreeSet<String> = collect_post_fields(&posts, "platform");
    let post_types: BTreeSet<String> = collect_post_fields(&posts, "postType");
    let post_count = posts.as_array().map(|p| p.len()).unwrap_or(0);

    let result = json!({
        "marketIntelligence": state.output_text(STAGE_MARKET_INTELLIGENCE),
        "strategy": state.output_text(STAGE_CONTENT_STRATEGY),
        "contentIdeas": state.output(STAGE_CONTENT_DIRECTION).cloned().unwrap_or_else(|| json!([])),
        "generatedPosts": posts,
    });
    let summary = json!({
        "postsGenerated": post_count,
        "platforms": platforms,
        "postTypes": post_types,
    });
    (result, summary)
}

fn assemble_strategy_generation(state: &PipelineState) -> (Value, Value) {
    let pillars = state
        .output(STAGE_STRATEGY_PILLARS)
        .cloned()
        .unwrap_or_else(|| json!([]));
    let pillar_count = pillars.as_array().map(|p| p.len()).unwrap_or(0);

    let result = json!({
        "audienceInsight": state.output_text(STAGE_AUDIENCE_INSIGHT),
        "strategy": state.output_text(STAGE_CONTENT_STRATEGY),
        "pillars": pillars,
    });
    let summary = json!({ "pillarCount": pillar_count });
    (result, summary)
}

fn assemble_performance_analysis(state: &PipelineState) -> (Value, Value) {
    let findings = state
        .output(STAGE_PERFORMANCE_FINDINGS)
        .cloned()
        .unwrap_or_else(|| json!([]));
    let recommendations = state
        .output(STAGE_RECOMMENDATIONS)
        .cloned()
        .unwrap_or_else(|| json!([]));
    let finding_count = findings.as_array().map(|f| f.len()).unwrap_or(0);
    let recommendation_count = recommendations.as_array().map(|r| r.len()).unwrap_or(0);

    let result = json!({
        "digest": state.output_text(STAGE_METRICS_DIGEST),
        "findings": findings,
        "recommendations": recommendations,
    });
    let summary = json!({
        "findingCount": finding_count,
        "recommendationCount": recommendation_count,
    });
    (result, summary)
}

fn assemble_engagement_optimization(state: &PipelineState) -> (Value, Value) {
    let actions = state
        .output(STAGE_OPTIMIZATION_ACTIONS)
        .cloned()
        .unwrap_or_else(|| json!([]));
    let action_count = actions.as_array().map(|a| a.len()).unwrap_or(0);

    let result = json!({
        "audit": state.output_text(STAGE_ENGAGEMENT_AUDIT),
        "actions": actions,
    });
    let summary = json!({ "actionCount": action_count });
    (result, summary)
}

fn collect_post_fields(posts: &Value, field: &str) -> BTreeSet<String> {
    posts
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|p| p.get(field).and_then(|v| v.as_str()).map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::testing::MockCompletionClient;

    fn business_input() -> Value {
        json!({
            "business": {
                "name": "Acme Coffee",
                "industry": "food & beverage",
                "platforms": ["instagram", "tiktok"],
            }
        })
    }

    #[test]
    fn test_pipeline_resolution_for_all_types() {
        let config = EngineConfig::default();
        for workflow_type in WorkflowType::ALL {
            let pipeline = PipelineDefinition::for_type(workflow_type, &config);
            assert_eq!(pipeline.workflow_type(), workflow_type);
            assert!(pipeline.stage_count() >= 2);
        }
    }

    #[test]
    fn test_content_generation_stage_order() {
        let pipeline =
            PipelineDefinition::for_type(WorkflowType::ContentGeneration, &EngineConfig::default());
        assert_eq!(
            pipeline.stage_names(),
            vec![
                STAGE_MARKET_INTELLIGENCE,
                STAGE_CONTENT_STRATEGY,
                STAGE_CONTENT_DIRECTION,
                STAGE_POST_ASSEMBLY,
            ]
        );
    }

    #[test]
    fn test_validate_input_missing_business() {
        let pipeline =
            PipelineDefinition::for_type(WorkflowType::ContentGeneration, &EngineConfig::default());
        let err = pipeline.validate_input(&json!({})).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn test_validate_input_rejects_null() {
        let pipeline =
            PipelineDefinition::for_type(WorkflowType::PerformanceAnalysis, &EngineConfig::default());
        let err = pipeline
            .validate_input(&json!({"metrics": null}))
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn test_normalize_post_type() {
        assert_eq!(normalize_post_type("Carousel."), "carousel");
        assert_eq!(normalize_post_type("A short video works best"), "video");
        assert_eq!(normalize_post_type("hologram"), "image");
    }

    #[tokio::test]
    async fn test_post_assembly_happy_path() {
        let mut state = PipelineState::new(business_input());
        state.merge(STAGE_CONTENT_STRATEGY, json!("be bold"));
        state.merge(STAGE_CONTENT_DIRECTION, json!(["Latte art", "Bean origins"]));

        // Two ideas: (type, post) per idea.
        let client = MockCompletionClient::ok(&[
            "image",
            r##"{"copy": "Latte love", "hashtags": ["#latte"], "visualSuggestion": "close-up"}"##,
            "video",
            r##"{"copy": "From farm to cup", "hashtags": ["#beans"], "visualSuggestion": "timelapse"}"##,
        ]);

        let stage = PostAssemblyStage { strict: false };
        let output = stage.run(&state, &client).await.unwrap();
        let posts = output["generatedPosts"].as_array().unwrap();

        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0]["postType"], "image");
        assert_eq!(posts[0]["platform"], "instagram");
        assert_eq!(posts[1]["platform"], "tiktok");
        assert_eq!(posts[1]["copy"], "From farm to cup");
    }

    #[tokio::test]
    async fn test_post_assembly_fallback_on_malformed_json() {
        let mut state = PipelineState::new(business_input());
        state.merge(STAGE_CONTENT_STRATEGY, json!("be bold"));
        state.merge(STAGE_CONTENT_DIRECTION, json!(["Latte art"]));

        let client = MockCompletionClient::ok(&["image", "sorry, I cannot produce JSON today"]);

        let stage = PostAssemblyStage { strict: false };
        let output = stage.run(&state, &client).await.unwrap();
        let posts = output["generatedPosts"].as_array().unwrap();

        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0]["error"], "parse_error");
        assert_eq!(posts[0]["copy"], "Content generation failed - please retry");
    }

    #[tokio::test]
    async fn test_post_assembly_strict_mode_fails() {
        let mut state = PipelineState::new(business_input());
        state.merge(STAGE_CONTENT_STRATEGY, json!("be bold"));
        state.merge(STAGE_CONTENT_DIRECTION, json!(["Latte art"]));

        let client = MockCompletionClient::ok(&["image", "not json"]);

        let stage = PostAssemblyStage { strict: true };
        let result = stage.run(&state, &client).await;
        assert!(matches!(result, Err(StageError::Parse(_))));
    }

    #[tokio::test]
    async fn test_post_assembly_json_in_code_fence() {
        let mut state = PipelineState::new(business_input());
        state.merge(STAGE_CONTENT_STRATEGY, json!("be bold"));
        state.merge(STAGE_CONTENT_DIRECTION, json!(["Latte art"]));

        let client = MockCompletionClient::ok(&[
            "story",
            "```json\n{\"copy\": \"fenced\", \"hashtags\": [], \"visualSuggestion\": \"none\"}\n```",
        ]);

        let stage = PostAssemblyStage { strict: true };
        let output = stage.run(&state, &client).await.unwrap();
        assert_eq!(output["generatedPosts"][0]["copy"], "fenced");
    }

    #[test]
    fn test_assemble_content_generation_summary() {
        let mut state = PipelineState::new(business_input());
        state.merge(STAGE_MARKET_INTELLIGENCE, json!("trends"));
        state.merge(STAGE_CONTENT_STRATEGY, json!("strategy"));
        state.merge(STAGE_CONTENT_DIRECTION, json!(["a", "b"]));
        state.merge(
            STAGE_POST_ASSEMBLY,
            json!({"generatedPosts": [
                {"postType": "image", "platform": "instagram"},
                {"postType": "video", "platform": "tiktok"},
            ]}),
        );

        let pipeline =
            PipelineDefinition::for_type(WorkflowType::ContentGeneration, &EngineConfig::default());
        let (result, summary) = pipeline.assemble(&state);

        assert_eq!(result["generatedPosts"].as_array().unwrap().len(), 2);
        assert_eq!(summary["postsGenerated"], 2);
        assert_eq!(summary["platforms"], json!(["instagram", "tiktok"]));
        assert_eq!(summary["postTypes"], json!(["image", "video"]));
    }

    #[test]
    fn test_assemble_strategy_generation() {
        let mut state = PipelineState::new(business_input());
        state.merge(STAGE_AUDIENCE_INSIGHT, json!("young professionals"));
        state.merge(STAGE_CONTENT_STRATEGY, json!("educate and entertain"));
        state.merge(STAGE_STRATEGY_PILLARS, json!(["origin stories", "recipes", "community"]));

        let pipeline = PipelineDefinition::for_type(
            WorkflowType::StrategyGeneration,
            &EngineConfig::default(),
        );
        let (result, summary) = pipeline.assemble(&state);

        assert_eq!(result["pillars"].as_array().unwrap().len(), 3);
        assert_eq!(summary["pillarCount"], 3);
    }
}
