//! Scripted completion client for tests.
//!
//! Available to integration tests and downstream crates through the
//! `test-util` feature.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::completion::{CompletionClient, CompletionRequest, CompletionResponse};
use crate::error::{EngineError, Result};

/// Completion client that replays a scripted sequence of responses and
/// records every prompt it receives. Returns "default response" once the
/// script is exhausted. An optional per-call delay makes slow pipelines
/// for cancellation tests.
pub struct MockCompletionClient {
    responses: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockCompletionClient {
    pub fn new(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn ok(responses: &[&str]) -> Self {
        Self::new(responses.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn failing(message: &str) -> Result<String> {
        Err(EngineError::Completion(message.to_string()))
    }

    /// Every prompt received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete_request(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("default response".to_string()));
        next.map(|content| CompletionResponse {
            content,
            usage: None,
        })
    }
}
