//! Deterministic model used by tests.

use super::{ModelProvider, ModelRef, ModelRequest, ModelResponse, Provider, ToolCallRequest, Usage};
use crate::error::{Result, TroupeError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

pub(crate) enum Step {
    Respond(ModelResponse),
    Fail(String),
    /// An HTTP rejection with the given status.
    Reject(u16),
}

/// Replays a fixed script of turns and records every request it sees.
pub(crate) struct ScriptedModel {
    model_ref: ModelRef,
    steps: Mutex<VecDeque<Step>>,
    pub requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self::with_steps(responses.into_iter().map(Step::Respond).collect())
    }

    pub fn with_steps(steps: Vec<Step>) -> Self {
        Self {
            model_ref: ModelRef {
                provider: Provider::OpenAI,
                id: "scripted".to_string(),
            },
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> ModelRequest {
        self.requests.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

/// A plain text turn.
pub(crate) fn text(content: &str) -> ModelResponse {
    ModelResponse {
        content: content.to_string(),
        tool_calls: Vec::new(),
        usage: Usage::new(10, 5),
    }
}

/// A turn asking for one tool call.
pub(crate) fn tool_call(id: &str, name: &str, arguments: &str) -> ModelResponse {
    ModelResponse {
        content: String::new(),
        tool_calls: vec![ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }],
        usage: Usage::new(10, 5),
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    fn model_ref(&self) -> &ModelRef {
        &self.model_ref
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
        self.requests.lock().unwrap().push(request.clone());
        match self.steps.lock().unwrap().pop_front() {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Fail(message)) => Err(TroupeError::Provider(message)),
            Some(Step::Reject(status)) => Err(TroupeError::ProviderStatus {
                status,
                message: "rejected".to_string(),
            }),
            None => Err(TroupeError::Provider("script exhausted".to_string())),
        }
    }
}
