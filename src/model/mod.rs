//! Language model providers.
//!
//! The model decides which tools to call and when a run is finished; agents
//! and teams only talk to it through [`ModelProvider`].

mod anthropic;
mod message;
mod openai;
#[cfg(test)]
pub(crate) mod scripted;

pub use anthropic::AnthropicModel;
pub use message::{Message, Role, ToolCallRequest, ToolDefinition, Usage};
pub use openai::OpenAIModel;

use crate::config::ModelSettings;
use crate::error::{Result, TroupeError};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Hosted model vendor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI chat completions.
    OpenAI,
    /// Anthropic messages API.
    Anthropic,
    /// Perplexity (OpenAI-compatible endpoint).
    Perplexity,
}

impl Provider {
    /// Environment variable holding the API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Perplexity => "PERPLEXITY_API_KEY",
        }
    }

    /// Default API base URL.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::Anthropic => "https://api.anthropic.com/v1",
            Provider::Perplexity => "https://api.perplexity.ai",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = TroupeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "perplexity" => Ok(Provider::Perplexity),
            _ => Err(TroupeError::Config(format!("Unknown model provider: {}", s))),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::OpenAI => write!(f, "openai"),
            Provider::Anthropic => write!(f, "anthropic"),
            Provider::Perplexity => write!(f, "perplexity"),
        }
    }
}

/// A `provider:model-id` reference, e.g. `anthropic:claude-sonnet-4-5`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub provider: Provider,
    pub id: String,
}

impl std::str::FromStr for ModelRef {
    type Err = TroupeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (provider, id) = s.split_once(':').ok_or_else(|| {
            TroupeError::Config(format!(
                "Model reference '{}' must look like provider:model-id",
                s
            ))
        })?;
        if id.trim().is_empty() {
            return Err(TroupeError::Config(format!("Model reference '{}' has no model id", s)));
        }
        Ok(Self {
            provider: provider.trim().parse()?,
            id: id.trim().to_string(),
        })
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.id)
    }
}

/// Input to a single model turn.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// A complete model turn.
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
}

/// Incremental piece of a streamed model turn.
///
/// Tool calls are only emitted once their arguments are complete.
#[derive(Debug, Clone)]
pub enum ModelChunk {
    Content(String),
    ToolCall(ToolCallRequest),
    Usage(Usage),
}

pub type ModelStream = BoxStream<'static, Result<ModelChunk>>;

/// Trait for hosted model backends.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// The model reference this provider serves.
    fn model_ref(&self) -> &ModelRef;

    /// Run one turn and return the whole response.
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse>;

    /// Run one turn, yielding content as it arrives.
    async fn stream(&self, request: &ModelRequest) -> Result<ModelStream> {
        let response = self.complete(request).await?;
        let mut chunks = Vec::with_capacity(response.tool_calls.len() + 2);
        if !response.content.is_empty() {
            chunks.push(Ok(ModelChunk::Content(response.content)));
        }
        chunks.extend(response.tool_calls.into_iter().map(|c| Ok(ModelChunk::ToolCall(c))));
        chunks.push(Ok(ModelChunk::Usage(response.usage)));
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Build a provider for `model_ref`, reading its API key from the environment.
pub fn build_provider(model_ref: &ModelRef, settings: &ModelSettings) -> Result<Arc<dyn ModelProvider>> {
    let key_env = model_ref.provider.api_key_env();
    let api_key = match std::env::var(key_env) {
        Ok(key) if !key.trim().is_empty() => key,
        _ => return Err(TroupeError::MissingEnv(vec![key_env.to_string()])),
    };
    let base_url = settings
        .base_urls
        .get(&model_ref.provider.to_string())
        .cloned()
        .unwrap_or_else(|| model_ref.provider.default_base_url().to_string());

    let provider: Arc<dyn ModelProvider> = match model_ref.provider {
        Provider::OpenAI | Provider::Perplexity => Arc::new(OpenAIModel::new(
            model_ref.clone(),
            &api_key,
            &base_url,
            settings,
        )?),
        Provider::Anthropic => Arc::new(AnthropicModel::new(
            model_ref.clone(),
            &api_key,
            &base_url,
            settings,
        )?),
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_ref() {
        let model: ModelRef = "anthropic:claude-sonnet-4-5".parse().unwrap();
        assert_eq!(model.provider, Provider::Anthropic);
        assert_eq!(model.id, "claude-sonnet-4-5");
        assert_eq!(model.to_string(), "anthropic:claude-sonnet-4-5");

        let model: ModelRef = "openai:gpt-4o".parse().unwrap();
        assert_eq!(model.provider, Provider::OpenAI);
    }

    #[test]
    fn test_parse_model_ref_rejects_bad_input() {
        assert!("gpt-4o".parse::<ModelRef>().is_err());
        assert!("openai:".parse::<ModelRef>().is_err());
        assert!("mistral:large".parse::<ModelRef>().is_err());
    }

    #[tokio::test]
    async fn test_default_stream_replays_complete() {
        use futures::StreamExt;

        let model = scripted::ScriptedModel::new(vec![ModelResponse {
            content: "hello".to_string(),
            tool_calls: Vec::new(),
            usage: Usage::new(3, 1),
        }]);
        let mut stream = model.stream(&ModelRequest::default()).await.unwrap();

        let mut content = String::new();
        let mut usage = Usage::default();
        while let Some(chunk) = stream.next().await {
            match chunk.unwrap() {
                ModelChunk::Content(text) => content.push_str(&text),
                ModelChunk::Usage(u) => usage.add(u),
                ModelChunk::ToolCall(_) => panic!("unexpected tool call"),
            }
        }
        assert_eq!(content, "hello");
        assert_eq!(usage.total_tokens, 4);
    }
}
