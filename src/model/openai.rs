//! OpenAI-compatible chat completions provider.

use super::{
    Message, ModelChunk, ModelProvider, ModelRef, ModelRequest, ModelResponse, ModelStream, Provider, Role,
    ToolCallRequest, ToolDefinition, Usage,
};
use crate::config::ModelSettings;
use crate::error::{Result, TroupeError};
use crate::openai::create_client;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionResponseStream, ChatCompletionStreamOptions, ChatCompletionTool,
    ChatCompletionToolType, CompletionUsage, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    FunctionCall, FunctionObject,
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};

/// Model served through the chat completions API.
pub struct OpenAIModel {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model_ref: ModelRef,
    temperature: Option<f32>,
}

impl OpenAIModel {
    pub fn new(model_ref: ModelRef, api_key: &str, base_url: &str, settings: &ModelSettings) -> Result<Self> {
        Ok(Self {
            client: create_client(api_key, base_url, Duration::from_secs(settings.timeout_secs))?,
            model_ref,
            temperature: settings.temperature,
        })
    }

    fn build_request(&self, request: &ModelRequest, stream: bool) -> Result<CreateChatCompletionRequest> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model_ref.id).messages(to_request_messages(&request.messages)?);

        if !request.tools.is_empty() {
            args.tools(to_tools(&request.tools));
        }
        if let Some(temperature) = self.temperature {
            args.temperature(temperature);
        }
        if stream && self.model_ref.provider == Provider::OpenAI {
            args.stream_options(ChatCompletionStreamOptions { include_usage: true });
        }

        Ok(args.build()?)
    }
}

#[async_trait]
impl ModelProvider for OpenAIModel {
    fn model_ref(&self) -> &ModelRef {
        &self.model_ref
    }

    #[instrument(skip_all, fields(model = %self.model_ref))]
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let response = self
            .client
            .chat()
            .create(self.build_request(request, false)?)
            .await
            .map_err(TroupeError::from)?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| TroupeError::Provider("No response from model".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .as_ref()
            .map(|calls| {
                calls
                    .iter()
                    .map(|c| ToolCallRequest {
                        id: c.id.clone(),
                        name: c.function.name.clone(),
                        arguments: c.function.arguments.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        debug!("Model returned {} tool call(s)", choice.message.tool_calls.as_ref().map_or(0, Vec::len));

        Ok(ModelResponse {
            content: choice.message.content.clone().unwrap_or_default(),
            tool_calls,
            usage: response.usage.as_ref().map(to_usage).unwrap_or_default(),
        })
    }

    async fn stream(&self, request: &ModelRequest) -> Result<ModelStream> {
        let upstream = self
            .client
            .chat()
            .create_stream(self.build_request(request, true)?)
            .await
            .map_err(TroupeError::from)?;

        Ok(Box::pin(stream_chunks(upstream)))
    }
}

/// Turn a chat completion stream into model chunks, assembling tool call fragments.
fn stream_chunks(mut upstream: ChatCompletionResponseStream) -> impl Stream<Item = Result<ModelChunk>> + Send {
    async_stream::try_stream! {
        // index -> (id, name, arguments)
        let mut pending: BTreeMap<u32, (String, String, String)> = BTreeMap::new();

        while let Some(event) = upstream.next().await {
            let event = event.map_err(TroupeError::from)?;

            if let Some(usage) = event.usage.as_ref() {
                yield ModelChunk::Usage(to_usage(usage));
            }

            for choice in event.choices {
                if let Some(text) = choice.delta.content {
                    if !text.is_empty() {
                        yield ModelChunk::Content(text);
                    }
                }
                for fragment in choice.delta.tool_calls.unwrap_or_default() {
                    let entry = pending.entry(fragment.index).or_default();
                    if let Some(id) = fragment.id {
                        entry.0 = id;
                    }
                    if let Some(function) = fragment.function {
                        if let Some(name) = function.name {
                            entry.1.push_str(&name);
                        }
                        if let Some(arguments) = function.arguments {
                            entry.2.push_str(&arguments);
                        }
                    }
                }
            }
        }

        for (_, (id, name, arguments)) in pending {
            yield ModelChunk::ToolCall(ToolCallRequest { id, name, arguments });
        }
    }
}

fn to_usage(usage: &CompletionUsage) -> Usage {
    Usage::new(usage.prompt_tokens as u64, usage.completion_tokens as u64)
}

/// Convert conversation messages into chat completion request messages.
fn to_request_messages(messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>> {
    messages
        .iter()
        .map(|m| -> Result<ChatCompletionRequestMessage> {
            let converted: ChatCompletionRequestMessage = match m.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(m.content.clone())
                    .build()?
                    .into(),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(m.content.clone())
                    .build()?
                    .into(),
                Role::Assistant => {
                    let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                    if !m.content.is_empty() {
                        args.content(m.content.clone());
                    }
                    if m.has_tool_calls() {
                        args.tool_calls(
                            m.tool_calls
                                .iter()
                                .map(|c| ChatCompletionMessageToolCall {
                                    id: c.id.clone(),
                                    r#type: ChatCompletionToolType::Function,
                                    function: FunctionCall {
                                        name: c.name.clone(),
                                        arguments: c.arguments.clone(),
                                    },
                                })
                                .collect::<Vec<_>>(),
                        );
                    }
                    args.build()?.into()
                }
                Role::Tool => ChatCompletionRequestToolMessageArgs::default()
                    .tool_call_id(m.tool_call_id.clone().unwrap_or_default())
                    .content(m.content.clone())
                    .build()?
                    .into(),
            };
            Ok(converted)
        })
        .collect()
}

fn to_tools(tools: &[ToolDefinition]) -> Vec<ChatCompletionTool> {
    tools
        .iter()
        .map(|t| ChatCompletionTool {
            r#type: ChatCompletionToolType::Function,
            function: FunctionObject {
                name: t.name.clone(),
                description: Some(t.description.clone()),
                parameters: Some(t.parameters.clone()),
                strict: None,
            },
        })
        .collect()
}
