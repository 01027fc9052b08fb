//! Anthropic messages API provider.

use super::{
    Message, ModelChunk, ModelProvider, ModelRef, ModelRequest, ModelResponse, ModelStream, Role, ToolCallRequest,
    Usage,
};
use crate::config::ModelSettings;
use crate::error::{Result, TroupeError};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Model served through the Anthropic messages API.
pub struct AnthropicModel {
    http: reqwest::Client,
    model_ref: ModelRef,
    api_key: String,
    endpoint: String,
    max_tokens: u32,
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize, PartialEq)]
struct WireMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Server-sent event payloads of a streamed response.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StreamMessage,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    MessageDelta {
        #[serde(default)]
        usage: WireUsage,
    },
    Error {
        error: StreamError,
    },
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}

impl AnthropicModel {
    pub fn new(model_ref: ModelRef, api_key: &str, base_url: &str, settings: &ModelSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            model_ref,
            api_key: api_key.to_string(),
            endpoint: format!("{}/messages", base_url.trim_end_matches('/')),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        })
    }

    fn body<'a>(&'a self, request: &ModelRequest, stream: bool) -> MessagesRequest<'a> {
        let (system, messages) = to_wire_messages(&request.messages);
        MessagesRequest {
            model: &self.model_ref.id,
            max_tokens: self.max_tokens,
            system,
            messages,
            tools: request
                .tools
                .iter()
                .map(|t| WireTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.parameters.clone(),
                })
                .collect(),
            temperature: self.temperature,
            stream,
        }
    }

    async fn send(&self, body: &MessagesRequest<'_>) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TroupeError::ProviderStatus {
                status: status.as_u16(),
                message: format!("{}: {}", self.model_ref, text),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelProvider for AnthropicModel {
    fn model_ref(&self) -> &ModelRef {
        &self.model_ref
    }

    #[instrument(skip_all, fields(model = %self.model_ref))]
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let response: MessagesResponse = self.send(&self.body(request, false)).await?.json().await?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in response.content {
            match block {
                ContentBlock::Text { text } => content.push_str(&text),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCallRequest {
                    id,
                    name,
                    arguments: input.to_string(),
                }),
                _ => {}
            }
        }

        debug!("Model returned {} tool call(s)", tool_calls.len());

        Ok(ModelResponse {
            content,
            tool_calls,
            usage: Usage::new(response.usage.input_tokens, response.usage.output_tokens),
        })
    }

    async fn stream(&self, request: &ModelRequest) -> Result<ModelStream> {
        let response = self.send(&self.body(request, true)).await?;
        Ok(Box::pin(stream_chunks(response.bytes_stream())))
    }
}

/// Turn the body of a streamed messages response into model chunks.
fn stream_chunks<S, B>(body: S) -> impl Stream<Item = Result<ModelChunk>> + Send
where
    S: Stream<Item = reqwest::Result<B>> + Send,
    B: AsRef<[u8]> + Send,
{
    async_stream::try_stream! {
        let mut bytes = Box::pin(body);
        // raw bytes; a network chunk may end inside a multi-byte character
        let mut buffer: Vec<u8> = Vec::new();
        // block index -> (id, name, partial json)
        let mut tools: BTreeMap<usize, (String, String, String)> = BTreeMap::new();
        let mut input_tokens = 0;

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            buffer.extend(chunk.as_ref().iter().copied().filter(|b| *b != b'\r'));

            for data in drain_sse_data(&mut buffer) {
                let event: StreamEvent = match serde_json::from_str(&data) {
                    Ok(event) => event,
                    Err(e) => {
                        debug!("Skipping unparseable stream event: {}", e);
                        continue;
                    }
                };
                match event {
                    StreamEvent::MessageStart { message } => {
                        input_tokens = message.usage.input_tokens;
                    }
                    StreamEvent::ContentBlockStart { index, content_block: ContentBlock::ToolUse { id, name, .. } } => {
                        tools.insert(index, (id, name, String::new()));
                    }
                    StreamEvent::ContentBlockStart { .. } => {}
                    StreamEvent::ContentBlockDelta { delta: BlockDelta::TextDelta { text }, .. } => {
                        yield ModelChunk::Content(text);
                    }
                    StreamEvent::ContentBlockDelta { index, delta: BlockDelta::InputJsonDelta { partial_json } } => {
                        if let Some(entry) = tools.get_mut(&index) {
                            entry.2.push_str(&partial_json);
                        }
                    }
                    StreamEvent::ContentBlockDelta { .. } => {}
                    StreamEvent::MessageDelta { usage } => {
                        yield ModelChunk::Usage(Usage::new(input_tokens, usage.output_tokens));
                    }
                    StreamEvent::Error { error } => {
                        Err::<(), TroupeError>(TroupeError::Provider(error.message))?;
                    }
                    StreamEvent::Ignored => {}
                }
            }
        }

        for (_, (id, name, arguments)) in tools {
            let arguments = if arguments.trim().is_empty() { "{}".to_string() } else { arguments };
            yield ModelChunk::ToolCall(ToolCallRequest { id, name, arguments });
        }
    }
}

/// Split the system prompt out and merge consecutive same-role turns.
///
/// Tool results travel as `user` turns, so several results in a row end up in
/// one message as the API requires alternating roles.
fn to_wire_messages(messages: &[Message]) -> (Option<String>, Vec<WireMessage>) {
    let mut system_parts = Vec::new();
    let mut wire: Vec<WireMessage> = Vec::new();

    for m in messages {
        let (role, blocks) = match m.role {
            Role::System => {
                system_parts.push(m.content.clone());
                continue;
            }
            Role::User => ("user", vec![ContentBlock::Text { text: m.content.clone() }]),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !m.content.is_empty() {
                    blocks.push(ContentBlock::Text { text: m.content.clone() });
                }
                for call in &m.tool_calls {
                    blocks.push(ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: serde_json::from_str(&call.arguments).unwrap_or_else(|_| Value::Object(Default::default())),
                    });
                }
                ("assistant", blocks)
            }
            Role::Tool => (
                "user",
                vec![ContentBlock::ToolResult {
                    tool_use_id: m.tool_call_id.clone().unwrap_or_default(),
                    content: m.content.clone(),
                }],
            ),
        };

        if blocks.is_empty() {
            continue;
        }
        match wire.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => wire.push(WireMessage { role, content: blocks }),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, wire)
}

/// Remove every complete event from `buffer`, returning their `data:` payloads.
///
/// Expects `\r` already stripped. Only whole events are decoded, so characters
/// split across network chunks survive.
fn drain_sse_data(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(end) = buffer.windows(2).position(|w| w == b"\n\n") {
        let event: Vec<u8> = buffer.drain(..end + 2).collect();
        let event = String::from_utf8_lossy(&event[..end]);

        let data = event
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
            .collect::<Vec<_>>()
            .join("\n");
        if !data.is_empty() {
            payloads.push(data);
        }
    }
    payloads
}
