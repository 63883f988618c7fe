//! Adapter for Groq's OpenAI-compatible Chat Completions API.
//!
//! Groq returns tool calls structurally (never embedded in text), streams
//! over SSE, and reports a `tool_use_failed` error code when the model
//! cannot produce a well-formed call for any offered tool.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use serde_with::skip_serializing_none;
use std::collections::HashMap;

use crate::adapter::{Capability, ChatCompletionStream, InferenceAdapter};
use crate::config::{resolve_api_key, ProviderData, SecretString, TransportConfig};
use crate::error::InferenceError;
use crate::http::{add_extra_headers, build_http_client, RequestBuilderExt, ResponseExt};
use crate::model::{
    ChatCompletionRequest, ChatCompletionResponse, ChatCompletionStreamChunk, ChunkEvent,
    CompletionMessage, InterleavedContent, Message, ResponseFormat, StopReason, ToolCall,
    ToolCallDelta, ToolChoice,
};
use crate::registry::{ModelEntry, ModelRegistry};

pub const PROVIDER_ID: &str = "groq";
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

const MISSING_KEY_INSTRUCTIONS: &str =
    "set api_key in GroqConfig or pass one in per-request provider data";

/// Static configuration for the Groq adapter.
#[derive(Debug, Clone)]
pub struct GroqConfig {
    pub api_key: Option<SecretString>,
    pub url: String,
    pub transport: TransportConfig,
}

impl Default for GroqConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            url: DEFAULT_BASE_URL.to_string(),
            transport: TransportConfig::default(),
        }
    }
}

impl GroqConfig {
    pub fn with_api_key(mut self, api_key: impl Into<SecretString>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}

/// Models served by Groq, keyed by their common logical aliases.
pub fn model_entries() -> Vec<ModelEntry> {
    vec![
        ModelEntry::new("llama3-8b-8192", &["meta-llama/Llama-3-8B-Instruct"]),
        ModelEntry::new("llama3-70b-8192", &["meta-llama/Llama-3-70B-Instruct"]),
        ModelEntry::new(
            "llama-3.1-8b-instant",
            &["meta-llama/Llama-3.1-8B-Instruct"],
        ),
        ModelEntry::new(
            "llama-3.2-3b-preview",
            &["meta-llama/Llama-3.2-3B-Instruct"],
        )
        .with_advisory("preview model; tool calls may not work as expected"),
        ModelEntry::new(
            "llama-3.3-70b-versatile",
            &["meta-llama/Llama-3.3-70B-Instruct"],
        ),
    ]
}

pub struct GroqAdapter {
    config: GroqConfig,
    registry: ModelRegistry,
    provider_data: Option<ProviderData>,
}

impl GroqAdapter {
    pub fn new(config: GroqConfig) -> Result<Self, InferenceError> {
        Ok(Self {
            config,
            registry: ModelRegistry::new(model_entries())?,
            provider_data: None,
        })
    }

    /// Request-scoped credential material, overriding nothing that static
    /// config already provides.
    pub fn with_provider_data(mut self, provider_data: ProviderData) -> Self {
        self.provider_data = Some(provider_data);
        self
    }

    fn build_request(
        &self,
        request: &ChatCompletionRequest,
        stream: bool,
    ) -> Result<reqwest::RequestBuilder, InferenceError> {
        request.validate()?;
        if request.logprobs.is_some() {
            return Err(InferenceError::unsupported(PROVIDER_ID, "logprobs"));
        }

        let api_key = resolve_api_key(
            self.config.api_key.as_ref(),
            self.provider_data.as_ref(),
            MISSING_KEY_INSTRUCTIONS,
        )?;
        let model = self.registry.resolve(&request.model)?;
        let body = GroqRequest::new(request, model, stream)?;

        let http_client = build_http_client(&self.config.transport)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key.expose_secret()))
                .map_err(|_| InferenceError::InvalidConfig("invalid API key".to_string()))?,
        );

        let url = format!("{}/chat/completions", self.config.url);
        let mut req = http_client.post(&url).headers(headers);
        req = add_extra_headers(req, &self.config.transport);

        Ok(req.json_logged(&body))
    }
}

#[async_trait]
impl InferenceAdapter for GroqAdapter {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[
            Capability::ChatCompletion,
            Capability::Streaming,
            Capability::StructuredOutput,
        ]
    }

    async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, InferenceError> {
        let req = self.build_request(&request, false)?;
        let response = req.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text_logged().await.unwrap_or_default();
            return Err(handle_error_response(status, &body));
        }

        let groq_response: GroqResponse = serde_json::from_str(&response.text_logged().await?)?;
        groq_response.into_unified()
    }

    async fn chat_completion_stream(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionStream, InferenceError> {
        let req = self.build_request(&request, true)?;
        let response = req.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text_logged().await.unwrap_or_default();
            return Err(handle_error_response(status, &body));
        }

        Ok(Box::pin(stream_chunks(response)))
    }
}

fn handle_error_response(status: reqwest::StatusCode, body: &str) -> InferenceError {
    if let Ok(error_response) = serde_json::from_str::<GroqErrorResponse>(body) {
        if error_response.error.code.as_deref() == Some("tool_use_failed") {
            return InferenceError::ToolInvocationFailed {
                message: error_response.error.message,
                payload: serde_json::from_str(body).unwrap_or(Value::Null),
            };
        }
        return InferenceError::Upstream(format!(
            "Groq error ({}): {}",
            error_response.error.error_type.as_deref().unwrap_or("unknown"),
            error_response.error.message
        ));
    }
    InferenceError::Upstream(format!("HTTP {status}: {body}"))
}

fn stream_chunks(
    response: reqwest::Response,
) -> impl futures::Stream<Item = Result<ChatCompletionStreamChunk, InferenceError>> + Send {
    use crate::sse::StreamingResponseExt;

    let sse_stream = response.sse();

    async_stream::try_stream! {
        let mut stream = Box::pin(sse_stream);

        // Tool-call fragments arrive spread across chunks, keyed by index.
        let mut tool_index_map: HashMap<u32, usize> = HashMap::new();
        let mut pending_calls: Vec<PendingToolCall> = Vec::new();
        let mut finish: Option<StopReason> = None;

        while let Some(event_result) = stream.next().await {
            let data = event_result?;
            let chunk: GroqStreamChunk = serde_json::from_str(&data)?;

            for choice in chunk.choices {
                if let Some(delta) = choice.delta {
                    if let Some(content) = delta.content {
                        if !content.is_empty() {
                            yield ChatCompletionStreamChunk::text(content);
                        }
                    }
                    for fragment in delta.tool_calls.unwrap_or_default() {
                        let idx = *tool_index_map.entry(fragment.index).or_insert_with(|| {
                            pending_calls.push(PendingToolCall::default());
                            pending_calls.len() - 1
                        });
                        let pending = &mut pending_calls[idx];
                        if let Some(id) = fragment.id {
                            pending.call_id = id;
                        }
                        if let Some(function) = fragment.function {
                            if let Some(name) = function.name {
                                pending.tool_name.push_str(&name);
                            }
                            if let Some(arguments) = function.arguments {
                                pending.arguments.push_str(&arguments);
                            }
                        }
                    }
                }
                if let Some(reason) = choice.finish_reason {
                    finish = Some(map_finish_reason(&reason));
                }
            }
        }

        for pending in pending_calls {
            yield ChatCompletionStreamChunk {
                event: ChunkEvent::ToolCall(pending.finalize()),
                logprobs: None,
            };
        }

        yield ChatCompletionStreamChunk::complete(finish.unwrap_or(StopReason::Stop));
    }
}

#[derive(Debug, Default)]
struct PendingToolCall {
    call_id: String,
    tool_name: String,
    arguments: String,
}

impl PendingToolCall {
    fn finalize(self) -> ToolCallDelta {
        // Some backends send no argument fragments at all for a
        // zero-argument call, rather than an empty object.
        let parsed = if self.arguments.is_empty() {
            Ok(HashMap::new())
        } else {
            serde_json::from_str::<HashMap<String, Value>>(&self.arguments)
        };
        match parsed {
            Ok(arguments) => ToolCallDelta::Succeeded {
                tool_call: ToolCall {
                    call_id: self.call_id,
                    tool_name: self.tool_name,
                    arguments,
                },
            },
            Err(_) => ToolCallDelta::Failed {
                raw_text: self.arguments,
            },
        }
    }
}

fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "length" => StopReason::OutOfTokens,
        "tool_calls" => StopReason::ToolCalls,
        "content_filter" => StopReason::ContentFilter,
        _ => StopReason::Stop,
    }
}

// --- Request wire types ---

#[skip_serializing_none]
#[derive(Debug, Serialize)]
struct GroqRequest {
    model: String,
    messages: Vec<GroqMessage>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GroqTool>,
    tool_choice: Option<Value>,
    response_format: Option<Value>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
struct GroqMessage {
    role: &'static str,
    content: String,
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<GroqToolCall>,
}

#[derive(Debug, Serialize)]
struct GroqTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: GroqFunction,
}

#[derive(Debug, Serialize)]
struct GroqFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct GroqToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: GroqFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct GroqFunctionCall {
    name: String,
    /// JSON-encoded arguments object, per the OpenAI wire convention.
    arguments: String,
}

impl GroqRequest {
    fn new(
        request: &ChatCompletionRequest,
        model: &str,
        stream: bool,
    ) -> Result<Self, InferenceError> {
        let messages = request
            .messages
            .iter()
            .map(GroqMessage::from_unified)
            .collect::<Result<Vec<_>, _>>()?;

        let tools = request
            .tools
            .iter()
            .map(|tool| GroqTool {
                tool_type: "function",
                function: GroqFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect::<Vec<_>>();

        let tool_choice = if tools.is_empty() {
            None
        } else {
            Some(match &request.tool_choice {
                ToolChoice::Auto => json!("auto"),
                ToolChoice::Required => json!("required"),
                ToolChoice::None => json!("none"),
                ToolChoice::Tool(name) => {
                    json!({"type": "function", "function": {"name": name}})
                }
            })
        };

        let response_format = match &request.response_format {
            None => None,
            Some(ResponseFormat::JsonSchema { json_schema }) => {
                Some(json!({"type": "json_schema", "json_schema": json_schema}))
            }
            Some(ResponseFormat::Grammar { .. }) => {
                return Err(InferenceError::unsupported(
                    PROVIDER_ID,
                    "grammar response format",
                ));
            }
        };

        Ok(Self {
            model: model.to_string(),
            messages,
            temperature: request.sampling_params.temperature,
            top_p: request.sampling_params.top_p,
            max_tokens: request.sampling_params.max_tokens,
            stream: stream.then_some(true),
            tools,
            tool_choice,
            response_format,
        })
    }
}

impl GroqMessage {
    fn from_unified(message: &Message) -> Result<Self, InferenceError> {
        let converted = match message {
            Message::System { content } => Self {
                role: "system",
                content: content.as_text(),
                tool_call_id: None,
                tool_calls: Vec::new(),
            },
            Message::User { content } => Self {
                role: "user",
                content: content.as_text(),
                tool_call_id: None,
                tool_calls: Vec::new(),
            },
            Message::Assistant {
                content,
                tool_calls,
            } => Self {
                role: "assistant",
                content: content.as_text(),
                tool_call_id: None,
                tool_calls: tool_calls
                    .iter()
                    .map(|call| {
                        Ok(GroqToolCall {
                            id: call.call_id.clone(),
                            call_type: "function".to_string(),
                            function: GroqFunctionCall {
                                name: call.tool_name.clone(),
                                arguments: serde_json::to_string(&call.arguments)?,
                            },
                        })
                    })
                    .collect::<Result<Vec<_>, InferenceError>>()?,
            },
            Message::Tool { call_id, content } => Self {
                role: "tool",
                content: content.as_text(),
                tool_call_id: Some(call_id.clone()),
                tool_calls: Vec::new(),
            },
        };
        Ok(converted)
    }
}

// --- Response wire types ---

#[derive(Debug, Deserialize)]
struct GroqResponse {
    choices: Vec<GroqChoice>,
}

#[derive(Debug, Deserialize)]
struct GroqChoice {
    message: GroqResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroqResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<GroqToolCall>,
}

impl GroqResponse {
    fn into_unified(self) -> Result<ChatCompletionResponse, InferenceError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| InferenceError::Upstream("response contained no choices".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| {
                Ok(ToolCall {
                    call_id: call.id,
                    tool_name: call.function.name,
                    arguments: serde_json::from_str(&call.function.arguments)?,
                })
            })
            .collect::<Result<Vec<_>, InferenceError>>()?;

        let stop_reason = match choice.finish_reason.as_deref() {
            Some(reason) => map_finish_reason(reason),
            None if !tool_calls.is_empty() => StopReason::ToolCalls,
            None => StopReason::Stop,
        };

        Ok(ChatCompletionResponse {
            completion_message: CompletionMessage {
                content: InterleavedContent::Text(
                    choice.message.content.unwrap_or_default(),
                ),
                tool_calls,
                stop_reason,
            },
            logprobs: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GroqErrorResponse {
    error: GroqError,
}

#[derive(Debug, Deserialize)]
struct GroqError {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<String>,
}

// --- Streaming wire types ---

#[derive(Debug, Deserialize)]
struct GroqStreamChunk {
    choices: Vec<GroqStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct GroqStreamChoice {
    delta: Option<GroqStreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroqStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<GroqStreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct GroqStreamToolCall {
    index: u32,
    id: Option<String>,
    function: Option<GroqStreamFunction>,
}

#[derive(Debug, Deserialize)]
struct GroqStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}
