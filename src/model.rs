//! Provider-agnostic data model for inference requests, responses, and
//! stream chunks.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::InferenceError;

/// Role of the message sender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single span within interleaved message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text { text: String },
    Image { url: String },
    ToolResult { call_id: String, content: String },
}

/// Message content: plain text or an ordered sequence of spans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum InterleavedContent {
    Text(String),
    Items(Vec<ContentItem>),
}

impl InterleavedContent {
    /// Flatten to plain text, joining text spans with a single space.
    pub fn as_text(&self) -> String {
        self.join_text(" ")
    }

    /// Flatten to plain text using the given separator between text spans.
    pub fn join_text(&self, separator: &str) -> String {
        match self {
            InterleavedContent::Text(text) => text.clone(),
            InterleavedContent::Items(items) => items
                .iter()
                .filter_map(|item| match item {
                    ContentItem::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .join(separator),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            InterleavedContent::Text(text) => text.is_empty(),
            InterleavedContent::Items(items) => items.is_empty(),
        }
    }
}

impl From<String> for InterleavedContent {
    fn from(text: String) -> Self {
        InterleavedContent::Text(text)
    }
}

impl From<&str> for InterleavedContent {
    fn from(text: &str) -> Self {
        InterleavedContent::Text(text.to_string())
    }
}

/// A single message in a conversation. Order is turn order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: InterleavedContent,
    },
    User {
        content: InterleavedContent,
    },
    Assistant {
        content: InterleavedContent,
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        call_id: String,
        content: InterleavedContent,
    },
}

impl Message {
    pub fn system(content: impl Into<InterleavedContent>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<InterleavedContent>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<InterleavedContent>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::System { .. } => Role::System,
            Message::User { .. } => Role::User,
            Message::Assistant { .. } => Role::Assistant,
            Message::Tool { .. } => Role::Tool,
        }
    }

    pub fn content(&self) -> &InterleavedContent {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::Assistant { content, .. }
            | Message::Tool { content, .. } => content,
        }
    }
}

/// Sampling parameters attached to a request. Immutable value object.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SamplingParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
    pub repetition_penalty: Option<f32>,
}

impl SamplingParams {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_repetition_penalty(mut self, penalty: f32) -> Self {
        self.repetition_penalty = Some(penalty);
        self
    }
}

/// A tool offered to the model for a single request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for the tool's parameters.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A tool invocation produced by parsing or by the backend. Never supplied
/// by the caller as input content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: HashMap<String, Value>,
}

/// Policy for whether the model may, must, or must not call tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    Required,
    None,
    /// The model must call this specific tool.
    Tool(String),
}

/// Grammar the model uses when it emits tool calls as embedded text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolPromptFormat {
    Json,
    PythonList,
}

/// Structured-output constraint for a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    JsonSchema { json_schema: Value },
    Grammar { bnf: Value },
}

/// Log-probability reporting configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LogProbConfig {
    pub top_k: Option<u32>,
}

/// Log probabilities for a single generated token position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenLogProbs {
    pub logprobs_by_token: HashMap<String, f32>,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    OutOfTokens,
    ToolCalls,
    ContentFilter,
}

/// Unified chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub sampling_params: SamplingParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub tool_choice: ToolChoice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_prompt_format: Option<ToolPromptFormat>,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<LogProbConfig>,
}

impl ChatCompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            sampling_params: SamplingParams::default(),
            response_format: None,
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
            tool_prompt_format: None,
            stream: false,
            logprobs: None,
        }
    }

    pub fn with_sampling_params(mut self, sampling_params: SamplingParams) -> Self {
        self.sampling_params = sampling_params;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = tool_choice;
        self
    }

    pub fn with_tool_prompt_format(mut self, format: ToolPromptFormat) -> Self {
        self.tool_prompt_format = Some(format);
        self
    }

    pub fn with_response_format(mut self, response_format: ResponseFormat) -> Self {
        self.response_format = Some(response_format);
        self
    }

    pub fn with_logprobs(mut self, logprobs: LogProbConfig) -> Self {
        self.logprobs = Some(logprobs);
        self
    }

    /// Check the request's structural invariants: tool names must be unique
    /// within the request, and a specific `tool_choice` must name a tool
    /// that is actually offered.
    pub fn validate(&self) -> Result<(), InferenceError> {
        let mut seen = std::collections::HashSet::new();
        for tool in &self.tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(InferenceError::InvalidRequest(format!(
                    "duplicate tool name '{}'",
                    tool.name
                )));
            }
        }
        if let ToolChoice::Tool(name) = &self.tool_choice {
            if !seen.contains(name.as_str()) {
                return Err(InferenceError::InvalidRequest(format!(
                    "tool_choice names '{name}' but no such tool was offered"
                )));
            }
        }
        Ok(())
    }
}

/// The assistant message completing a chat request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionMessage {
    pub content: InterleavedContent,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
}

impl From<CompletionMessage> for Message {
    fn from(message: CompletionMessage) -> Self {
        Message::Assistant {
            content: message.content,
            tool_calls: message.tool_calls,
        }
    }
}

/// Unified non-streaming chat-completion response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionResponse {
    pub completion_message: CompletionMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Vec<TokenLogProbs>>,
}

/// Tool-call portion of a stream chunk, classified by parse outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "parse_status", rename_all = "snake_case")]
pub enum ToolCallDelta {
    Succeeded { tool_call: ToolCall },
    /// The candidate did not parse; the accumulated raw text is surfaced
    /// verbatim so the caller can inspect what failed.
    Failed { raw_text: String },
}

/// One event in a chat-completion chunk stream.
///
/// Chunks form a finite, ordered, single-pass sequence. Concatenating all
/// `Text` deltas in order reconstructs the full untagged text content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkEvent {
    Text { delta: String },
    ToolCall(ToolCallDelta),
    Complete { stop_reason: StopReason },
}

/// A single chunk of a streaming chat-completion response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionStreamChunk {
    pub event: ChunkEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Vec<TokenLogProbs>>,
}

impl ChatCompletionStreamChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            event: ChunkEvent::Text {
                delta: delta.into(),
            },
            logprobs: None,
        }
    }

    pub fn complete(stop_reason: StopReason) -> Self {
        Self {
            event: ChunkEvent::Complete { stop_reason },
            logprobs: None,
        }
    }
}

/// Unified non-chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub content: InterleavedContent,
    #[serde(default)]
    pub sampling_params: SamplingParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<LogProbConfig>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, content: impl Into<InterleavedContent>) -> Self {
        Self {
            model: model.into(),
            content: content.into(),
            sampling_params: SamplingParams::default(),
            response_format: None,
            stream: false,
            logprobs: None,
        }
    }
}

/// Unified non-streaming completion response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionResponse {
    pub content: String,
    pub stop_reason: StopReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Vec<TokenLogProbs>>,
}

/// A single chunk of a streaming completion response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionStreamChunk {
    pub delta: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Vec<TokenLogProbs>>,
}

/// How embedding inputs longer than the model window are truncated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TextTruncation {
    #[default]
    None,
    Start,
    End,
}

/// Task hint for asymmetric embedding models.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingTaskType {
    Query,
    Document,
}

/// Unified embeddings request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingsRequest {
    pub model: String,
    pub contents: Vec<InterleavedContent>,
    #[serde(default)]
    pub text_truncation: TextTruncation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dimension: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_type: Option<EmbeddingTaskType>,
}

impl EmbeddingsRequest {
    pub fn new(model: impl Into<String>, contents: Vec<InterleavedContent>) -> Self {
        Self {
            model: model.into(),
            contents,
            text_truncation: TextTruncation::default(),
            output_dimension: None,
            task_type: None,
        }
    }
}

/// Unified embeddings response, one vector per input in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingsResponse {
    pub embeddings: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather_tool() -> ToolDefinition {
        ToolDefinition::new(
            "get_weather",
            json!({"type": "object", "properties": {"location": {"type": "string"}}}),
        )
    }

    #[test]
    fn validate_accepts_unique_tools() {
        let request = ChatCompletionRequest::new("m", vec![Message::user("hi")])
            .with_tools(vec![weather_tool()]);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_tool_names() {
        let request = ChatCompletionRequest::new("m", vec![Message::user("hi")])
            .with_tools(vec![weather_tool(), weather_tool()]);
        assert!(matches!(
            request.validate(),
            Err(InferenceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn validate_rejects_unknown_specific_tool_choice() {
        let request = ChatCompletionRequest::new("m", vec![Message::user("hi")])
            .with_tools(vec![weather_tool()])
            .with_tool_choice(ToolChoice::Tool("get_stock_price".to_string()));
        assert!(matches!(
            request.validate(),
            Err(InferenceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn chunk_events_serialize_with_discriminants() {
        let failed = ChunkEvent::ToolCall(ToolCallDelta::Failed {
            raw_text: "[oops".to_string(),
        });
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["type"], "tool_call");
        assert_eq!(value["parse_status"], "failed");
        assert_eq!(value["raw_text"], "[oops");

        let complete = ChunkEvent::Complete {
            stop_reason: StopReason::OutOfTokens,
        };
        let value = serde_json::to_value(&complete).unwrap();
        assert_eq!(value["type"], "complete");
        assert_eq!(value["stop_reason"], "out_of_tokens");
    }

    #[test]
    fn interleaved_content_flattens_text_spans() {
        let content = InterleavedContent::Items(vec![
            ContentItem::Text {
                text: "what is".to_string(),
            },
            ContentItem::Image {
                url: "https://example.com/cat.png".to_string(),
            },
            ContentItem::Text {
                text: "this animal".to_string(),
            },
        ]);
        assert_eq!(content.join_text(" "), "what is this animal");
    }
}
