//! Adapter for a local Ollama server.
//!
//! Ollama streams newline-delimited JSON and embeds tool calls in the
//! generated text, so chat responses are run through the incremental
//! tool-call parser, one parser instance per call.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

use crate::adapter::{
    Capability, ChatCompletionStream, CompletionStream, InferenceAdapter,
};
use crate::config::TransportConfig;
use crate::error::InferenceError;
use crate::http::{add_extra_headers, build_http_client, RequestBuilderExt, ResponseExt};
use crate::model::{
    ChatCompletionRequest, ChatCompletionResponse, ChatCompletionStreamChunk, ChunkEvent,
    CompletionMessage, CompletionRequest, CompletionResponse, CompletionStreamChunk,
    EmbeddingsRequest, EmbeddingsResponse, InterleavedContent, Message, ResponseFormat,
    SamplingParams, StopReason, ToolCall,
};
use crate::parser::{ParserEvent, ToolCallParser};

pub const PROVIDER_ID: &str = "ollama";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Static configuration for the Ollama adapter.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub url: String,
    pub transport: TransportConfig,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BASE_URL.to_string(),
            transport: TransportConfig::default(),
        }
    }
}

impl OllamaConfig {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}

pub struct OllamaAdapter {
    config: OllamaConfig,
}

impl OllamaAdapter {
    pub fn new(config: OllamaConfig) -> Self {
        Self { config }
    }

    fn post(&self, path: &str) -> Result<reqwest::RequestBuilder, InferenceError> {
        let http_client = build_http_client(&self.config.transport)?;
        let url = format!("{}{}", self.config.url, path);
        Ok(add_extra_headers(
            http_client.post(&url),
            &self.config.transport,
        ))
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, InferenceError> {
        let response = self.post(path)?.json_logged(body).send().await?;
        let status = response.status();
        let text = response.text_logged().await?;
        if !status.is_success() {
            return Err(handle_error_response(status, &text));
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn send_streaming(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<reqwest::Response, InferenceError> {
        let response = self.post(path)?.json_logged(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text_logged().await.unwrap_or_default();
            return Err(handle_error_response(status, &text));
        }
        Ok(response)
    }
}

#[async_trait]
impl InferenceAdapter for OllamaAdapter {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[
            Capability::Completion,
            Capability::ChatCompletion,
            Capability::Embeddings,
            Capability::Streaming,
            Capability::StructuredOutput,
        ]
    }

    async fn completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, InferenceError> {
        let body = OllamaGenerateRequest::new(&request, false)?;
        let response: OllamaGenerateResponse = self.send("/api/generate", &body).await?;

        Ok(CompletionResponse {
            content: response.response,
            stop_reason: map_done_reason(response.done_reason.as_deref()),
            logprobs: None,
        })
    }

    async fn completion_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, InferenceError> {
        use crate::sse::StreamingResponseExt;

        let body = OllamaGenerateRequest::new(&request, true)?;
        let response = self.send_streaming("/api/generate", &body).await?;

        let stream = async_stream::try_stream! {
            let mut lines = Box::pin(response.ndjson());
            while let Some(line) = lines.next().await {
                let chunk: OllamaGenerateResponse = serde_json::from_str(&line?)?;
                let stop_reason = chunk
                    .done
                    .then(|| map_done_reason(chunk.done_reason.as_deref()));
                yield CompletionStreamChunk {
                    delta: chunk.response,
                    stop_reason,
                    logprobs: None,
                };
            }
        };
        Ok(Box::pin(stream))
    }

    async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, InferenceError> {
        request.validate()?;
        let body = OllamaChatRequest::new(&request, false)?;
        let response: OllamaChatResponse = self.send("/api/chat", &body).await?;

        let (content, tool_calls) =
            extract_tool_calls(&request, &response.message.content);
        let stop_reason = if !tool_calls.is_empty() {
            StopReason::ToolCalls
        } else {
            map_done_reason(response.done_reason.as_deref())
        };

        Ok(ChatCompletionResponse {
            completion_message: CompletionMessage {
                content: InterleavedContent::Text(content),
                tool_calls,
                stop_reason,
            },
            logprobs: None,
        })
    }

    async fn chat_completion_stream(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionStream, InferenceError> {
        use crate::sse::StreamingResponseExt;

        request.validate()?;
        let body = OllamaChatRequest::new(&request, true)?;
        let response = self.send_streaming("/api/chat", &body).await?;
        let mut parser = ToolCallParser::for_request(&request);

        let stream = async_stream::try_stream! {
            let mut lines = Box::pin(response.ndjson());
            let mut saw_tool_call = false;
            let mut done_reason: Option<String> = None;

            while let Some(line) = lines.next().await {
                let chunk: OllamaChatResponse = serde_json::from_str(&line?)?;
                for event in parser.feed(&chunk.message.content) {
                    if matches!(event, ParserEvent::ToolCall { .. }) {
                        saw_tool_call = true;
                    }
                    yield ChatCompletionStreamChunk {
                        event: ChunkEvent::from(event),
                        logprobs: None,
                    };
                }
                if chunk.done {
                    done_reason = chunk.done_reason;
                    break;
                }
            }

            // A candidate still open when generation stops was truncated.
            if let Some(event) = parser.finish() {
                if matches!(event, ParserEvent::ToolCall { .. }) {
                    saw_tool_call = true;
                }
                yield ChatCompletionStreamChunk {
                    event: ChunkEvent::from(event),
                    logprobs: None,
                };
            }

            let stop_reason = if saw_tool_call {
                StopReason::ToolCalls
            } else {
                map_done_reason(done_reason.as_deref())
            };
            yield ChatCompletionStreamChunk::complete(stop_reason);
        };
        Ok(Box::pin(stream))
    }

    async fn embeddings(
        &self,
        request: EmbeddingsRequest,
    ) -> Result<EmbeddingsResponse, InferenceError> {
        if request.output_dimension.is_some() {
            return Err(InferenceError::unsupported(
                PROVIDER_ID,
                "embedding dimension selection",
            ));
        }
        let body = OllamaEmbedRequest {
            model: request.model.clone(),
            input: request
                .contents
                .iter()
                .map(InterleavedContent::as_text)
                .collect(),
        };
        let response: OllamaEmbedResponse = self.send("/api/embed", &body).await?;
        Ok(EmbeddingsResponse {
            embeddings: response.embeddings,
        })
    }
}

fn handle_error_response(status: reqwest::StatusCode, body: &str) -> InferenceError {
    if let Ok(error_response) = serde_json::from_str::<OllamaErrorResponse>(body) {
        return InferenceError::Upstream(format!("Ollama error: {}", error_response.error));
    }
    InferenceError::Upstream(format!("HTTP {status}: {body}"))
}

/// Split a full response body into its untagged text and the tool calls
/// embedded within it. Failed candidates stay in the text verbatim.
fn extract_tool_calls(
    request: &ChatCompletionRequest,
    body: &str,
) -> (String, Vec<ToolCall>) {
    let mut parser = ToolCallParser::for_request(request);
    let mut events = parser.feed(body);
    events.extend(parser.finish());

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for event in events {
        match event {
            ParserEvent::Text { delta } => content.push_str(&delta),
            ParserEvent::ToolCall { tool_call, .. } => tool_calls.push(tool_call),
            ParserEvent::Failed { raw_text } => content.push_str(&raw_text),
        }
    }
    (content, tool_calls)
}

fn map_done_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("length") => StopReason::OutOfTokens,
        _ => StopReason::Stop,
    }
}

// --- Wire types ---

#[skip_serializing_none]
#[derive(Debug, Serialize, Default)]
struct OllamaOptions {
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
    num_predict: Option<u32>,
    repeat_penalty: Option<f32>,
}

impl OllamaOptions {
    fn from_sampling(params: &SamplingParams) -> Option<Self> {
        let options = Self {
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            num_predict: params.max_tokens,
            repeat_penalty: params.repetition_penalty,
        };
        (*params != SamplingParams::default()).then_some(options)
    }
}

fn format_from(response_format: &Option<ResponseFormat>) -> Result<Option<Value>, InferenceError> {
    match response_format {
        None => Ok(None),
        Some(ResponseFormat::JsonSchema { json_schema }) => Ok(Some(json_schema.clone())),
        Some(ResponseFormat::Grammar { .. }) => Err(InferenceError::unsupported(
            PROVIDER_ID,
            "grammar response format",
        )),
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: Option<OllamaOptions>,
    format: Option<Value>,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
}

impl OllamaChatRequest {
    fn new(request: &ChatCompletionRequest, stream: bool) -> Result<Self, InferenceError> {
        let messages = request
            .messages
            .iter()
            .map(|message| OllamaMessage {
                role: match message {
                    Message::System { .. } => "system",
                    Message::User { .. } => "user",
                    Message::Assistant { .. } => "assistant",
                    Message::Tool { .. } => "tool",
                },
                content: message.content().as_text(),
            })
            .collect();

        Ok(Self {
            model: request.model.clone(),
            messages,
            stream,
            options: OllamaOptions::from_sampling(&request.sampling_params),
            format: format_from(&request.response_format)?,
        })
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    raw: bool,
    options: Option<OllamaOptions>,
    format: Option<Value>,
}

impl OllamaGenerateRequest {
    fn new(request: &CompletionRequest, stream: bool) -> Result<Self, InferenceError> {
        Ok(Self {
            model: request.model.clone(),
            prompt: request.content.as_text(),
            stream,
            raw: true,
            options: OllamaOptions::from_sampling(&request.sampling_params),
            format: format_from(&request.response_format)?,
        })
    }
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct OllamaErrorResponse {
    error: String,
}
