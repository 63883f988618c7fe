//! # uninfer - Provider-Agnostic Inference Layer
//!
//! A normalization layer over heterogeneous LLM inference backends. Callers
//! speak one unified request/response model; per-provider adapters translate
//! to and from each backend's native shape.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Trait-based adapter contract with explicit capability sets
//! - Unified chat, completion, and embeddings operations
//! - Streaming via Server-Sent Events and newline-delimited JSON
//! - Incremental parsing of tool calls embedded in streamed text
//! - Logical-model registry and request routing
//! - Token-budgeted retrieval context assembly
//!
//! ## Architecture
//!
//! - **[`model`]**: the unified data model (messages, requests, responses,
//!   stream chunks)
//! - **[`adapter::InferenceAdapter`]**: the per-backend contract; operations
//!   a backend lacks reject with `UnsupportedOperation`
//! - **[`registry`]**: logical-model resolution and the dispatching router
//! - **[`parser::ToolCallParser`]**: incremental extraction of tool calls
//!   from streamed text, in JSON or Python-call-list form
//! - **[`rag`]**: retrieval query generation and context assembly
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use uninfer::model::{ChatCompletionRequest, Message};
//! use uninfer::providers::groq::{GroqAdapter, GroqConfig};
//! use uninfer::registry::InferenceRouter;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = Arc::new(GroqAdapter::new(
//!         GroqConfig::default().with_api_key("your-api-key"),
//!     )?);
//!
//!     let router = InferenceRouter::new(vec![(
//!         "llama3-8b-8192".to_string(),
//!         adapter as Arc<dyn uninfer::adapter::InferenceAdapter>,
//!     )])?;
//!
//!     let response = router
//!         .chat_completion(ChatCompletionRequest::new(
//!             "llama3-8b-8192",
//!             vec![Message::user("Hello!")],
//!         ))
//!         .await?;
//!     println!("{:?}", response.completion_message.content);
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod http;
pub mod model;
pub mod parser;
pub mod providers;
pub mod rag;
pub mod registry;
pub mod sse;

// Re-exports for convenience
pub use adapter::{Capability, ChatCompletionStream, CompletionStream, InferenceAdapter};
pub use error::InferenceError;
pub use model::{
    ChatCompletionRequest, ChatCompletionResponse, ChatCompletionStreamChunk, Message,
};
pub use parser::ToolCallParser;
pub use registry::{InferenceRouter, ModelRegistry};
