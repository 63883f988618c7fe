//! Error types shared across the inference surface.

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by adapters, the router, and the RAG tool.
///
/// Parse failures inside the streaming tool-call parser are *not* errors;
/// they are ordinary `failed` events in the chunk sequence. Nothing in this
/// crate retries — retry policy belongs to the transport layer above.
#[derive(Error, Debug)]
pub enum InferenceError {
    /// The backend does not implement the requested operation.
    #[error("provider '{provider}' does not support {operation}")]
    UnsupportedOperation {
        provider: &'static str,
        operation: &'static str,
    },

    /// No registry entry resolves the logical model identifier.
    #[error("unknown model: '{0}'")]
    UnknownModel(String),

    /// No credential available from static config or per-request data.
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// The backend rejected every tool candidate even though tools were
    /// offered. Distinct from a successful response with zero tool calls.
    #[error("backend could not invoke any offered tool: {message}")]
    ToolInvocationFailed { message: String, payload: Value },

    /// Invalid parameters detected at configuration time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A request violated one of its structural invariants.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Any other backend failure, diagnostic preserved verbatim.
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl InferenceError {
    /// Shorthand for the capability-absent case.
    pub fn unsupported(provider: &'static str, operation: &'static str) -> Self {
        Self::UnsupportedOperation {
            provider,
            operation,
        }
    }
}
