//! The provider adapter contract.
//!
//! An adapter translates unified requests into one backend's native call
//! shape and wraps native responses back into the unified model. Adapters
//! are stateless dispatch facades: concurrent calls share no per-call
//! state, and each streaming call owns its own parser instance.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::error::InferenceError;
use crate::model::{
    ChatCompletionRequest, ChatCompletionResponse, ChatCompletionStreamChunk, CompletionRequest,
    CompletionResponse, CompletionStreamChunk, EmbeddingsRequest, EmbeddingsResponse,
};

/// Operations and features a backend may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Completion,
    ChatCompletion,
    Embeddings,
    Streaming,
    LogProbs,
    StructuredOutput,
}

/// Lazy, single-pass, forward-only sequence of chat-completion chunks.
///
/// The stream pulls from the backend transport as the caller consumes it;
/// dropping it before exhaustion releases the underlying connection.
pub type ChatCompletionStream =
    Pin<Box<dyn Stream<Item = Result<ChatCompletionStreamChunk, InferenceError>> + Send>>;

/// Lazy, single-pass sequence of completion chunks.
pub type CompletionStream =
    Pin<Box<dyn Stream<Item = Result<CompletionStreamChunk, InferenceError>> + Send>>;

/// One backend's inference surface.
///
/// Every operation has a default body that fails with
/// [`InferenceError::UnsupportedOperation`], so an adapter implements
/// exactly the subset its backend offers and the rest reject
/// deterministically rather than silently degrading.
#[async_trait]
pub trait InferenceAdapter: Send + Sync {
    /// Stable identifier used in error messages and routing.
    fn provider_id(&self) -> &'static str;

    /// The capability subset this backend supports.
    fn capabilities(&self) -> &'static [Capability];

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    async fn completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, InferenceError> {
        let _ = request;
        Err(InferenceError::unsupported(self.provider_id(), "completion"))
    }

    async fn completion_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, InferenceError> {
        let _ = request;
        Err(InferenceError::unsupported(
            self.provider_id(),
            "streaming completion",
        ))
    }

    async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, InferenceError> {
        let _ = request;
        Err(InferenceError::unsupported(
            self.provider_id(),
            "chat completion",
        ))
    }

    async fn chat_completion_stream(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionStream, InferenceError> {
        let _ = request;
        Err(InferenceError::unsupported(
            self.provider_id(),
            "streaming chat completion",
        ))
    }

    async fn embeddings(
        &self,
        request: EmbeddingsRequest,
    ) -> Result<EmbeddingsResponse, InferenceError> {
        let _ = request;
        Err(InferenceError::unsupported(self.provider_id(), "embeddings"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message;

    struct ChatOnly;

    #[async_trait]
    impl InferenceAdapter for ChatOnly {
        fn provider_id(&self) -> &'static str {
            "chat-only"
        }

        fn capabilities(&self) -> &'static [Capability] {
            &[Capability::ChatCompletion]
        }
    }

    #[tokio::test]
    async fn default_operations_reject_deterministically() {
        let adapter = ChatOnly;
        let request = CompletionRequest::new("m", "tell me a story");

        for _ in 0..2 {
            let err = adapter.completion(request.clone()).await.unwrap_err();
            match err {
                InferenceError::UnsupportedOperation {
                    provider,
                    operation,
                } => {
                    assert_eq!(provider, "chat-only");
                    assert_eq!(operation, "completion");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        let err = adapter
            .embeddings(EmbeddingsRequest::new("m", vec!["hi".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::UnsupportedOperation { .. }));
    }

    #[tokio::test]
    async fn capability_set_reflects_declared_subset() {
        let adapter = ChatOnly;
        assert!(adapter.supports(Capability::ChatCompletion));
        assert!(!adapter.supports(Capability::Embeddings));
        assert!(!adapter.supports(Capability::Streaming));

        // The default chat body still rejects; ChatOnly declares the
        // capability without overriding the operation here.
        let err = adapter
            .chat_completion(ChatCompletionRequest::new("m", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::UnsupportedOperation { .. }));
    }
}
