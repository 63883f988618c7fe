//! Retrieval-augmented generation: query generation, vector-store seam,
//! and token-budgeted context assembly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::InferenceError;
use crate::model::{ChatCompletionRequest, InterleavedContent, Message};
use crate::registry::InferenceRouter;

/// Default chunk size used when indexing documents.
pub const DEFAULT_CHUNK_SIZE_IN_TOKENS: u32 = 512;

const DEFAULT_MAX_TOKENS_IN_CONTEXT: u32 = 4096;
const DEFAULT_MAX_CHUNKS: u32 = 5;

/// Where a document's content comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DocumentSource {
    Content(InterleavedContent),
    Url { uri: String },
}

/// A document handed to the indexing collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RAGDocument {
    /// Unique within an insertion batch.
    pub document_id: String,
    pub content: DocumentSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Assembled retrieval context. `content: None` means no chunk met the
/// relevance and budget constraints — a valid, non-error outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RAGQueryResult {
    pub content: Option<String>,
}

/// How the retrieval query is generated from the caller's content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryGeneratorConfig {
    Default { separator: String },
    Llm { model: String, template: String },
    Custom,
}

impl Default for QueryGeneratorConfig {
    fn default() -> Self {
        QueryGeneratorConfig::Default {
            separator: " ".to_string(),
        }
    }
}

/// Retrieval budget and query-generation configuration.
///
/// Budgets are validated at configuration time: both must be positive.
#[derive(Debug, Clone, PartialEq)]
pub struct RAGQueryConfig {
    query_generator_config: QueryGeneratorConfig,
    max_tokens_in_context: u32,
    max_chunks: u32,
}

impl Default for RAGQueryConfig {
    fn default() -> Self {
        Self {
            query_generator_config: QueryGeneratorConfig::default(),
            max_tokens_in_context: DEFAULT_MAX_TOKENS_IN_CONTEXT,
            max_chunks: DEFAULT_MAX_CHUNKS,
        }
    }
}

impl RAGQueryConfig {
    pub fn new(
        query_generator_config: QueryGeneratorConfig,
        max_tokens_in_context: u32,
        max_chunks: u32,
    ) -> Result<Self, InferenceError> {
        if max_tokens_in_context == 0 {
            return Err(InferenceError::InvalidConfig(
                "max_tokens_in_context must be positive".to_string(),
            ));
        }
        if max_chunks == 0 {
            return Err(InferenceError::InvalidConfig(
                "max_chunks must be positive".to_string(),
            ));
        }
        Ok(Self {
            query_generator_config,
            max_tokens_in_context,
            max_chunks,
        })
    }

    pub fn query_generator_config(&self) -> &QueryGeneratorConfig {
        &self.query_generator_config
    }

    pub fn max_tokens_in_context(&self) -> u32 {
        self.max_tokens_in_context
    }

    pub fn max_chunks(&self) -> u32 {
        self.max_chunks
    }
}

/// A content chunk scored by the retrieval backend, with an estimated
/// token length.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub content: String,
    pub token_count: u32,
    pub score: f64,
}

/// Assemble retrieval context from relevance-ordered chunks under the
/// configured budgets.
///
/// The scan is greedy skip-and-continue: a chunk that would overflow the
/// token budget is skipped, and later, shorter chunks are still tried.
/// Accepted chunks are concatenated in their original relevance order.
pub fn assemble_context(config: &RAGQueryConfig, chunks: &[ScoredChunk]) -> RAGQueryResult {
    let separator = match config.query_generator_config() {
        QueryGeneratorConfig::Default { separator } => separator.as_str(),
        _ => " ",
    };

    let mut accepted: Vec<&str> = Vec::new();
    let mut total_tokens: u64 = 0;

    for (index, chunk) in chunks.iter().enumerate() {
        if accepted.len() as u32 >= config.max_chunks() {
            break;
        }
        let candidate = total_tokens + u64::from(chunk.token_count);
        if candidate > u64::from(config.max_tokens_in_context()) {
            debug!(
                index,
                tokens = chunk.token_count,
                budget = config.max_tokens_in_context(),
                "skipping chunk over token budget"
            );
            continue;
        }
        total_tokens = candidate;
        accepted.push(&chunk.content);
    }

    RAGQueryResult {
        content: if accepted.is_empty() {
            None
        } else {
            Some(accepted.join(separator))
        },
    }
}

/// Turn the caller's content into a retrieval query string.
pub async fn generate_rag_query(
    config: &QueryGeneratorConfig,
    content: &InterleavedContent,
    router: &InferenceRouter,
) -> Result<String, InferenceError> {
    match config {
        QueryGeneratorConfig::Default { separator } => Ok(content.join_text(separator)),
        QueryGeneratorConfig::Llm { model, template } => {
            let prompt = template.replace("{query}", &content.as_text());
            let request = ChatCompletionRequest::new(model.clone(), vec![Message::user(prompt)]);
            let response = router.chat_completion(request).await?;
            Ok(response.completion_message.content.as_text())
        }
        QueryGeneratorConfig::Custom => Err(InferenceError::InvalidConfig(
            "custom query generators are not supported".to_string(),
        )),
    }
}

/// External collaborator performing the actual indexing and vector search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn insert(
        &self,
        vector_db_id: &str,
        documents: &[RAGDocument],
        chunk_size_in_tokens: u32,
    ) -> Result<(), InferenceError>;

    /// Return chunks ordered by descending relevance.
    async fn query(
        &self,
        vector_db_id: &str,
        query: &str,
        max_chunks: u32,
    ) -> Result<Vec<ScoredChunk>, InferenceError>;
}

/// The RAG tool surface: indexing delegation plus budgeted retrieval.
pub struct RagTool {
    store: Arc<dyn VectorStore>,
    router: Arc<InferenceRouter>,
}

impl RagTool {
    pub fn new(store: Arc<dyn VectorStore>, router: Arc<InferenceRouter>) -> Self {
        Self { store, router }
    }

    /// Index documents so they can be retrieved later. The store performs
    /// the chunking and embedding.
    pub async fn insert(
        &self,
        documents: Vec<RAGDocument>,
        vector_db_id: &str,
        chunk_size_in_tokens: u32,
    ) -> Result<(), InferenceError> {
        self.store
            .insert(vector_db_id, &documents, chunk_size_in_tokens)
            .await
    }

    /// Query the given vector stores and assemble context under the
    /// configured budgets.
    pub async fn query(
        &self,
        content: &InterleavedContent,
        vector_db_ids: &[String],
        query_config: Option<RAGQueryConfig>,
    ) -> Result<RAGQueryResult, InferenceError> {
        let config = query_config.unwrap_or_default();
        let query =
            generate_rag_query(config.query_generator_config(), content, &self.router).await?;

        let mut chunks = Vec::new();
        for vector_db_id in vector_db_ids {
            chunks.extend(
                self.store
                    .query(vector_db_id, &query, config.max_chunks())
                    .await?,
            );
        }
        chunks.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        Ok(assemble_context(&config, &chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str, token_count: u32, score: f64) -> ScoredChunk {
        ScoredChunk {
            content: content.to_string(),
            token_count,
            score,
        }
    }

    fn config(max_tokens: u32, max_chunks: u32) -> RAGQueryConfig {
        RAGQueryConfig::new(QueryGeneratorConfig::default(), max_tokens, max_chunks).unwrap()
    }

    #[test]
    fn rejects_non_positive_budgets_at_configuration_time() {
        assert!(matches!(
            RAGQueryConfig::new(QueryGeneratorConfig::default(), 0, 5),
            Err(InferenceError::InvalidConfig(_))
        ));
        assert!(matches!(
            RAGQueryConfig::new(QueryGeneratorConfig::default(), 4096, 0),
            Err(InferenceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn skips_over_budget_chunk_and_keeps_scanning() {
        // A=50 fits; A+B=90 exceeds 80 so B is skipped; A+C=80 still fits.
        let chunks = vec![chunk("A", 50, 0.9), chunk("B", 40, 0.8), chunk("C", 30, 0.7)];
        let result = assemble_context(&config(80, 2), &chunks);
        assert_eq!(result.content.as_deref(), Some("A C"));
    }

    #[test]
    fn respects_max_chunks() {
        let chunks = vec![
            chunk("A", 10, 0.9),
            chunk("B", 10, 0.8),
            chunk("C", 10, 0.7),
        ];
        let result = assemble_context(&config(100, 2), &chunks);
        assert_eq!(result.content.as_deref(), Some("A B"));
    }

    #[test]
    fn preserves_relevance_order_in_output() {
        let chunks = vec![
            chunk("first", 30, 0.9),
            chunk("too-big", 100, 0.8),
            chunk("second", 30, 0.7),
            chunk("third", 30, 0.6),
        ];
        let result = assemble_context(&config(90, 5), &chunks);
        assert_eq!(result.content.as_deref(), Some("first second third"));
    }

    #[test]
    fn empty_result_when_nothing_fits() {
        let chunks = vec![chunk("A", 500, 0.9), chunk("B", 400, 0.8)];
        let result = assemble_context(&config(100, 5), &chunks);
        assert_eq!(result.content, None);
    }

    #[test]
    fn uses_configured_separator() {
        let generator = QueryGeneratorConfig::Default {
            separator: "\n---\n".to_string(),
        };
        let cfg = RAGQueryConfig::new(generator, 100, 5).unwrap();
        let chunks = vec![chunk("A", 10, 0.9), chunk("B", 10, 0.8)];
        let result = assemble_context(&cfg, &chunks);
        assert_eq!(result.content.as_deref(), Some("A\n---\nB"));
    }

    #[tokio::test]
    async fn default_generator_joins_content_spans() {
        let router = Arc::new(InferenceRouter::new(Vec::new()).unwrap());
        let content = InterleavedContent::Items(vec![
            crate::model::ContentItem::Text {
                text: "solar".to_string(),
            },
            crate::model::ContentItem::Text {
                text: "eclipse".to_string(),
            },
        ]);
        let query = generate_rag_query(&QueryGeneratorConfig::default(), &content, &router)
            .await
            .unwrap();
        assert_eq!(query, "solar eclipse");
    }

    #[tokio::test]
    async fn custom_generator_is_rejected() {
        let router = Arc::new(InferenceRouter::new(Vec::new()).unwrap());
        let result =
            generate_rag_query(&QueryGeneratorConfig::Custom, &"q".into(), &router).await;
        assert!(matches!(result, Err(InferenceError::InvalidConfig(_))));
    }

    struct FixedStore {
        chunks: Vec<ScoredChunk>,
    }

    #[async_trait]
    impl VectorStore for FixedStore {
        async fn insert(
            &self,
            _vector_db_id: &str,
            _documents: &[RAGDocument],
            _chunk_size_in_tokens: u32,
        ) -> Result<(), InferenceError> {
            Ok(())
        }

        async fn query(
            &self,
            _vector_db_id: &str,
            _query: &str,
            _max_chunks: u32,
        ) -> Result<Vec<ScoredChunk>, InferenceError> {
            Ok(self.chunks.clone())
        }
    }

    #[tokio::test]
    async fn rag_tool_merges_and_assembles() {
        let store = Arc::new(FixedStore {
            chunks: vec![chunk("relevant", 20, 0.95), chunk("weaker", 20, 0.3)],
        });
        let router = Arc::new(InferenceRouter::new(Vec::new()).unwrap());
        let tool = RagTool::new(store, router);

        let result = tool
            .query(&"question".into(), &["db-1".to_string()], None)
            .await
            .unwrap();
        assert_eq!(result.content.as_deref(), Some("relevant weaker"));
    }
}
