//! Logical-model resolution and request dispatch.
//!
//! A [`ModelRegistry`] maps logical model identifiers to one provider's
//! local identifiers; an [`InferenceRouter`] maps logical identifiers to
//! adapter instances. Both tables are fixed at construction: registration
//! conflicts are explicit configuration errors rather than silent
//! last-writer-wins, so a deployment's routing is auditable.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::adapter::{ChatCompletionStream, CompletionStream, InferenceAdapter};
use crate::error::InferenceError;
use crate::model::{
    ChatCompletionRequest, ChatCompletionResponse, CompletionRequest, CompletionResponse,
    EmbeddingsRequest, EmbeddingsResponse,
};

/// One provider-local model and the logical identifiers that resolve to it.
#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub provider_model_id: String,
    pub aliases: Vec<String>,
    /// Non-fatal note surfaced when this model is resolved, for backends
    /// with known limitations (preview models and the like).
    pub advisory: Option<String>,
}

impl ModelEntry {
    pub fn new(provider_model_id: impl Into<String>, aliases: &[&str]) -> Self {
        Self {
            provider_model_id: provider_model_id.into(),
            aliases: aliases.iter().map(|alias| alias.to_string()).collect(),
            advisory: None,
        }
    }

    pub fn with_advisory(mut self, note: impl Into<String>) -> Self {
        self.advisory = Some(note.into());
        self
    }
}

/// Fixed lookup table from logical model ids to provider-local ids.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    mapping: HashMap<String, String>,
    advisories: HashMap<String, String>,
}

impl ModelRegistry {
    /// Build the table. Every alias and every provider-local id resolves;
    /// a duplicate registration is an `InvalidConfig` conflict error.
    pub fn new(entries: Vec<ModelEntry>) -> Result<Self, InferenceError> {
        let mut mapping = HashMap::new();
        let mut advisories = HashMap::new();

        for entry in entries {
            let mut logical_ids = entry.aliases;
            logical_ids.push(entry.provider_model_id.clone());
            for logical_id in logical_ids {
                if let Some(previous) =
                    mapping.insert(logical_id.clone(), entry.provider_model_id.clone())
                {
                    return Err(InferenceError::InvalidConfig(format!(
                        "model id '{logical_id}' registered for both '{previous}' and '{}'",
                        entry.provider_model_id
                    )));
                }
            }
            if let Some(note) = entry.advisory {
                advisories.insert(entry.provider_model_id, note);
            }
        }

        Ok(Self {
            mapping,
            advisories,
        })
    }

    /// Pure lookup of the provider-local id. Emits the entry's advisory as
    /// a warning, never blocking the call.
    pub fn resolve(&self, model_id: &str) -> Result<&str, InferenceError> {
        let provider_model_id = self
            .mapping
            .get(model_id)
            .ok_or_else(|| InferenceError::UnknownModel(model_id.to_string()))?;
        if let Some(note) = self.advisories.get(provider_model_id) {
            warn!(model = %provider_model_id, "{note}");
        }
        Ok(provider_model_id)
    }
}

/// Routes each request to the adapter registered for its logical model id.
pub struct InferenceRouter {
    routes: HashMap<String, Arc<dyn InferenceAdapter>>,
}

impl InferenceRouter {
    /// Build the dispatch table. Registering the same logical id twice is
    /// an `InvalidConfig` conflict error.
    pub fn new(
        routes: impl IntoIterator<Item = (String, Arc<dyn InferenceAdapter>)>,
    ) -> Result<Self, InferenceError> {
        let mut table: HashMap<String, Arc<dyn InferenceAdapter>> = HashMap::new();
        for (model_id, adapter) in routes {
            if let Some(previous) = table.insert(model_id.clone(), adapter) {
                return Err(InferenceError::InvalidConfig(format!(
                    "model id '{model_id}' already routed to provider '{}'",
                    previous.provider_id()
                )));
            }
        }
        Ok(Self { routes: table })
    }

    /// Pure lookup of the adapter serving a logical model id.
    pub fn resolve(&self, model_id: &str) -> Result<&Arc<dyn InferenceAdapter>, InferenceError> {
        self.routes
            .get(model_id)
            .ok_or_else(|| InferenceError::UnknownModel(model_id.to_string()))
    }

    pub async fn completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, InferenceError> {
        self.resolve(&request.model)?.completion(request).await
    }

    pub async fn completion_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, InferenceError> {
        self.resolve(&request.model)?
            .completion_stream(request)
            .await
    }

    pub async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, InferenceError> {
        self.resolve(&request.model)?.chat_completion(request).await
    }

    pub async fn chat_completion_stream(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionStream, InferenceError> {
        self.resolve(&request.model)?
            .chat_completion_stream(request)
            .await
    }

    pub async fn embeddings(
        &self,
        request: EmbeddingsRequest,
    ) -> Result<EmbeddingsResponse, InferenceError> {
        self.resolve(&request.model)?.embeddings(request).await
    }
}
