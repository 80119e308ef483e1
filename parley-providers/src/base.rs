//! Base trait for generative model providers

use async_trait::async_trait;
use parley_core::config::GenerationConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::stream::FragmentStream;

/// Error type for provider operations
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("No response candidates received{}", block_suffix(.block_reason))]
    EmptyCandidates { block_reason: Option<String> },

    #[error("Stream interrupted: request was cancelled")]
    Cancelled,
}

fn block_suffix(reason: &Option<String>) -> String {
    reason
        .as_ref()
        .map(|r| format!(" (prompt blocked: {})", r))
        .unwrap_or_default()
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Role of a turn on the remote side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Model => "model",
        }
    }
}

/// One role-tagged unit of chat context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Model,
            text: text.into(),
        }
    }
}

/// A model offered by the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Stable identifier used for requests and persisted with conversations
    pub id: String,
    /// Human readable name, for presentation only
    pub display_name: String,
    pub description: String,
    pub supported_methods: Vec<String>,
}

impl ModelInfo {
    /// Whether the model can serve chat requests
    pub fn supports_generation(&self) -> bool {
        self.supported_methods
            .iter()
            .any(|m| m == "generateContent")
    }

    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.id
        } else {
            &self.display_name
        }
    }
}

/// Trait for generative chat models
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// List the models available to the configured credential
    async fn list_models(&self) -> ProviderResult<Vec<ModelInfo>>;

    /// Single request/response generation over the full `contents`
    async fn generate(
        &self,
        model: &str,
        contents: &[Turn],
        settings: &GenerationConfig,
    ) -> ProviderResult<String>;

    /// Streaming generation. The returned stream yields text fragments in
    /// arrival order and ends with `ProviderError::Cancelled` once `cancel`
    /// fires.
    ///
    /// Default behavior falls back to non-streaming generation and emits a
    /// single fragment.
    async fn stream_generate(
        &self,
        model: &str,
        contents: &[Turn],
        settings: &GenerationConfig,
        cancel: CancellationToken,
    ) -> ProviderResult<FragmentStream> {
        let text = self.generate(model, contents, settings).await?;
        Ok(FragmentStream::from_fragments(vec![text], cancel))
    }
}
