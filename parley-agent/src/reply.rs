//! Streamed reply generation

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use once_cell::sync::Lazy;
use parley_core::config::GenerationConfig;
use parley_core::Message;
use parley_providers::{ChatModel, ProviderError, ProviderResult};
use regex::Regex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::ContextBuilder;
use crate::error::AgentResult;

/// Receives reply fragments as they arrive
#[async_trait]
pub trait ReplySink: Send {
    async fn fragment(&mut self, text: &str);
}

/// Sink that drops every fragment
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl ReplySink for NullSink {
    async fn fragment(&mut self, _text: &str) {}
}

/// Collects fragments into a `Vec`, mostly for tests and non-interactive callers
#[async_trait]
impl ReplySink for Vec<String> {
    async fn fragment(&mut self, text: &str) {
        self.push(text.to_string());
    }
}

/// Matches a leading section label such as `REPLY:`, `**2. Reply:**` or `__TITLE__:`
pub(crate) fn label_pattern(label: &str) -> Regex {
    let pattern = format!(
        r"(?i)^\s*[*_]*\s*(?:\d+\.\s*)?[*_]*\s*{}\s*[*_]*\s*:\s*[*_]*\s*",
        regex::escape(label)
    );
    Regex::new(&pattern).expect("label pattern is a valid regex")
}

static REPLY_LABEL: Lazy<Regex> = Lazy::new(|| label_pattern("REPLY"));

/// Trim whitespace and a leading `REPLY:` label
pub fn clean_reply(text: &str) -> String {
    REPLY_LABEL.replace(text.trim(), "").trim().to_string()
}

/// Drain `stream` in order, echoing each fragment to `sink`.
///
/// Stops at the first error. A stream that ends without any fragment is
/// reported as `EmptyCandidates`.
pub async fn collect_fragments<S>(mut stream: S, sink: &mut dyn ReplySink) -> ProviderResult<String>
where
    S: Stream<Item = ProviderResult<String>> + Unpin,
{
    let mut reply = String::new();
    let mut received = 0usize;

    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        sink.fragment(&fragment).await;
        reply.push_str(&fragment);
        received += 1;
    }

    if received == 0 {
        return Err(ProviderError::EmptyCandidates { block_reason: None });
    }

    debug!("Collected {} fragments ({} chars)", received, reply.len());
    Ok(reply)
}

/// Produces the model's reply to the last user message of a conversation
#[derive(Clone)]
pub struct ReplyGenerator {
    model: Arc<dyn ChatModel>,
    context: ContextBuilder,
    settings: GenerationConfig,
}

impl ReplyGenerator {
    pub fn new(model: Arc<dyn ChatModel>, context: ContextBuilder, settings: GenerationConfig) -> Self {
        Self {
            model,
            context,
            settings,
        }
    }

    /// Stream a reply to `messages`, whose last entry must be the user's.
    ///
    /// Returns the cleaned reply. Nothing partial is returned on failure or
    /// cancellation.
    pub async fn generate_reply(
        &self,
        model_id: &str,
        messages: &[Message],
        sink: &mut dyn ReplySink,
        cancel: CancellationToken,
    ) -> AgentResult<String> {
        let request = self.context.build_request(messages)?;
        let contents = request.contents();

        debug!(
            "Generating reply with {} for {} turns",
            model_id,
            contents.len()
        );

        let stream = self
            .model
            .stream_generate(model_id, &contents, &self.settings, cancel)
            .await?;
        let reply = collect_fragments(stream, sink).await?;

        Ok(clean_reply(&reply))
    }
}
