//! Opening exchange of a new conversation
//!
//! The first message is sent with a prompt asking the model for a short title
//! and a reply in one response, separated by [`DELIMITER`].

use once_cell::sync::Lazy;
use parley_core::config::GenerationConfig;
use parley_providers::{ChatModel, Turn};
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::ContextBuilder;
use crate::error::{AgentError, AgentResult};
use crate::reply::{clean_reply, label_pattern};

pub const DELIMITER: &str = "---";

static TITLE_LABEL: Lazy<Regex> = Lazy::new(|| label_pattern("TITLE"));

/// Title and first reply parsed from the bootstrap response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReply {
    pub title: String,
    pub reply: String,
}

/// Prompt sent in place of the user's first message
pub fn bootstrap_prompt(initial: &str) -> String {
    format!(
        "You are a helpful chatbot. I will provide an initial message. \
         Respond with two parts, separated by \"{DELIMITER}\":\n\
         1. TITLE: A concise title (maximum 5 words) summarizing the topic of the conversation.\n\
         2. REPLY: A response to my initial message.\n\n\
         Initial message: {initial}"
    )
}

/// Remove a `TITLE:` label and markdown dressing such as `**1. Foo**`
pub fn clean_title(raw: &str) -> String {
    let stripped = TITLE_LABEL.replace(raw.trim(), "");
    let mut title = stripped.trim().trim_matches(|c| c == '*' || c == '_' || c == '#').trim();

    // Numbering left over when the label itself was absent, e.g. "1. Foo"
    if let Some((number, rest)) = title.split_once(". ") {
        if !number.is_empty() && number.chars().all(|c| c.is_ascii_digit()) {
            title = rest.trim();
        }
    }

    title
        .trim_matches(|c| c == '*' || c == '_' || c == '"')
        .trim()
        .to_string()
}

/// Split a `TITLE---REPLY` response on the first delimiter.
pub fn parse_bootstrap_response(text: &str) -> AgentResult<BootstrapReply> {
    let (raw_title, raw_reply) = text.split_once(DELIMITER).ok_or_else(|| {
        AgentError::Parse(format!(
            "expected a title and reply separated by \"{DELIMITER}\""
        ))
    })?;

    let title = clean_title(raw_title);
    if title.is_empty() {
        return Err(AgentError::Parse("response has an empty title".to_string()));
    }

    let reply = clean_reply(raw_reply);
    if reply.is_empty() {
        return Err(AgentError::Parse("response has an empty reply".to_string()));
    }

    Ok(BootstrapReply { title, reply })
}

/// Sends the opening prompt and parses the title and reply out of the response
#[derive(Clone)]
pub struct ConversationBootstrap {
    model: Arc<dyn ChatModel>,
    context: ContextBuilder,
    settings: GenerationConfig,
}

impl ConversationBootstrap {
    pub fn new(model: Arc<dyn ChatModel>, context: ContextBuilder, settings: GenerationConfig) -> Self {
        Self {
            model,
            context,
            settings,
        }
    }

    /// Ask `model_id` for a title and reply to `initial`. Persists nothing.
    pub async fn start(&self, model_id: &str, initial: &str) -> AgentResult<BootstrapReply> {
        let mut contents: Vec<Turn> = self.context.priming_pair().into();
        contents.push(Turn::user(bootstrap_prompt(initial)));

        debug!("Bootstrapping conversation with {}", model_id);
        let response = self
            .model
            .generate(model_id, &contents, &self.settings)
            .await?;

        parse_bootstrap_response(&response).map_err(|e| {
            warn!("Unparseable bootstrap response: {}", e);
            e
        })
    }
}
