//! Conversation orchestration over the store and a chat model

use parley_core::config::{ChatConfig, GenerationConfig};
use parley_core::{Conversation, Database, Message, NewMessage};
use parley_providers::{ChatModel, ModelInfo};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bootstrap::ConversationBootstrap;
use crate::context::ContextBuilder;
use crate::error::{AgentError, AgentResult};
use crate::reply::{ReplyGenerator, ReplySink};

/// A freshly created conversation and its opening exchange
#[derive(Debug, Clone)]
pub struct StartedConversation {
    pub conversation: Conversation,
    /// The stored user message and reply, in that order
    pub messages: Vec<Message>,
}

impl StartedConversation {
    pub fn reply(&self) -> &str {
        self.messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

/// Entry point for everything the shell does with conversations
pub struct ChatService {
    db: Arc<Database>,
    model: Arc<dyn ChatModel>,
    replies: ReplyGenerator,
    bootstrap: ConversationBootstrap,
}

impl ChatService {
    pub fn new(
        db: Arc<Database>,
        model: Arc<dyn ChatModel>,
        chat: &ChatConfig,
        generation: GenerationConfig,
    ) -> Self {
        let context = ContextBuilder::from_config(chat);
        Self {
            replies: ReplyGenerator::new(model.clone(), context.clone(), generation.clone()),
            bootstrap: ConversationBootstrap::new(model.clone(), context, generation),
            db,
            model,
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Models that can serve chat requests
    pub async fn list_models(&self) -> AgentResult<Vec<ModelInfo>> {
        let models = self.model.list_models().await?;
        Ok(models
            .into_iter()
            .filter(ModelInfo::supports_generation)
            .collect())
    }

    /// Bootstrap a conversation from its first message.
    ///
    /// The conversation and its first exchange are stored together, only
    /// after the title and reply have been parsed.
    pub async fn start_conversation(
        &self,
        model_id: &str,
        initial: &str,
    ) -> AgentResult<StartedConversation> {
        let opening = self.bootstrap.start(model_id, initial).await?;

        let (conversation, messages) = self.db.create_conversation_with_exchange(
            &opening.title,
            model_id,
            NewMessage::user(initial),
            NewMessage::assistant(opening.reply),
        )?;

        info!(
            "Started conversation {} ({}) with {}",
            conversation.id, conversation.title, model_id
        );
        Ok(StartedConversation {
            conversation,
            messages,
        })
    }

    /// Send `text` in an existing conversation and store the exchange.
    ///
    /// Returns the stored user message and reply. Nothing is stored when
    /// generation fails or is cancelled.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
        sink: &mut dyn ReplySink,
        cancel: CancellationToken,
    ) -> AgentResult<Vec<Message>> {
        let conversation = self.require_conversation(conversation_id)?;

        let mut messages = self.db.messages_for_conversation(conversation_id)?;
        messages.push(Message::draft(conversation_id, NewMessage::user(text)));

        let reply = self
            .replies
            .generate_reply(&conversation.model, &messages, sink, cancel)
            .await?;

        let stored = self.db.record_exchange(
            conversation_id,
            NewMessage::user(text),
            NewMessage::assistant(reply),
        )?;
        debug!("Recorded exchange in conversation {}", conversation_id);
        Ok(stored)
    }

    /// All conversations, most recently updated first
    pub fn conversations(&self) -> AgentResult<Vec<Conversation>> {
        Ok(self.db.list_conversations()?)
    }

    pub fn conversation(&self, id: &str) -> AgentResult<Option<Conversation>> {
        Ok(self.db.get_conversation(id)?)
    }

    /// Messages of a conversation in creation order
    pub fn messages(&self, conversation_id: &str) -> AgentResult<Vec<Message>> {
        self.require_conversation(conversation_id)?;
        Ok(self.db.messages_for_conversation(conversation_id)?)
    }

    /// Delete a conversation with its messages. Returns `false` if it did not exist.
    pub fn delete_conversation(&self, id: &str) -> AgentResult<bool> {
        let deleted = self.db.delete_conversation(id)?;
        if deleted {
            info!("Deleted conversation {}", id);
        }
        Ok(deleted)
    }

    fn require_conversation(&self, id: &str) -> AgentResult<Conversation> {
        self.db
            .get_conversation(id)?
            .ok_or_else(|| AgentError::ConversationNotFound(id.to_string()))
    }
}
