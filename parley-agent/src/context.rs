//! Context builder for assembling model history from stored messages

use parley_core::config::ChatConfig;
use parley_core::{Message, Role};
use parley_providers::{Turn, TurnRole};

use crate::error::{AgentError, AgentResult};

/// History plus the live user turn, ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub history: Vec<Turn>,
    pub live: Turn,
}

impl ChatRequest {
    /// All turns in send order
    pub fn contents(&self) -> Vec<Turn> {
        let mut contents = Vec::with_capacity(self.history.len() + 1);
        contents.extend(self.history.iter().cloned());
        contents.push(self.live.clone());
        contents
    }
}

/// Builds the context for model requests
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    system_prompt: String,
    acknowledgement: String,
}

impl ContextBuilder {
    pub fn new(system_prompt: impl Into<String>, acknowledgement: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            acknowledgement: acknowledgement.into(),
        }
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(config.system_prompt.clone(), config.acknowledgement.clone())
    }

    /// The instruction turn and the model's acknowledgement
    pub fn priming_pair(&self) -> [Turn; 2] {
        [
            Turn::user(self.system_prompt.clone()),
            Turn::model(self.acknowledgement.clone()),
        ]
    }

    /// Priming pair followed by one turn per stored message
    pub fn build_history(&self, prior: &[Message]) -> Vec<Turn> {
        let mut history = Vec::with_capacity(prior.len() + 2);
        history.extend(self.priming_pair());
        history.extend(prior.iter().map(turn_from_message));
        history
    }

    /// Split `messages` into seeded history and the live user turn.
    pub fn build_request(&self, messages: &[Message]) -> AgentResult<ChatRequest> {
        let (last, prior) = messages.split_last().ok_or(AgentError::EmptyHistory)?;
        if last.role != Role::User {
            return Err(AgentError::NoPendingUserMessage);
        }

        Ok(ChatRequest {
            history: self.build_history(prior),
            live: turn_from_message(last),
        })
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::from_config(&ChatConfig::default())
    }
}

fn turn_role(role: Role) -> TurnRole {
    match role {
        Role::User => TurnRole::User,
        Role::Assistant => TurnRole::Model,
    }
}

fn turn_from_message(message: &Message) -> Turn {
    Turn {
        role: turn_role(message.role),
        text: message.raw_content.clone(),
    }
}
