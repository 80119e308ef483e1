//! Error type for conversation operations

use parley_providers::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Conversation has no messages to send")]
    EmptyHistory,

    #[error("Last message in the conversation is not from the user")]
    NoPendingUserMessage,

    #[error("Could not parse model response: {0}")]
    Parse(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Storage(#[from] parley_core::Error),
}

impl AgentError {
    /// Whether the failure came from a user abort rather than a fault
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Provider(ProviderError::Cancelled))
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
