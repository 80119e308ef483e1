//! Conversation logic for parley
//!
//! This crate adapts stored conversations into model history, drives reply
//! generation and bootstraps new conversations.

pub mod bootstrap;
pub mod context;
pub mod error;
pub mod reply;
pub mod service;

pub use bootstrap::{BootstrapReply, ConversationBootstrap};
pub use context::{ChatRequest, ContextBuilder};
pub use error::{AgentError, AgentResult};
pub use reply::{NullSink, ReplyGenerator, ReplySink};
pub use service::{ChatService, StartedConversation};
