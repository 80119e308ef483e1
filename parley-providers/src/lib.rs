//! Generative model clients for parley
//!
//! This crate defines the [`ChatModel`] abstraction used by the agent layer
//! and its Gemini implementation.

pub mod base;
pub mod gemini;
pub mod stream;

pub use base::{ChatModel, ModelInfo, ProviderError, ProviderResult, Turn, TurnRole};
pub use gemini::GeminiClient;
pub use stream::FragmentStream;
