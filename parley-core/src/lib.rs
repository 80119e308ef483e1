//! Core types and storage for parley
//!
//! This crate provides the error type, configuration, logging setup and the
//! SQLite-backed conversation store shared by the other parley crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod store;
pub mod utils;

pub use error::{Error, Result};
pub use store::{Conversation, Database, Message, NewMessage, Role};
