//! Conversation and message records

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Author of a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored role is neither `user` nor `assistant`
#[derive(Debug, Error)]
#[error("unknown message role: {0}")]
pub struct ParseRoleError(pub String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

/// A titled, model-bound conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    /// Stable model identifier, e.g. `gemini-1.5-flash`
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    /// Text shown to the user
    pub content: String,
    /// Text sent to the model
    pub raw_content: String,
    pub thinking: Option<String>,
    /// Seconds spent producing `thinking`
    pub thinking_time: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build an unsaved message, used for the user turn awaiting a reply
    pub fn draft(conversation_id: impl Into<String>, new: NewMessage) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            role: new.role,
            content: new.content,
            raw_content: new.raw_content,
            thinking: new.thinking,
            thinking_time: new.thinking_time,
            created_at: now(),
        }
    }
}

/// Fields supplied by callers when appending a message
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub raw_content: String,
    pub thinking: Option<String>,
    pub thinking_time: Option<f64>,
}

impl NewMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            role,
            raw_content: content.clone(),
            content,
            thinking: None,
            thinking_time: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Attach a reasoning trace and the time spent on it
    pub fn with_thinking(mut self, thinking: impl Into<String>, seconds: f64) -> Self {
        self.thinking = Some(thinking.into());
        self.thinking_time = Some(seconds);
        self
    }
}

/// Current time at the precision the store keeps
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}
