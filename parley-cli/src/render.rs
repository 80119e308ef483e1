//! Terminal output for conversations and streamed replies

use async_trait::async_trait;
use chrono::Local;
use parley_agent::ReplySink;
use parley_core::utils::{single_line, truncate};
use parley_core::{Conversation, Message, Role};
use parley_providers::ModelInfo;
use std::io::{self, Write};
use std::time::Duration;

const TITLE_WIDTH: usize = 48;

/// Echoes reply fragments to a writer, optionally one character at a time
pub struct TerminalSink<W: Write + Send = io::Stdout> {
    out: W,
    delay: Duration,
}

impl TerminalSink {
    pub fn stdout(delay_ms: u64) -> Self {
        Self::new(io::stdout(), Duration::from_millis(delay_ms))
    }
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W, delay: Duration) -> Self {
        Self { out, delay }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W: Write + Send> ReplySink for TerminalSink<W> {
    async fn fragment(&mut self, text: &str) {
        if self.delay.is_zero() {
            let _ = self.out.write_all(text.as_bytes());
            let _ = self.out.flush();
            return;
        }

        let mut buf = [0u8; 4];
        for ch in text.chars() {
            let _ = self.out.write_all(ch.encode_utf8(&mut buf).as_bytes());
            let _ = self.out.flush();
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// `[HH:MM:SS] role: content`
pub fn message_line(message: &Message) -> String {
    format!(
        "[{}] {}: {}",
        message.created_at.with_timezone(&Local).format("%H:%M:%S"),
        message.role,
        message.content
    )
}

/// `You: ...` or `Agent: ...`
pub fn transcript_line(message: &Message) -> String {
    let speaker = match message.role {
        Role::User => "You",
        Role::Assistant => "Agent",
    };
    format!("{}: {}", speaker, message.content)
}

/// One-line summary used in pickers and listings
pub fn conversation_label(conversation: &Conversation) -> String {
    format!(
        "{}  [{}, {}]",
        truncate(&single_line(&conversation.title), TITLE_WIDTH),
        conversation.model,
        conversation
            .updated_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M")
    )
}

pub fn model_label(model: &ModelInfo) -> String {
    if model.label() == model.id {
        model.id.clone()
    } else {
        format!("{} ({})", model.label(), model.id)
    }
}
