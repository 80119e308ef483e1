use super::models::{format_timestamp, now, parse_timestamp};
use super::{Conversation, Database, Message, NewMessage, Role};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

impl Database {
    // -- Conversations --

    pub fn create_conversation(&self, title: &str, model: &str) -> Result<Conversation> {
        self.with_conn(|conn| insert_conversation(conn, title, model))
    }

    /// Returns `None` when no conversation has this id
    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    /// All conversations, most recently updated first
    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.with_conn(query_conversations)
    }

    /// Bump `updated_at` to now
    pub fn touch_conversation(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| touch_conversation(conn, id))
    }

    /// Remove a conversation and all of its messages. Returns whether it existed.
    pub fn delete_conversation(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed_messages =
                tx.execute("DELETE FROM messages WHERE conversation_id = ?1", [id])?;
            let removed = tx.execute("DELETE FROM conversations WHERE id = ?1", [id])?;
            tx.commit()?;

            debug!(
                conversation_id = id,
                removed_messages, "Deleted conversation"
            );
            Ok(removed > 0)
        })
    }

    // -- Messages --

    pub fn add_message(&self, conversation_id: &str, message: NewMessage) -> Result<Message> {
        self.with_conn(|conn| {
            ensure_conversation(conn, conversation_id)?;
            insert_message(conn, conversation_id, message)
        })
    }

    /// Messages of a conversation in creation order
    pub fn messages_for_conversation(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.with_conn(|conn| query_messages(conn, conversation_id))
    }

    // -- Exchanges --

    /// Create a conversation together with its opening exchange, atomically
    pub fn create_conversation_with_exchange(
        &self,
        title: &str,
        model: &str,
        user: NewMessage,
        reply: NewMessage,
    ) -> Result<(Conversation, Vec<Message>)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let conversation = insert_conversation(&tx, title, model)?;
            let messages = vec![
                insert_message(&tx, &conversation.id, user)?,
                insert_message(&tx, &conversation.id, reply)?,
            ];
            tx.commit()?;
            Ok((conversation, messages))
        })
    }

    /// Append a user message and its reply, bumping `updated_at`, atomically
    pub fn record_exchange(
        &self,
        conversation_id: &str,
        user: NewMessage,
        reply: NewMessage,
    ) -> Result<Vec<Message>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            ensure_conversation(&tx, conversation_id)?;
            let messages = vec![
                insert_message(&tx, conversation_id, user)?,
                insert_message(&tx, conversation_id, reply)?,
            ];
            touch_conversation(&tx, conversation_id)?;
            tx.commit()?;
            Ok(messages)
        })
    }
}

fn insert_conversation(conn: &Connection, title: &str, model: &str) -> Result<Conversation> {
    let ts = now();
    let conversation = Conversation {
        id: uuid::Uuid::new_v4().to_string(),
        title: title.to_string(),
        model: model.to_string(),
        created_at: ts,
        updated_at: ts,
    };

    conn.execute(
        "INSERT INTO conversations (id, title, model, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            conversation.id,
            conversation.title,
            conversation.model,
            format_timestamp(&conversation.created_at),
            format_timestamp(&conversation.updated_at),
        ],
    )?;
    Ok(conversation)
}

fn ensure_conversation(conn: &Connection, id: &str) -> Result<()> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM conversations WHERE id = ?1", [id], |row| {
            row.get(0)
        })
        .optional()?;
    match exists {
        Some(_) => Ok(()),
        None => Err(Error::NotFound(format!("conversation {}", id))),
    }
}

fn touch_conversation(conn: &Connection, id: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
        params![format_timestamp(&now()), id],
    )?;
    if updated == 0 {
        return Err(Error::NotFound(format!("conversation {}", id)));
    }
    Ok(())
}

/// Creation time for the next message: now, or one microsecond past the
/// newest message when the clock has not moved on.
fn next_message_timestamp(conn: &Connection, conversation_id: &str) -> Result<DateTime<Utc>> {
    let latest: Option<String> = conn.query_row(
        "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
        [conversation_id],
        |row| row.get(0),
    )?;

    let ts = now();
    let Some(latest) = latest else {
        return Ok(ts);
    };
    let latest = parse_timestamp(&latest)
        .map_err(|e| Error::Storage(format!("corrupt message timestamp {}: {}", latest, e)))?;

    if ts > latest {
        Ok(ts)
    } else {
        Ok(latest + Duration::microseconds(1))
    }
}

fn insert_message(conn: &Connection, conversation_id: &str, new: NewMessage) -> Result<Message> {
    let created_at = next_message_timestamp(conn, conversation_id)?;
    let message = Message {
        id: uuid::Uuid::new_v4().to_string(),
        conversation_id: conversation_id.to_string(),
        role: new.role,
        content: new.content,
        raw_content: new.raw_content,
        thinking: new.thinking,
        thinking_time: new.thinking_time,
        created_at,
    };

    conn.execute(
        "INSERT INTO messages (id, conversation_id, role, content, raw_content, thinking, thinking_time, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            message.id,
            message.conversation_id,
            message.role.as_str(),
            message.content,
            message.raw_content,
            message.thinking,
            message.thinking_time,
            format_timestamp(&message.created_at),
        ],
    )?;
    Ok(message)
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        model: row.get(2)?,
        created_at: timestamp_column(row, 3)?,
        updated_at: timestamp_column(row, 4)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    let role = role
        .parse::<Role>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role,
        content: row.get(3)?,
        raw_content: row.get(4)?,
        thinking: row.get(5)?,
        thinking_time: row.get(6)?,
        created_at: timestamp_column(row, 7)?,
    })
}

fn query_conversation(conn: &Connection, id: &str) -> Result<Option<Conversation>> {
    let conversation = conn
        .query_row(
            "SELECT id, title, model, created_at, updated_at FROM conversations WHERE id = ?1",
            [id],
            conversation_from_row,
        )
        .optional()?;
    Ok(conversation)
}

fn query_conversations(conn: &Connection) -> Result<Vec<Conversation>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, model, created_at, updated_at FROM conversations
         ORDER BY updated_at DESC, rowid DESC",
    )?;
    let rows = stmt
        .query_map([], conversation_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn query_messages(conn: &Connection, conversation_id: &str) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, role, content, raw_content, thinking, thinking_time, created_at
         FROM messages WHERE conversation_id = ?1
         ORDER BY created_at ASC, rowid ASC",
    )?;
    let rows = stmt
        .query_map([conversation_id], message_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
