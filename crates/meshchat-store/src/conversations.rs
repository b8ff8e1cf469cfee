//! Append-only conversation logs.
//!
//! Direct messages are kept in one log per sender node id, channel messages
//! in one log per channel id. Rows are appended to SQLite as they arrive and
//! a log is read back into memory the first time it is asked for.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use meshchat_shared::ConversationKey;

use crate::database::Database;
use crate::error::Result;
use crate::models::ConversationEntry;
use crate::nodes::parse_timestamp;

const NAMESPACE_DM: &str = "dm";
const NAMESPACE_CHANNEL: &str = "channel";

pub struct ConversationStore {
    db: Database,
    /// Logs already read from the database, keyed by conversation.
    cache: HashMap<ConversationKey, Vec<ConversationEntry>>,
}

impl ConversationStore {
    pub fn open(db: Database) -> Self {
        Self {
            db,
            cache: HashMap::new(),
        }
    }

    /// Append a direct message to the sender's log.
    pub fn record_direct_message(
        &mut self,
        sender_node_id: &str,
        receiver_node_id: &str,
        text: &str,
        received_at: DateTime<Utc>,
    ) -> Result<ConversationEntry> {
        let entry =
            ConversationEntry::direct(sender_node_id, receiver_node_id, text, received_at);
        self.append(entry)
    }

    /// Append a message to a channel's log.
    pub fn record_channel_message(
        &mut self,
        channel_id: &str,
        sender_node_id: &str,
        receiver_node_id: &str,
        text: &str,
        received_at: DateTime<Utc>,
    ) -> Result<ConversationEntry> {
        let entry = ConversationEntry::channel(
            channel_id,
            sender_node_id,
            receiver_node_id,
            text,
            received_at,
        );
        self.append(entry)
    }

    /// Append a prepared entry to the log named by [`ConversationEntry::key`].
    ///
    /// The row is committed before the in-memory log sees it.
    pub fn append(&mut self, entry: ConversationEntry) -> Result<ConversationEntry> {
        let key = entry.key();
        insert_entry(self.db.conn(), &key, &entry)?;

        if let Some(log) = self.cache.get_mut(&key) {
            log.push(entry.clone());
        }
        tracing::debug!(conversation = %key, entry = %entry.id, "entry recorded");
        Ok(entry)
    }

    pub fn get_direct_log(&mut self, node_id: &str) -> Result<&[ConversationEntry]> {
        self.log(&ConversationKey::direct(node_id))
    }

    pub fn get_channel_log(&mut self, channel_id: &str) -> Result<&[ConversationEntry]> {
        self.log(&ConversationKey::channel(channel_id))
    }

    /// Entries of one conversation in arrival order; empty when unknown.
    pub fn log(&mut self, key: &ConversationKey) -> Result<&[ConversationEntry]> {
        if !self.cache.contains_key(key) {
            let entries = load_log(self.db.conn(), key)?;
            tracing::debug!(conversation = %key, count = entries.len(), "conversation loaded");
            self.cache.insert(key.clone(), entries);
        }
        Ok(self.cache.get(key).map(Vec::as_slice).unwrap_or_default())
    }

    /// Every conversation with at least one entry, in first-message order.
    pub fn conversations(&self) -> Result<Vec<ConversationKey>> {
        let mut stmt = self.db.conn().prepare(
            "SELECT namespace, log_key, MIN(seq) AS first_seq
             FROM conversation_entries
             GROUP BY namespace, log_key
             ORDER BY first_seq ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let namespace: String = row.get(0)?;
            let log_key: String = row.get(1)?;
            Ok((namespace, log_key))
        })?;

        let mut keys = Vec::new();
        for row in rows {
            let (namespace, log_key) = row?;
            keys.push(match namespace.as_str() {
                NAMESPACE_CHANNEL => ConversationKey::Channel(log_key),
                _ => ConversationKey::Direct(log_key),
            });
        }
        Ok(keys)
    }

    /// Push everything written so far into the main database file.
    pub fn flush(&self) -> Result<()> {
        if self.db.path().is_some() {
            self.db.checkpoint()?;
        }
        tracing::debug!("conversation store flushed");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    pub(crate) fn db_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    /// Forget every cached log so the next read goes to the database.
    pub(crate) fn invalidate(&mut self) {
        self.cache.clear();
    }
}

// ---------------------------------------------------------------------------
// SQL
// ---------------------------------------------------------------------------

fn namespace(key: &ConversationKey) -> &'static str {
    if key.is_channel() {
        NAMESPACE_CHANNEL
    } else {
        NAMESPACE_DM
    }
}

/// Insert one entry; returns the number of rows written (0 when the id
/// already exists and `or_ignore` is set).
pub(crate) fn insert_entry_with(
    conn: &Connection,
    key: &ConversationKey,
    entry: &ConversationEntry,
    or_ignore: bool,
) -> rusqlite::Result<usize> {
    let verb = if or_ignore { "INSERT OR IGNORE" } else { "INSERT" };
    conn.execute(
        &format!(
            "{verb} INTO conversation_entries
                 (id, namespace, log_key, channel_id, sender_node_id, receiver_node_id,
                  text, received_at, packet_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ),
        params![
            entry.id.to_string(),
            namespace(key),
            key.id(),
            entry.channel_id,
            entry.sender_node_id,
            entry.receiver_node_id,
            entry.text,
            entry.received_at.to_rfc3339(),
            entry.packet_id,
        ],
    )
}

fn insert_entry(conn: &Connection, key: &ConversationKey, entry: &ConversationEntry) -> Result<()> {
    insert_entry_with(conn, key, entry, false)?;
    Ok(())
}

fn load_log(conn: &Connection, key: &ConversationKey) -> Result<Vec<ConversationEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, channel_id, sender_node_id, receiver_node_id, text, received_at, packet_id
         FROM conversation_entries
         WHERE namespace = ?1 AND log_key = ?2
         ORDER BY seq ASC",
    )?;
    let rows = stmt.query_map(params![namespace(key), key.id()], row_to_entry)?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationEntry> {
    let id_str: String = row.get(0)?;
    let received_at: String = row.get(5)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ConversationEntry {
        id,
        channel_id: row.get(1)?,
        sender_node_id: row.get(2)?,
        receiver_node_id: row.get(3)?,
        text: row.get(4)?,
        received_at: parse_timestamp(5, &received_at)?,
        packet_id: row.get(6)?,
    })
}
