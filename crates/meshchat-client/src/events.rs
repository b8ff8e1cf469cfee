//! Messages exchanged between the router and the UI.

use serde::Serialize;
use tokio::sync::mpsc;

use meshchat_shared::ConversationKey;
use meshchat_store::{ConversationEntry, Node};

use crate::format::status_line;
use crate::state::ConnectionState;

pub const UI_CHANNEL_CAPACITY: usize = 256;

/// Events sent *from* the router to the UI.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum UiEvent {
    /// A text was stored, inbound or outbound.
    TextMessage {
        entry: ConversationEntry,
        key: ConversationKey,
        /// The UI is currently showing `key`.
        is_for_selected: bool,
        rendered: String,
    },
    /// Full directory listing in first-seen order.
    NodeListChanged(Vec<Node>),
    Notice(Notice),
    StateChanged(ConnectionState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A status line for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    /// Whether the UI may hide it without user action being required.
    pub dismissible: bool,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
            dismissible: true,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
            dismissible: true,
        }
    }

    /// A fatal problem; stays on screen.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
            dismissible: false,
        }
    }

    /// The message with the status time prefix.
    pub fn line(&self) -> String {
        status_line(&self.message)
    }
}

/// Commands sent *into* the router by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    /// Send `body` to the conversation `target`.
    SubmitText {
        body: String,
        target: ConversationKey,
    },
    Quit,
}

/// Send an event to the UI, logging when nobody is listening.
pub async fn emit_event(tx: &mpsc::Sender<UiEvent>, event: UiEvent) {
    if let Err(e) = tx.send(event).await {
        tracing::debug!(event = ?e.0, "UI event dropped, receiver closed");
    }
}
