//! State shared between the event router and the UI.
//!
//! [`AppState`] is wrapped in `Arc<Mutex<>>`. The router is the only writer;
//! the UI reads through [`ReadHandle`](crate::handle::ReadHandle).

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use meshchat_shared::ConversationKey;
use meshchat_store::{ConversationStore, NodeDirectory};

/// Lifecycle of the radio link as seen by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    /// Waiting for the device to appear and the handshake to finish.
    Connecting,
    Connected,
    /// Terminal.
    ShuttingDown,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ShuttingDown => "shutting down",
        };
        f.write_str(label)
    }
}

/// Why the router stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterExit {
    /// The user quit.
    Quit,
    /// The radio device never appeared.
    RadioNotFound,
    /// The link dropped and reconnecting is disabled.
    RadioDisconnected,
}

impl RouterExit {
    /// Process exit status.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Quit => 0,
            Self::RadioNotFound => 2,
            Self::RadioDisconnected => 3,
        }
    }
}

pub struct AppState {
    pub directory: NodeDirectory,
    pub conversations: ConversationStore,
    /// Conversation currently shown by the UI.
    pub selected: Option<ConversationKey>,
    pub connection: ConnectionState,
}

impl AppState {
    pub fn new(directory: NodeDirectory, conversations: ConversationStore) -> Self {
        Self {
            directory,
            conversations,
            selected: None,
            connection: ConnectionState::Disconnected,
        }
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }
}

pub type SharedState = Arc<Mutex<AppState>>;

/// Lock the shared state, recovering from a poisoned mutex.
pub(crate) fn lock(state: &SharedState) -> MutexGuard<'_, AppState> {
    state.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("App state lock poisoned, recovering");
        poisoned.into_inner()
    })
}
