//! Read-only access to the shared state for the UI.

use meshchat_shared::ConversationKey;
use meshchat_store::{ConversationEntry, Node};

use crate::error::Result;
use crate::state::{lock, ConnectionState, SharedState};

/// A cloneable handle exposing reads only. All mutation goes through the
/// router.
#[derive(Clone)]
pub struct ReadHandle {
    state: SharedState,
}

impl ReadHandle {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Make `key` the displayed conversation and return its history.
    pub fn select_conversation(&self, key: &ConversationKey) -> Result<Vec<ConversationEntry>> {
        let mut state = lock(&self.state);
        let entries = state.conversations.log(key)?.to_vec();
        state.selected = Some(key.clone());
        tracing::debug!(conversation = %key, count = entries.len(), "conversation selected");
        Ok(entries)
    }

    pub fn selected(&self) -> Option<ConversationKey> {
        lock(&self.state).selected.clone()
    }

    /// All nodes in first-seen order.
    pub fn nodes(&self) -> Vec<Node> {
        lock(&self.state).directory.list().to_vec()
    }

    pub fn node(&self, node_id: &str) -> Option<Node> {
        lock(&self.state).directory.get(node_id).cloned()
    }

    pub fn local_node(&self) -> Option<Node> {
        lock(&self.state).directory.local().cloned()
    }

    /// Conversations with at least one entry, in first-message order.
    pub fn conversations(&self) -> Result<Vec<ConversationKey>> {
        Ok(lock(&self.state).conversations.conversations()?)
    }

    pub fn connection_state(&self) -> ConnectionState {
        lock(&self.state).connection
    }
}
