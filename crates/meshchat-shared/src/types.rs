use serde::{Deserialize, Serialize};

use crate::constants::BROADCAST_NODE_ID;

/// Which conversation log an entry belongs to.
///
/// Direct logs are keyed by the *sender's* node id, channel logs by the
/// channel id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ConversationKey {
    Direct(String),
    Channel(String),
}

impl ConversationKey {
    pub fn direct(node_id: impl Into<String>) -> Self {
        Self::Direct(node_id.into())
    }

    pub fn channel(channel_id: impl Into<String>) -> Self {
        Self::Channel(channel_id.into())
    }

    /// The node id or channel id this key points at.
    pub fn id(&self) -> &str {
        match self {
            Self::Direct(id) | Self::Channel(id) => id,
        }
    }

    pub fn is_channel(&self) -> bool {
        matches!(self, Self::Channel(_))
    }

    /// Where an outbound message for this conversation should be sent.
    pub fn destination(&self) -> Destination {
        match self {
            Self::Direct(id) if id == BROADCAST_NODE_ID => Destination::Broadcast,
            Self::Direct(id) => Destination::Node(id.clone()),
            Self::Channel(id) => Destination::Channel(id.clone()),
        }
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct(id) => write!(f, "dm:{id}"),
            Self::Channel(id) => write!(f, "channel:{id}"),
        }
    }
}

/// Target of an outbound text, as understood by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    /// A single node, by stable node id.
    Node(String),
    /// Every node on the primary channel.
    Broadcast,
    /// A channel, by channel id (the radio's channel index).
    Channel(String),
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(id) => write!(f, "{id}"),
            Self::Broadcast => write!(f, "{BROADCAST_NODE_ID}"),
            Self::Channel(id) => write!(f, "channel {id}"),
        }
    }
}
