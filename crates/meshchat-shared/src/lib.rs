//! Types shared by every meshchat crate: the loosely-typed packet model, the
//! packet classifier, node records and conversation keys.

pub mod classify;
pub mod constants;
pub mod mac;
pub mod node;
pub mod packet;
pub mod types;

pub use classify::{
    classify, ClassifiedMessage, PositionMessage, RoutingMessage, TelemetryMessage, TextMessage,
};
pub use node::{LocalIdentity, NodePatch, RawNodeRecord};
pub use packet::{PortNum, RawPacket};
pub use types::{ConversationKey, Destination};
