//! Loosely-typed radio packets as delivered by the transport.
//!
//! The radio driver hands over already-decoded packets as nested mappings.
//! [`RawPacket`] keeps that mapping intact and exposes every field through an
//! accessor that returns `None` when the field (or any key on the way to it)
//! is missing or has an unexpected type. Nothing here panics on partial input.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{
    BROADCAST_NODE_ID, BROADCAST_NODE_NUM, PORT_ADMIN, PORT_POSITION, PORT_ROUTING,
    PORT_TELEMETRY, PORT_TEXT_MESSAGE,
};

/// Application tag of a decoded packet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PortNum {
    TextMessage,
    Telemetry,
    Admin,
    Routing,
    Position,
    /// Anything else, including an empty or missing tag.
    Unrecognized(Option<String>),
}

impl PortNum {
    /// Parse the `portnum` field.
    ///
    /// The firmware's Python bindings emit the enum name (`"TEXT_MESSAGE_APP"`);
    /// raw protobuf dumps carry the number instead. Both are accepted.
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(tag)) => Self::from_tag(tag),
            Some(Value::Number(n)) => match n.as_u64() {
                Some(1) => Self::TextMessage,
                Some(3) => Self::Position,
                Some(5) => Self::Routing,
                Some(6) => Self::Admin,
                Some(67) => Self::Telemetry,
                _ => Self::Unrecognized(Some(n.to_string())),
            },
            _ => Self::Unrecognized(None),
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            PORT_TEXT_MESSAGE => Self::TextMessage,
            PORT_TELEMETRY => Self::Telemetry,
            PORT_ADMIN => Self::Admin,
            PORT_ROUTING => Self::Routing,
            PORT_POSITION => Self::Position,
            "" => Self::Unrecognized(None),
            other => Self::Unrecognized(Some(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::TextMessage => PORT_TEXT_MESSAGE,
            Self::Telemetry => PORT_TELEMETRY,
            Self::Admin => PORT_ADMIN,
            Self::Routing => PORT_ROUTING,
            Self::Position => PORT_POSITION,
            Self::Unrecognized(Some(tag)) => tag,
            Self::Unrecognized(None) => "",
        }
    }
}

/// A decoded radio packet, kept as the mapping the transport produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawPacket(Value);

impl RawPacket {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json).map(Self)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Walk nested keys from the packet root.
    pub fn path(&self, keys: &[&str]) -> Option<&Value> {
        lookup(&self.0, keys)
    }

    /// Walk nested keys below `decoded`.
    pub fn decoded(&self, keys: &[&str]) -> Option<&Value> {
        self.0.get("decoded").and_then(|d| lookup(d, keys))
    }

    pub fn portnum(&self) -> PortNum {
        PortNum::from_value(self.decoded(&["portnum"]))
    }

    /// Radio message id (`id`).
    pub fn id(&self) -> Option<u32> {
        self.path(&["id"]).and_then(as_u32)
    }

    pub fn from_num(&self) -> Option<u32> {
        self.path(&["from"]).and_then(as_u32)
    }

    pub fn to_num(&self) -> Option<u32> {
        self.path(&["to"]).and_then(as_u32)
    }

    pub fn from_id(&self) -> Option<&str> {
        self.path(&["fromId"]).and_then(Value::as_str)
    }

    pub fn to_id(&self) -> Option<&str> {
        self.path(&["toId"]).and_then(Value::as_str)
    }

    pub fn channel(&self) -> Option<u32> {
        self.path(&["channel"]).and_then(as_u32)
    }

    /// Receive time in Unix seconds.
    pub fn rx_time(&self) -> Option<i64> {
        self.path(&["rxTime"]).and_then(Value::as_i64)
    }

    pub fn rx_snr(&self) -> Option<f64> {
        self.path(&["rxSnr"]).and_then(Value::as_f64)
    }

    pub fn rx_rssi(&self) -> Option<i32> {
        self.path(&["rxRssi"]).and_then(as_i32)
    }

    pub fn hop_limit(&self) -> Option<u32> {
        self.path(&["hopLimit"]).and_then(as_u32)
    }

    /// Priority as the driver reports it (`"RELIABLE"`, or a bare number).
    pub fn priority(&self) -> Option<String> {
        self.path(&["priority"]).and_then(scalar_to_string)
    }

    /// Text body of a `TEXT_MESSAGE_APP` packet.
    pub fn text(&self) -> Option<&str> {
        self.decoded(&["text"]).and_then(Value::as_str)
    }

    /// Whether the packet was addressed to every node.
    pub fn is_broadcast(&self) -> bool {
        self.to_id() == Some(BROADCAST_NODE_ID) || self.to_num() == Some(BROADCAST_NODE_NUM)
    }
}

impl From<Value> for RawPacket {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

pub(crate) fn lookup<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .try_fold(root, |value, key| value.get(*key))
        .filter(|value| !value.is_null())
}

pub(crate) fn as_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|n| u32::try_from(n).ok())
}

pub(crate) fn as_i32(value: &Value) -> Option<i32> {
    value.as_i64().and_then(|n| i32::try_from(n).ok())
}

pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
