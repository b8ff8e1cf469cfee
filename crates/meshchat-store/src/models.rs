//! Domain model structs persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer or written into a snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use meshchat_shared::{ConversationKey, NodePatch};

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// One physically distinct radio seen on the mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Database row id; increases in first-seen order.
    pub row_id: i64,
    /// Stable id assigned by the firmware (`"!abc123"`). `None` while the
    /// node is only known by MAC.
    pub node_id: Option<String>,
    pub mac_address: Option<String>,
    /// Numeric radio id, may change across sessions.
    pub node_num: Option<u32>,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub hw_model: Option<String>,
    pub role: Option<String>,
    pub snr: Option<f64>,
    pub last_heard: Option<DateTime<Utc>>,
    pub battery_level: Option<u32>,
    pub voltage: Option<f64>,
    pub channel_utilization: Option<f64>,
    pub air_util_tx: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<i32>,
    /// Whether this is the radio attached to this client.
    pub is_local_radio: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Node {
    /// A fresh record with only its identity set.
    pub(crate) fn new(
        node_id: Option<String>,
        mac_address: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            row_id: 0,
            node_id,
            mac_address,
            node_num: None,
            long_name: None,
            short_name: None,
            hw_model: None,
            role: None,
            snr: None,
            last_heard: None,
            battery_level: None,
            voltage: None,
            channel_utilization: None,
            air_util_tx: None,
            latitude: None,
            longitude: None,
            altitude: None,
            is_local_radio: false,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Overwrite every field the patch carries; leave the rest untouched.
    pub fn merge(&mut self, patch: &NodePatch) {
        fn set<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if let Some(v) = value {
                *slot = Some(v.clone());
            }
        }

        set(&mut self.node_num, &patch.node_num);
        set(&mut self.long_name, &patch.long_name);
        set(&mut self.short_name, &patch.short_name);
        set(&mut self.hw_model, &patch.hw_model);
        set(&mut self.role, &patch.role);
        set(&mut self.snr, &patch.snr);
        set(&mut self.last_heard, &patch.last_heard);
        set(&mut self.battery_level, &patch.battery_level);
        set(&mut self.voltage, &patch.voltage);
        set(&mut self.channel_utilization, &patch.channel_utilization);
        set(&mut self.air_util_tx, &patch.air_util_tx);
        set(&mut self.latitude, &patch.latitude);
        set(&mut self.longitude, &patch.longitude);
        set(&mut self.altitude, &patch.altitude);
    }

    /// Fold a second record for the same radio into this one.
    ///
    /// Fields set on the more recently seen record win. The merged record
    /// keeps the earlier `first_seen`.
    pub(crate) fn absorb(&mut self, other: &Node) {
        fn pick<T: Clone>(slot: &mut Option<T>, value: &Option<T>, prefer: bool) {
            if value.is_some() && (prefer || slot.is_none()) {
                *slot = value.clone();
            }
        }

        let newer = other.last_seen > self.last_seen;
        pick(&mut self.node_id, &other.node_id, newer);
        pick(&mut self.mac_address, &other.mac_address, newer);
        pick(&mut self.node_num, &other.node_num, newer);
        pick(&mut self.long_name, &other.long_name, newer);
        pick(&mut self.short_name, &other.short_name, newer);
        pick(&mut self.hw_model, &other.hw_model, newer);
        pick(&mut self.role, &other.role, newer);
        pick(&mut self.snr, &other.snr, newer);
        pick(&mut self.last_heard, &other.last_heard, newer);
        pick(&mut self.battery_level, &other.battery_level, newer);
        pick(&mut self.voltage, &other.voltage, newer);
        pick(&mut self.channel_utilization, &other.channel_utilization, newer);
        pick(&mut self.air_util_tx, &other.air_util_tx, newer);
        pick(&mut self.latitude, &other.latitude, newer);
        pick(&mut self.longitude, &other.longitude, newer);
        pick(&mut self.altitude, &other.altitude, newer);

        self.is_local_radio |= other.is_local_radio;
        self.first_seen = self.first_seen.min(other.first_seen);
        self.last_seen = self.last_seen.max(other.last_seen);
    }

    /// Best human-readable label for the sidebar.
    pub fn display_name(&self) -> &str {
        self.long_name
            .as_deref()
            .or(self.short_name.as_deref())
            .or(self.node_id.as_deref())
            .or(self.mac_address.as_deref())
            .unwrap_or("unknown")
    }
}

// ---------------------------------------------------------------------------
// ConversationEntry
// ---------------------------------------------------------------------------

/// A single stored text message.
///
/// Direct messages have `channel_id == None` and live in the log keyed by
/// `sender_node_id`; channel messages live in the log keyed by `channel_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    pub sender_node_id: String,
    pub receiver_node_id: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
    /// Radio message id, when the entry came off the air.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_id: Option<u32>,
}

impl ConversationEntry {
    pub fn direct(
        sender_node_id: impl Into<String>,
        receiver_node_id: impl Into<String>,
        text: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel_id: None,
            sender_node_id: sender_node_id.into(),
            receiver_node_id: receiver_node_id.into(),
            text: text.into(),
            received_at,
            packet_id: None,
        }
    }

    pub fn channel(
        channel_id: impl Into<String>,
        sender_node_id: impl Into<String>,
        receiver_node_id: impl Into<String>,
        text: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            channel_id: Some(channel_id.into()),
            ..Self::direct(sender_node_id, receiver_node_id, text, received_at)
        }
    }

    pub fn with_packet_id(mut self, packet_id: Option<u32>) -> Self {
        self.packet_id = packet_id;
        self
    }

    /// The log this entry is stored in.
    pub fn key(&self) -> ConversationKey {
        match &self.channel_id {
            Some(channel) => ConversationKey::Channel(channel.clone()),
            None => ConversationKey::Direct(self.sender_node_id.clone()),
        }
    }
}
