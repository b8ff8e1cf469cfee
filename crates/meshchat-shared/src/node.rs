//! Node records reported by the radio and the partial updates derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classify::{coordinate, PositionMessage, TelemetryMessage};
use crate::mac::normalize_mac;
use crate::packet::{as_i32, as_u32, lookup, scalar_to_string};

// ---------------------------------------------------------------------------
// NodePatch
// ---------------------------------------------------------------------------

/// A partial set of node attributes.
///
/// `None` means "not reported", never "known to be empty": merging a patch
/// only overwrites the fields it carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePatch {
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
}

impl NodePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Device metrics carried by a telemetry packet.
    pub fn from_telemetry(telemetry: &TelemetryMessage) -> Self {
        Self {
            node_num: telemetry.from_node_num,
            air_util_tx: telemetry.air_util_tx,
            battery_level: telemetry.battery_level,
            voltage: telemetry.voltage,
            channel_utilization: telemetry.channel_utilization,
            last_heard: telemetry.timestamp.and_then(unix_to_utc),
            ..Default::default()
        }
    }

    pub fn from_position(position: &PositionMessage) -> Self {
        Self {
            node_num: position.from_node_num,
            latitude: position.latitude,
            longitude: position.longitude,
            altitude: position.altitude,
            last_heard: position.time.and_then(unix_to_utc),
            ..Default::default()
        }
    }
}

fn unix_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

// ---------------------------------------------------------------------------
// RawNodeRecord
// ---------------------------------------------------------------------------

/// A node entry as the radio driver reports it (`interface.nodes` values and
/// node-updated notifications).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawNodeRecord(Value);

impl RawNodeRecord {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    fn get(&self, keys: &[&str]) -> Option<&Value> {
        lookup(&self.0, keys)
    }

    fn string(&self, keys: &[&str]) -> Option<String> {
        self.get(keys)
            .and_then(scalar_to_string)
            .filter(|s| !s.is_empty())
    }

    pub fn node_num(&self) -> Option<u32> {
        self.get(&["num"]).and_then(as_u32)
    }

    /// Stable node id (`user.id`, e.g. `"!abc123"`).
    pub fn node_id(&self) -> Option<String> {
        self.string(&["user", "id"])
    }

    /// MAC address, normalised when it parses; kept verbatim otherwise.
    pub fn mac_address(&self) -> Option<String> {
        let raw = self.string(&["user", "macaddr"])?;
        Some(normalize_mac(&raw).unwrap_or(raw))
    }

    pub fn long_name(&self) -> Option<String> {
        self.string(&["user", "longName"])
    }

    pub fn short_name(&self) -> Option<String> {
        self.string(&["user", "shortName"])
    }

    pub fn hw_model(&self) -> Option<String> {
        self.string(&["user", "hwModel"])
    }

    pub fn role(&self) -> Option<String> {
        self.string(&["user", "role"])
    }

    pub fn snr(&self) -> Option<f64> {
        self.get(&["snr"]).and_then(Value::as_f64)
    }

    pub fn last_heard(&self) -> Option<DateTime<Utc>> {
        self.get(&["lastHeard"])
            .and_then(Value::as_i64)
            .and_then(unix_to_utc)
    }

    pub fn battery_level(&self) -> Option<u32> {
        self.get(&["deviceMetrics", "batteryLevel"]).and_then(as_u32)
    }

    pub fn voltage(&self) -> Option<f64> {
        self.get(&["deviceMetrics", "voltage"]).and_then(Value::as_f64)
    }

    pub fn channel_utilization(&self) -> Option<f64> {
        self.get(&["deviceMetrics", "channelUtilization"])
            .and_then(Value::as_f64)
    }

    pub fn air_util_tx(&self) -> Option<f64> {
        self.get(&["deviceMetrics", "airUtilTx"])
            .and_then(Value::as_f64)
    }

    pub fn latitude(&self) -> Option<f64> {
        coordinate(
            self.get(&["position", "latitude"]),
            self.get(&["position", "latitudeI"]),
        )
    }

    pub fn longitude(&self) -> Option<f64> {
        coordinate(
            self.get(&["position", "longitude"]),
            self.get(&["position", "longitudeI"]),
        )
    }

    pub fn altitude(&self) -> Option<i32> {
        self.get(&["position", "altitude"]).and_then(as_i32)
    }

    /// Every attribute the record carries.
    pub fn to_patch(&self) -> NodePatch {
        NodePatch {
            node_num: self.node_num(),
            long_name: self.long_name(),
            short_name: self.short_name(),
            hw_model: self.hw_model(),
            role: self.role(),
            snr: self.snr(),
            last_heard: self.last_heard(),
            battery_level: self.battery_level(),
            voltage: self.voltage(),
            channel_utilization: self.channel_utilization(),
            air_util_tx: self.air_util_tx(),
            latitude: self.latitude(),
            longitude: self.longitude(),
            altitude: self.altitude(),
        }
    }
}

impl From<Value> for RawNodeRecord {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// LocalIdentity
// ---------------------------------------------------------------------------

/// Identity of the radio attached to this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub node_id: String,
    pub node_num: Option<u32>,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub hw_model: Option<String>,
    pub mac_address: Option<String>,
}

impl LocalIdentity {
    /// Build from the driver's `getMyUser()` mapping. `None` without an `id`.
    pub fn from_user(user: &Value) -> Option<Self> {
        let record = RawNodeRecord::new(serde_json::json!({ "user": user }));
        Some(Self {
            node_id: record.node_id()?,
            node_num: None,
            long_name: record.long_name(),
            short_name: record.short_name(),
            hw_model: record.hw_model(),
            mac_address: record.mac_address(),
        })
    }

    pub fn to_patch(&self) -> NodePatch {
        NodePatch {
            node_num: self.node_num,
            long_name: self.long_name.clone(),
            short_name: self.short_name.clone(),
            hw_model: self.hw_model.clone(),
            ..Default::default()
        }
    }
}
