//! Packet classification.
//!
//! [`classify`] maps every [`RawPacket`] onto exactly one
//! [`ClassifiedMessage`] variant. It is total: unrecognised or missing
//! `portnum` values become [`ClassifiedMessage::Unknown`], and missing
//! sub-fields surface as `None` on the produced variant.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::constants::POSITION_FIXED_POINT_SCALE;
use crate::packet::{as_i32, as_u32, scalar_to_string, PortNum, RawPacket};

/// A packet projected onto its application type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClassifiedMessage {
    Text(TextMessage),
    Telemetry(TelemetryMessage),
    Admin { raw: RawPacket },
    Routing(RoutingMessage),
    Position(PositionMessage),
    Unknown { raw: RawPacket },
}

impl ClassifiedMessage {
    /// Short label used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Telemetry(_) => "telemetry",
            Self::Admin { .. } => "admin",
            Self::Routing(_) => "routing",
            Self::Position(_) => "position",
            Self::Unknown { .. } => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextMessage {
    pub id: Option<u32>,
    pub from_node_id: Option<String>,
    pub to_node_id: Option<String>,
    pub from_node_num: Option<u32>,
    pub to_node_num: Option<u32>,
    /// Channel index the packet arrived on.
    pub channel: Option<u32>,
    pub rx_time: Option<i64>,
    pub rx_snr: Option<f64>,
    pub rx_rssi: Option<i32>,
    pub body: Option<String>,
    pub is_broadcast: bool,
}

impl TextMessage {
    /// Receive time reported by the radio, if it is a valid timestamp.
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.rx_time.and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryMessage {
    pub from_node_num: Option<u32>,
    pub from_node_id: Option<String>,
    pub air_util_tx: Option<f64>,
    pub battery_level: Option<u32>,
    pub voltage: Option<f64>,
    pub channel_utilization: Option<f64>,
    /// `telemetry.time`, Unix seconds.
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingMessage {
    pub error_reason: Option<String>,
}

impl RoutingMessage {
    /// The firmware reports a successful ack as `errorReason: "NONE"`.
    pub fn is_ack(&self) -> bool {
        matches!(self.error_reason.as_deref(), None | Some("NONE"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionMessage {
    pub from_node_num: Option<u32>,
    pub from_node_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<i32>,
    pub time: Option<i64>,
}

/// Classify a packet by its `decoded.portnum`.
pub fn classify(packet: &RawPacket) -> ClassifiedMessage {
    match packet.portnum() {
        PortNum::TextMessage => ClassifiedMessage::Text(text_message(packet)),
        PortNum::Telemetry => ClassifiedMessage::Telemetry(telemetry_message(packet)),
        PortNum::Admin => ClassifiedMessage::Admin {
            raw: packet.clone(),
        },
        PortNum::Routing => ClassifiedMessage::Routing(RoutingMessage {
            error_reason: packet
                .decoded(&["routing", "errorReason"])
                .and_then(scalar_to_string),
        }),
        PortNum::Position => ClassifiedMessage::Position(position_message(packet)),
        PortNum::Unrecognized(_) => ClassifiedMessage::Unknown {
            raw: packet.clone(),
        },
    }
}

fn text_message(packet: &RawPacket) -> TextMessage {
    TextMessage {
        id: packet.id(),
        from_node_id: packet.from_id().map(str::to_string),
        to_node_id: packet.to_id().map(str::to_string),
        from_node_num: packet.from_num(),
        to_node_num: packet.to_num(),
        channel: packet.channel(),
        rx_time: packet.rx_time(),
        rx_snr: packet.rx_snr(),
        rx_rssi: packet.rx_rssi(),
        body: packet.text().map(str::to_string),
        is_broadcast: packet.is_broadcast(),
    }
}

fn telemetry_message(packet: &RawPacket) -> TelemetryMessage {
    let metric = |key: &str| packet.decoded(&["telemetry", "deviceMetrics", key]);

    TelemetryMessage {
        from_node_num: packet.from_num(),
        from_node_id: packet.from_id().map(str::to_string),
        air_util_tx: metric("airUtilTx").and_then(Value::as_f64),
        battery_level: metric("batteryLevel").and_then(as_u32),
        voltage: metric("voltage").and_then(Value::as_f64),
        channel_utilization: metric("channelUtilization").and_then(Value::as_f64),
        timestamp: packet.decoded(&["telemetry", "time"]).and_then(Value::as_i64),
    }
}

fn position_message(packet: &RawPacket) -> PositionMessage {
    let field = |key: &str| packet.decoded(&["position", key]);

    PositionMessage {
        from_node_num: packet.from_num(),
        from_node_id: packet.from_id().map(str::to_string),
        latitude: coordinate(field("latitude"), field("latitudeI")),
        longitude: coordinate(field("longitude"), field("longitudeI")),
        altitude: field("altitude").and_then(as_i32),
        time: field("time").and_then(Value::as_i64),
    }
}

/// Prefer the float degrees, fall back to the 1e-7 fixed-point integer.
pub(crate) fn coordinate(degrees: Option<&Value>, fixed: Option<&Value>) -> Option<f64> {
    degrees.and_then(Value::as_f64).or_else(|| {
        fixed
            .and_then(Value::as_i64)
            .map(|i| i as f64 * POSITION_FIXED_POINT_SCALE)
    })
}
