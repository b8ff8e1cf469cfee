/// Application name
pub const APP_NAME: &str = "meshChat";

/// Node id the firmware uses as `toId` for broadcast packets
pub const BROADCAST_NODE_ID: &str = "^all";

/// Numeric broadcast address (`to` field of a broadcast packet)
pub const BROADCAST_NODE_NUM: u32 = 0xFFFF_FFFF;

/// Channel a broadcast lands in when the packet carries no channel index
pub const DEFAULT_CHANNEL_ID: &str = "0";

/// Serial device the radio usually enumerates as
pub const DEFAULT_RADIO_PATH: &str = "/dev/ttyACM0";

/// Application tags carried in `decoded.portnum`
pub const PORT_TEXT_MESSAGE: &str = "TEXT_MESSAGE_APP";
pub const PORT_TELEMETRY: &str = "TELEMETRY_APP";
pub const PORT_ADMIN: &str = "ADMIN_APP";
pub const PORT_ROUTING: &str = "ROUTING_APP";
pub const PORT_POSITION: &str = "POSITION_APP";

/// Fixed-point scale of `latitudeI` / `longitudeI`
pub const POSITION_FIXED_POINT_SCALE: f64 = 1e-7;

/// Length of a hardware MAC address in bytes
pub const MAC_ADDRESS_LEN: usize = 6;
