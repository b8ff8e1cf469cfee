//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the client starts with zero
//! configuration against `/dev/ttyACM0`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use meshchat_shared::constants::DEFAULT_RADIO_PATH;

/// What happens to the local-radio flag when the link drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalFlagPolicy {
    /// Clear it; the next connection marks the radio again.
    #[default]
    ClearOnDisconnect,
    /// Keep it until another radio is marked or the client quits.
    RetainAcrossReconnect,
}

impl FromStr for LocalFlagPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clear" => Ok(Self::ClearOnDisconnect),
            "retain" => Ok(Self::RetainAcrossReconnect),
            other => Err(format!("expected `clear` or `retain`, got `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Serial device of the radio.
    /// Env: `MESHCHAT_RADIO_PATH`
    /// Default: `/dev/ttyACM0`
    pub radio_path: PathBuf,

    /// SQLite database file. `None` uses the platform data directory.
    /// Env: `MESHCHAT_DB_PATH`
    pub db_path: Option<PathBuf>,

    /// How long to wait for the radio device to appear.
    /// Env: `MESHCHAT_CONNECT_TIMEOUT_SECS`
    /// Default: 30 s
    pub connect_timeout: Duration,

    /// Interval between checks for the radio device.
    /// Env: `MESHCHAT_POLL_INTERVAL_MS`
    /// Default: 500 ms
    pub poll_interval: Duration,

    /// Go back to waiting for the radio after a disconnect instead of exiting.
    /// Env: `MESHCHAT_RECONNECT` (true/false)
    /// Default: `false`
    pub reconnect: bool,

    /// Env: `MESHCHAT_LOCAL_FLAG_POLICY` (`clear` / `retain`)
    /// Default: `clear`
    pub local_flag_policy: LocalFlagPolicy,

    /// Number of recent `(sender, packet id)` pairs remembered to drop
    /// repeated deliveries (0 = keep every delivery).
    /// Env: `MESHCHAT_DEDUP_WINDOW`
    /// Default: `0`
    pub dedup_window: usize,

    /// JSON snapshot of all conversations written at shutdown.
    /// Env: `MESHCHAT_SNAPSHOT_PATH`
    /// Default: none.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            radio_path: PathBuf::from(DEFAULT_RADIO_PATH),
            db_path: None,
            connect_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            reconnect: false,
            local_flag_policy: LocalFlagPolicy::default(),
            dedup_window: 0,
            snapshot_path: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Invalid values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("MESHCHAT_RADIO_PATH").filter(|p| !p.is_empty()) {
            config.radio_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("MESHCHAT_DB_PATH").filter(|p| !p.is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "MESHCHAT_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(secs);
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "MESHCHAT_POLL_INTERVAL_MS") {
            if ms == 0 {
                tracing::warn!("MESHCHAT_POLL_INTERVAL_MS must be positive, using default");
            } else {
                config.poll_interval = Duration::from_millis(ms);
            }
        }

        if let Some(val) = lookup("MESHCHAT_RECONNECT") {
            config.reconnect = val == "true" || val == "1";
        }

        if let Some(policy) = parse_var::<LocalFlagPolicy>(&lookup, "MESHCHAT_LOCAL_FLAG_POLICY") {
            config.local_flag_policy = policy;
        }

        if let Some(window) = parse_var::<usize>(&lookup, "MESHCHAT_DEDUP_WINDOW") {
            config.dedup_window = window;
        }

        if let Some(path) = lookup("MESHCHAT_SNAPSHOT_PATH").filter(|p| !p.is_empty()) {
            config.snapshot_path = Some(PathBuf::from(path));
        }

        config
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "Invalid configuration value, using default");
            None
        }
    }
}
