//! Serial device discovery and the bounded wait for a radio to appear.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{RadioError, Result};

/// Device name prefixes of USB serial adapters radios usually enumerate as.
const SERIAL_PREFIXES: &[&str] = &["ttyACM", "ttyUSB"];

/// List serial devices in `dev_dir` that look like a radio.
///
/// Results are sorted. An unreadable directory yields an empty list.
pub fn discover_ports(dev_dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dev_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dev_dir.display(), error = %e, "Failed to list serial devices");
            return Vec::new();
        }
    };

    let mut ports: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            SERIAL_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
        })
        .map(|entry| entry.path())
        .collect();
    ports.sort();

    debug!(dir = %dev_dir.display(), count = ports.len(), "Discovered serial devices");
    ports
}

/// Poll until `path` exists, for at most `timeout`.
///
/// Checks immediately, then every `poll_interval`. On timeout the error
/// lists the candidate devices found next to `path` so the user can pick
/// the right one.
pub async fn wait_for_radio(
    path: &Path,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<PathBuf> {
    let started = Instant::now();
    let mut ticker = time::interval(poll_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let found = time::timeout(timeout, async {
        loop {
            ticker.tick().await;
            if path.exists() {
                break;
            }
            debug!(path = %path.display(), "Radio not present yet");
        }
    })
    .await;

    match found {
        Ok(()) => {
            info!(
                path = %path.display(),
                waited_ms = started.elapsed().as_millis() as u64,
                "Radio device present"
            );
            Ok(path.to_path_buf())
        }
        Err(_) => {
            let candidates = path.parent().map(discover_ports).unwrap_or_default();
            warn!(
                path = %path.display(),
                candidates = candidates.len(),
                "Timed out waiting for radio"
            );
            Err(RadioError::NotFound {
                path: path.to_path_buf(),
                waited: started.elapsed(),
                candidates,
            })
        }
    }
}
