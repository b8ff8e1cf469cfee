use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised at the radio transport boundary.
#[derive(Error, Debug)]
pub enum RadioError {
    /// The device path never appeared within the polling window.
    #[error("No radio found at {} after {:.1}s (candidates: {})", .path.display(), .waited.as_secs_f64(), display_candidates(.candidates))]
    NotFound {
        path: PathBuf,
        waited: Duration,
        candidates: Vec<PathBuf>,
    },

    /// The link to the radio is down.
    #[error("Radio disconnected")]
    Disconnected,

    /// The radio did not report who it is.
    #[error("Radio did not report a local node identity")]
    NoIdentity,

    /// The radio refused or failed to queue an outbound packet.
    #[error("Send failed: {0}")]
    Send(String),

    /// I/O error on the device.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_candidates(candidates: &[PathBuf]) -> String {
    if candidates.is_empty() {
        return "none".to_string();
    }
    candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, RadioError>;
