//! MAC address normalisation.
//!
//! The firmware reports `user.macaddr` base64-encoded; other tooling prints
//! colon-separated hex. Everything is normalised to `AA:BB:CC:DD:EE:FF`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

use crate::constants::MAC_ADDRESS_LEN;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MacError {
    #[error("Empty MAC address")]
    Empty,

    #[error("Unrecognised MAC address format: {0}")]
    Unrecognised(String),
}

/// Parse a MAC address in colon/dash hex, bare hex, or base64 form.
pub fn normalize_mac(raw: &str) -> Result<String, MacError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(MacError::Empty);
    }

    if let Some(bytes) = parse_hex(raw) {
        return Ok(format_mac(&bytes));
    }

    match STANDARD.decode(raw) {
        Ok(bytes) if bytes.len() == MAC_ADDRESS_LEN => Ok(format_mac(&bytes)),
        _ => Err(MacError::Unrecognised(raw.to_string())),
    }
}

fn parse_hex(raw: &str) -> Option<Vec<u8>> {
    let compact: String = raw.chars().filter(|c| *c != ':' && *c != '-').collect();
    let separated = compact.len() != raw.len();

    if compact.len() != MAC_ADDRESS_LEN * 2 {
        return None;
    }
    // Twelve bare characters could also be base64; only accept them as hex
    // when every character is a hex digit.
    if !separated && !compact.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    hex::decode(compact).ok()
}

fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colon_hex() {
        assert_eq!(
            normalize_mac("aa:bb:cc:dd:ee:ff").unwrap(),
            "AA:BB:CC:DD:EE:FF"
        );
        assert_eq!(
            normalize_mac("AA-BB-CC-DD-EE-FF").unwrap(),
            "AA:BB:CC:DD:EE:FF"
        );
    }

    #[test]
    fn test_bare_hex() {
        assert_eq!(normalize_mac("0123456789ab").unwrap(), "01:23:45:67:89:AB");
    }

    #[test]
    fn test_base64() {
        // 0xAA 0xBB 0xCC 0xDD 0xEE 0xFF
        assert_eq!(normalize_mac("qrvM3e7/").unwrap(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(normalize_mac("   "), Err(MacError::Empty));
        assert!(matches!(
            normalize_mac("MAC1"),
            Err(MacError::Unrecognised(_))
        ));
    }
}
