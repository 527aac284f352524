//! Device identity and key material.
//!
//! A sensor node is identified by `ESP32_` followed by 12 hex characters (the
//! firmware derives it from the chip's factory MAC). Each identity owns exactly one
//! 16-byte key, shared between AES-128-CBC and HMAC-SHA256.

use crate::constants::{DEVICE_ID_HEX_LEN, DEVICE_ID_PREFIX, KEY_SIZE};
use rand::{CryptoRng, RngCore};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static DEVICE_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ESP32_[0-9A-Fa-f]{12}").expect("device id pattern is valid"));

/// Identifier of a single sensor node, e.g. `ESP32_A4CF12B3C5D6`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    /// Parse a complete identifier. Surrounding text is not allowed.
    pub fn parse(s: &str) -> Option<Self> {
        let hex_part = s.strip_prefix(DEVICE_ID_PREFIX)?;
        if hex_part.len() == DEVICE_ID_HEX_LEN && hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    /// Find the first identifier embedded in a line of firmware output
    pub fn find_in(line: &str) -> Option<Self> {
        DEVICE_ID_PATTERN.find(line).map(|m| Self(m.as_str().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("'{}' is not of the form ESP32_<12 hex chars>", s))
    }
}

/// 16-byte symmetric key issued to one device
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceKey([u8; KEY_SIZE]);

impl DeviceKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Draw a fresh key from a cryptographically secure source
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse a key from exactly 32 hex characters (either case)
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != KEY_SIZE * 2 {
            return None;
        }
        let mut bytes = [0u8; KEY_SIZE];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    /// Uppercase hex, the form stored in the key file and sent to the device
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_device_id_parsing() {
        assert!(DeviceId::parse("ESP32_A4CF12B3C5D6").is_some());
        assert!(DeviceId::parse("ESP32_a4cf12b3c5d6").is_some());
        assert!(DeviceId::parse("ESP32_A4CF12B3C5D").is_none(), "11 hex chars");
        assert!(DeviceId::parse("ESP32_A4CF12B3C5D67").is_none(), "13 hex chars");
        assert!(DeviceId::parse("ESP32_A4CF12B3C5DG").is_none(), "non-hex char");
        assert!(DeviceId::parse("esp32_A4CF12B3C5D6").is_none(), "prefix is case sensitive");
        assert!(DeviceId::parse(" ESP32_A4CF12B3C5D6").is_none());
    }

    #[test]
    fn test_device_id_found_in_boot_banner() {
        let id = DeviceId::find_in("[boot] device=ESP32_0123456789AB ready").unwrap();
        assert_eq!(id.as_str(), "ESP32_0123456789AB");
        assert!(DeviceId::find_in("rst:0x1 (POWERON_RESET),boot:0x13").is_none());
    }

    #[test]
    fn test_key_hex_roundtrip_is_uppercase() {
        let key = DeviceKey::from_bytes([0xab; KEY_SIZE]);
        assert_eq!(key.to_hex(), "ABABABABABABABABABABABABABABABAB");
        assert_eq!(DeviceKey::from_hex("abababababababababababababababab"), Some(key));
    }

    #[test]
    fn test_key_hex_rejects_wrong_length() {
        assert!(DeviceKey::from_hex("ABAB").is_none());
        assert!(DeviceKey::from_hex(&"AB".repeat(17)).is_none());
        assert!(DeviceKey::from_hex(&"ZZ".repeat(16)).is_none());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = DeviceKey::from_bytes([0x11; KEY_SIZE]);
        assert!(!format!("{:?}", key).contains("11"));
    }

    #[test]
    fn test_generated_keys_differ() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = DeviceKey::generate(&mut rng);
        let b = DeviceKey::generate(&mut rng);
        assert_ne!(a, b);
    }
}
