// Protocol constants for the secure telemetry link

use std::time::Duration;

/// Size of the AES-CBC initialisation vector at the head of an envelope (16 bytes)
pub const IV_SIZE: usize = 16;

/// Size of the HMAC-SHA256 tag at the tail of an envelope (32 bytes)
pub const TAG_SIZE: usize = 32;

/// AES block size (16 bytes)
pub const BLOCK_SIZE: usize = 16;

/// Size of a per-device AES-128 / HMAC key (16 bytes)
pub const KEY_SIZE: usize = 16;

/// Smallest envelope accepted by the decoder: IV + empty ciphertext + tag
pub const MIN_ENVELOPE_SIZE: usize = IV_SIZE + TAG_SIZE;

/// Prefix every device identifier starts with
pub const DEVICE_ID_PREFIX: &str = "ESP32_";

/// Number of hex characters following the prefix
pub const DEVICE_ID_HEX_LEN: usize = 12;

/// Last topic segment of secure telemetry publishes
pub const SECURE_TOPIC_SUFFIX: &str = "secure";

/// Default topic namespace (`esp32/<device_id>/secure`)
pub const DEFAULT_NAMESPACE: &str = "esp32";

/// Phrases the firmware prints once it has written the key to flash
pub const ACK_TOKENS: &[&str] = &["Key stored", "Clé stockée"];

/// How long provisioning waits for the device to announce its identifier
pub const DEFAULT_DEVICE_ID_TIMEOUT: Duration = Duration::from_secs(5);

/// How long provisioning waits for the key acknowledgment
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for a single blocking read while polling the serial line
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Timestamp layout used in per-device record files
pub const RECORD_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
