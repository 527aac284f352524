//! Common test utilities and shared imports

// Shared across several test files, not every item is used in each one
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use chrono::{DateTime, Local, TimeZone};
#[allow(unused_imports)]
pub use dhtlink_lib::auth::{seal, verify_and_decrypt};
#[allow(unused_imports)]
pub use dhtlink_lib::constants::{IV_SIZE, KEY_SIZE, MIN_ENVELOPE_SIZE, TAG_SIZE};
#[allow(unused_imports)]
pub use dhtlink_lib::{
    DeviceId, DeviceKey, Dispatcher, Disposition, Envelope, FailureKind, IngestError, JsonRecordStore, KeyStore,
    ProvisionError, Reading, ReadingSink, ReplayGuard, ReplayJournal, StorageError,
};
#[allow(unused_imports)]
pub use hex;

/// Device used by the worked examples
#[allow(dead_code)]
pub const DEVICE: &str = "ESP32_A4CF12B3C5D6";

/// Topic the example device publishes on
#[allow(dead_code)]
pub const TOPIC: &str = "esp32/ESP32_A4CF12B3C5D6/secure";

/// Plaintext of the worked example reading
#[allow(dead_code)]
pub const EXAMPLE_PLAINTEXT: &[u8] = br#"{"t":21.5,"h":44,"cnt":7}"#;

/// Key 00 01 02 .. 0F
#[allow(dead_code)]
pub fn example_key() -> DeviceKey {
    let mut bytes = [0u8; KEY_SIZE];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = i as u8;
    }
    DeviceKey::from_bytes(bytes)
}

#[allow(dead_code)]
pub fn device() -> DeviceId {
    DeviceId::parse(DEVICE).expect("example device id is valid")
}

/// Worked example envelope: example key, all-zero IV
#[allow(dead_code)]
pub fn example_envelope() -> Envelope {
    seal(EXAMPLE_PLAINTEXT, &example_key(), [0u8; IV_SIZE])
}

/// Seal a reading for the example device with an IV derived from its counter
#[allow(dead_code)]
pub fn sealed_hex(reading: &Reading) -> String {
    let iv = [(reading.counter % 251) as u8; IV_SIZE];
    seal(&reading.to_payload(), &example_key(), iv).to_hex()
}

/// In-memory sink recording everything it is given
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct MemorySink {
    pub readings: Vec<(DeviceId, Reading)>,
}

impl ReadingSink for MemorySink {
    fn append_reading(
        &mut self,
        device_id: &DeviceId,
        reading: &Reading,
        _timestamp: DateTime<Local>,
    ) -> Result<(), StorageError> {
        self.readings.push((device_id.clone(), reading.clone()));
        Ok(())
    }
}

/// Dispatcher knowing only the example device
#[allow(dead_code)]
pub fn example_dispatcher() -> Dispatcher<MemorySink> {
    let mut keys = KeyStore::empty("unused-keys.json");
    keys.upsert(device(), example_key());
    Dispatcher::new(keys, ReplayGuard::new(), MemorySink::default())
}
