//! Durable mapping from device identifier to device key.
//!
//! The backing file is a JSON object of `"ESP32_...": "<32 uppercase hex>"` pairs.
//! The ingest process loads it once at startup; only provisioning mutates it.

use crate::atomic::write_atomic;
use crate::device::{DeviceId, DeviceKey};
use crate::error::{IngestError, KeyStoreError, describe_json_error};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug)]
pub struct KeyStore {
    path: PathBuf,
    keys: BTreeMap<DeviceId, DeviceKey>,
}

impl KeyStore {
    /// Load the store from `path`. A missing file yields an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, KeyStoreError> {
        let path = path.into();
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Key store not found, starting empty");
                return Ok(Self::empty(path));
            }
            Err(source) => return Err(KeyStoreError::Io { path, source }),
        };

        let raw: BTreeMap<String, String> = match serde_json::from_slice(&contents) {
            Ok(raw) => raw,
            Err(e) => {
                return Err(KeyStoreError::Corrupt {
                    reason: describe_json_error(&e),
                    path,
                });
            }
        };

        let mut keys = BTreeMap::new();
        for (id, hex_key) in raw {
            let Some(device_id) = DeviceId::parse(&id) else {
                return Err(KeyStoreError::Corrupt {
                    path,
                    reason: format!("invalid device identifier '{}'", id),
                });
            };
            let Some(key) = DeviceKey::from_hex(&hex_key) else {
                return Err(KeyStoreError::Corrupt {
                    path,
                    reason: format!("key for {} is not 32 hex characters", device_id),
                });
            };
            keys.insert(device_id, key);
        }

        info!(path = %path.display(), devices = keys.len(), "Loaded key store");
        Ok(Self { path, keys })
    }

    /// Empty store that will persist to `path`
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            keys: BTreeMap::new(),
        }
    }

    pub fn lookup(&self, device_id: &DeviceId) -> Result<&DeviceKey, IngestError> {
        self.keys
            .get(device_id)
            .ok_or_else(|| IngestError::UnknownDevice(device_id.to_string()))
    }

    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.keys.contains_key(device_id)
    }

    /// Insert or replace a key in memory, returning the previous key if any.
    /// Nothing reaches disk until [`KeyStore::persist`].
    pub fn upsert(&mut self, device_id: DeviceId, key: DeviceKey) -> Option<DeviceKey> {
        self.keys.insert(device_id, key)
    }

    /// Drop a device's key from memory, returning it if present
    pub fn remove(&mut self, device_id: &DeviceId) -> Option<DeviceKey> {
        self.keys.remove(device_id)
    }

    /// Write the whole mapping back with write-then-rename semantics
    pub fn persist(&self) -> Result<(), KeyStoreError> {
        let raw: BTreeMap<&str, String> = self
            .keys
            .iter()
            .map(|(id, key)| (id.as_str(), key.to_hex()))
            .collect();

        let mut contents = serde_json::to_vec_pretty(&raw).map_err(|e| KeyStoreError::Corrupt {
            path: self.path.clone(),
            reason: describe_json_error(&e),
        })?;
        contents.push(b'\n');

        write_atomic(&self.path, &contents).map_err(|source| KeyStoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), devices = self.keys.len(), "Persisted key store");
        Ok(())
    }

    pub fn device_ids(&self) -> impl Iterator<Item = &DeviceId> {
        self.keys.keys()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::KEY_SIZE;

    fn id(s: &str) -> DeviceId {
        DeviceId::parse(s).unwrap()
    }

    #[test]
    fn test_missing_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::load(dir.path().join("keys.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_persist_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");

        let mut store = KeyStore::empty(&path);
        store.upsert(id("ESP32_0123456789AB"), DeviceKey::from_bytes([0x5a; KEY_SIZE]));
        store.persist().unwrap();

        let reloaded = KeyStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(
            reloaded.lookup(&id("ESP32_0123456789AB")).unwrap(),
            &DeviceKey::from_bytes([0x5a; KEY_SIZE])
        );

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"ESP32_0123456789AB\": \"5A5A5A5A5A5A5A5A5A5A5A5A5A5A5A5A\""));
    }

    #[test]
    fn test_upsert_returns_previous_key() {
        let mut store = KeyStore::empty("unused.json");
        let device = id("ESP32_0123456789AB");
        assert!(store.upsert(device.clone(), DeviceKey::from_bytes([1; KEY_SIZE])).is_none());
        let previous = store.upsert(device.clone(), DeviceKey::from_bytes([2; KEY_SIZE]));
        assert_eq!(previous, Some(DeviceKey::from_bytes([1; KEY_SIZE])));
        assert_eq!(store.lookup(&device).unwrap(), &DeviceKey::from_bytes([2; KEY_SIZE]));
    }

    #[test]
    fn test_lookup_unknown_device() {
        let store = KeyStore::empty("unused.json");
        let err = store.lookup(&id("ESP32_FFFFFFFFFFFF")).unwrap_err();
        assert!(matches!(err, IngestError::UnknownDevice(ref d) if d == "ESP32_FFFFFFFFFFFF"));
    }

    #[test]
    fn test_corrupt_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        let cases = [
            ("{not json", "syntax"),
            ("[\"ESP32_0123456789AB\"]", "not an object"),
            ("{\"sensor-1\": \"000102030405060708090A0B0C0D0E0F\"}", "bad device id"),
            ("{\"ESP32_0123456789AB\": \"0001\"}", "short key"),
            ("{\"ESP32_0123456789AB\": 42}", "non-string key"),
        ];

        for (contents, description) in cases {
            fs::write(&path, contents).unwrap();
            match KeyStore::load(&path) {
                Err(KeyStoreError::Corrupt { .. }) => {}
                other => panic!("{}: expected Corrupt, got {:?}", description, other),
            }
        }
    }

    #[test]
    fn test_corrupt_reason_never_quotes_key_material() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        fs::write(&path, "{\"ESP32_0123456789AB\": \"DEADBEEFDEADBEEF\"}").unwrap();
        let err = KeyStore::load(&path).unwrap_err();
        assert!(!err.to_string().contains("DEADBEEF"));
    }
}
