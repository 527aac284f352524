//! Per-device JSON record files.
//!
//! Each device gets `<data_dir>/<device_id>.json`:
//!
//! ```json
//! {
//!     "temperature": [{ "value": 21.5, "timestamp": "2024-05-01 12:00:00" }],
//!     "humidity": [{ "value": 44.0, "timestamp": "2024-05-01 12:00:00" }]
//! }
//! ```
//!
//! A dashboard reads these files directly, so every write replaces the file
//! atomically.

use crate::atomic::write_atomic;
use crate::constants::RECORD_TIMESTAMP_FORMAT;
use crate::device::DeviceId;
use crate::dispatcher::ReadingSink;
use crate::error::StorageError;
use crate::reading::Reading;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One timestamped value in a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    pub timestamp: String,
}

/// Everything stored for one device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(default)]
    pub temperature: Vec<Sample>,
    #[serde(default)]
    pub humidity: Vec<Sample>,
}

impl DeviceRecord {
    /// Append the fields present in `reading`; absent fields are skipped
    pub fn push(&mut self, reading: &Reading, timestamp: &str) {
        if let Some(value) = reading.temperature {
            self.temperature.push(Sample {
                value,
                timestamp: timestamp.to_string(),
            });
        }
        if let Some(value) = reading.humidity {
            self.humidity.push(Sample {
                value,
                timestamp: timestamp.to_string(),
            });
        }
    }
}

/// [`ReadingSink`] writing one JSON file per device
#[derive(Debug, Clone)]
pub struct JsonRecordStore {
    data_dir: PathBuf,
}

impl JsonRecordStore {
    /// Open the store, creating `data_dir` if needed
    pub fn open(data_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn record_path(&self, device_id: &DeviceId) -> PathBuf {
        self.data_dir.join(format!("{}.json", device_id))
    }

    /// Read a device's record. Missing files start empty; an unreadable record
    /// is logged and replaced on the next write.
    pub fn load(&self, device_id: &DeviceId) -> Result<DeviceRecord, StorageError> {
        let path = self.record_path(device_id);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(DeviceRecord::default()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&contents) {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!(
                    device_id = %device_id,
                    path = %path.display(),
                    error = %e,
                    "Record file is not valid JSON, starting a new one"
                );
                Ok(DeviceRecord::default())
            }
        }
    }

    fn save(&self, path: &Path, record: &DeviceRecord) -> Result<(), StorageError> {
        let mut contents = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut contents, PrettyFormatter::with_indent(b"    "));
        record.serialize(&mut serializer)?;
        write_atomic(path, &contents)?;
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl ReadingSink for JsonRecordStore {
    fn append_reading(
        &mut self,
        device_id: &DeviceId,
        reading: &Reading,
        timestamp: DateTime<Local>,
    ) -> Result<(), StorageError> {
        let mut record = self.load(device_id)?;
        record.push(reading, &timestamp.format(RECORD_TIMESTAMP_FORMAT).to_string());

        let path = self.record_path(device_id);
        self.save(&path, &record)?;
        debug!(device_id = %device_id, path = %path.display(), "Appended reading");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn device() -> DeviceId {
        DeviceId::parse("ESP32_0123456789AB").unwrap()
    }

    fn at(hour: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_append_creates_series() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonRecordStore::open(dir.path().join("data")).unwrap();

        store
            .append_reading(&device(), &Reading::new(Some(21.5), Some(44.0), 1), at(12))
            .unwrap();
        store
            .append_reading(&device(), &Reading::new(Some(22.0), None, 2), at(13))
            .unwrap();

        let record = store.load(&device()).unwrap();
        assert_eq!(record.temperature.len(), 2);
        assert_eq!(record.humidity.len(), 1);
        assert_eq!(
            record.temperature[0],
            Sample {
                value: 21.5,
                timestamp: "2024-05-01 12:00:00".to_string()
            }
        );
        assert_eq!(record.temperature[1].timestamp, "2024-05-01 13:00:00");
    }

    #[test]
    fn test_file_is_indented_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonRecordStore::open(dir.path()).unwrap();
        store
            .append_reading(&device(), &Reading::new(None, Some(50.0), 1), at(8))
            .unwrap();

        let text = fs::read_to_string(store.record_path(&device())).unwrap();
        assert!(text.starts_with("{\n    \"temperature\": []"));
        assert!(text.contains("\"value\": 50.0"));
    }

    #[test]
    fn test_corrupt_record_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonRecordStore::open(dir.path()).unwrap();
        fs::write(store.record_path(&device()), "{ truncated").unwrap();

        store
            .append_reading(&device(), &Reading::new(Some(19.0), None, 3), at(9))
            .unwrap();
        let record = store.load(&device()).unwrap();
        assert_eq!(record.temperature.len(), 1);
    }
}
