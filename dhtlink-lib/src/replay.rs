//! Anti-replay enforcement.
//!
//! The counter inside each reading is the only freshness signal. A device's
//! counter must strictly exceed the last one accepted from it; there is no upper
//! bound on the gap.

use crate::atomic::write_atomic;
use crate::device::DeviceId;
use crate::error::{StorageError, describe_json_error};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Last accepted counter per device. Absent means 0.
#[derive(Debug, Default, Clone)]
pub struct ReplayGuard {
    last_seen: BTreeMap<DeviceId, u64>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the guard from previously recorded counters
    pub fn from_counters(last_seen: BTreeMap<DeviceId, u64>) -> Self {
        Self { last_seen }
    }

    /// Accept and record `counter` iff it is strictly greater than the last one.
    /// A rejected counter leaves the state untouched.
    pub fn admit(&mut self, device_id: &DeviceId, counter: u64) -> bool {
        let last = self.last_counter(device_id).unwrap_or(0);
        if counter <= last {
            return false;
        }
        self.last_seen.insert(device_id.clone(), counter);
        true
    }

    pub fn last_counter(&self, device_id: &DeviceId) -> Option<u64> {
        self.last_seen.get(device_id).copied()
    }

    pub fn counters(&self) -> &BTreeMap<DeviceId, u64> {
        &self.last_seen
    }
}

/// Durable copy of the replay counters, so a restart does not reopen the
/// replay window back to zero.
#[derive(Debug, Clone)]
pub struct ReplayJournal {
    path: PathBuf,
}

impl ReplayJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the recorded counters. A missing journal yields an empty guard.
    pub fn load(&self) -> Result<ReplayGuard, StorageError> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No replay journal, starting with empty counters");
                return Ok(ReplayGuard::new());
            }
            Err(e) => return Err(e.into()),
        };

        let raw: BTreeMap<String, u64> =
            serde_json::from_slice(&contents).map_err(|e| StorageError::Corrupt {
                path: self.path.clone(),
                reason: describe_json_error(&e),
            })?;

        let mut counters = BTreeMap::new();
        for (id, counter) in raw {
            let device_id = DeviceId::parse(&id).ok_or_else(|| StorageError::Corrupt {
                path: self.path.clone(),
                reason: format!("invalid device identifier '{}'", id),
            })?;
            counters.insert(device_id, counter);
        }

        info!(path = %self.path.display(), devices = counters.len(), "Restored replay counters");
        Ok(ReplayGuard::from_counters(counters))
    }

    /// Atomically overwrite the journal with the guard's current counters
    pub fn save(&self, guard: &ReplayGuard) -> Result<(), StorageError> {
        let raw: BTreeMap<&str, u64> = guard
            .counters()
            .iter()
            .map(|(id, counter)| (id.as_str(), *counter))
            .collect();
        let contents = serde_json::to_vec_pretty(&raw)?;
        write_atomic(&self.path, &contents)?;
        debug!(path = %self.path.display(), "Saved replay counters");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
