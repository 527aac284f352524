use crate::auth::verify_and_decrypt;
use crate::device::DeviceId;
use crate::envelope::Envelope;
use crate::error::{FailureKind, IngestError, StorageError};
use crate::key_store::KeyStore;
use crate::reading::Reading;
use crate::replay::{ReplayGuard, ReplayJournal};
use crate::topic::parse_topic;
use chrono::{DateTime, Local};
use tracing::{Span, debug, field, info, info_span, warn};

/// Destination for readings that passed every check
pub trait ReadingSink {
    fn append_reading(
        &mut self,
        device_id: &DeviceId,
        reading: &Reading,
        timestamp: DateTime<Local>,
    ) -> Result<(), StorageError>;
}

impl<S: ReadingSink + ?Sized> ReadingSink for Box<S> {
    fn append_reading(
        &mut self,
        device_id: &DeviceId,
        reading: &Reading,
        timestamp: DateTime<Local>,
    ) -> Result<(), StorageError> {
        (**self).append_reading(device_id, reading, timestamp)
    }
}

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Accepted(Reading),
    Dropped(FailureKind),
}

impl Disposition {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Disposition::Accepted(_))
    }
}

/// Runs every inbound message through topic parsing, key lookup, envelope
/// decoding, authenticated decryption and the replay guard, then hands accepted
/// readings to the sink.
///
/// Messages are processed one at a time. A rejected message changes no state.
pub struct Dispatcher<S> {
    keys: KeyStore,
    replay: ReplayGuard,
    journal: Option<ReplayJournal>,
    sink: S,
}

impl<S: ReadingSink> Dispatcher<S> {
    pub fn new(keys: KeyStore, replay: ReplayGuard, sink: S) -> Self {
        Self {
            keys,
            replay,
            journal: None,
            sink,
        }
    }

    /// Save replay counters to `journal` after every accepted reading
    pub fn with_journal(mut self, journal: ReplayJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn handle_message(&mut self, topic: &str, payload: &[u8]) -> Disposition {
        self.handle_message_at(topic, payload, Local::now())
    }

    /// Process one message, stamping an accepted reading with `received_at`.
    /// Failures are logged and turned into [`Disposition::Dropped`].
    pub fn handle_message_at(
        &mut self,
        topic: &str,
        payload: &[u8],
        received_at: DateTime<Local>,
    ) -> Disposition {
        let span = info_span!(
            "secure_message",
            topic = %topic,
            payload_size = payload.len(),
            device_id = field::Empty,
        );
        let _enter = span.enter();

        match self.ingest(topic, payload, received_at) {
            Ok(reading) => Disposition::Accepted(reading),
            Err(e) => {
                let kind = e.kind();
                match kind {
                    FailureKind::Storage => warn!(%kind, error = %e, "Failed to store reading"),
                    _ => warn!(%kind, error = %e, "Dropped message"),
                }
                Disposition::Dropped(kind)
            }
        }
    }

    /// Process one message and return the full error on rejection
    pub fn ingest(
        &mut self,
        topic: &str,
        payload: &[u8],
        received_at: DateTime<Local>,
    ) -> Result<Reading, IngestError> {
        let parsed = parse_topic(topic)?;
        Span::current().record("device_id", parsed.device_id);

        let device_id = DeviceId::parse(parsed.device_id)
            .ok_or_else(|| IngestError::UnknownDevice(parsed.device_id.to_string()))?;

        let reading = self.verify(&device_id, payload)?;

        if !self.replay.admit(&device_id, reading.counter) {
            let last = self.replay.last_counter(&device_id).unwrap_or(0);
            return Err(IngestError::ReplayRejected { last });
        }
        self.save_counters();

        info!(device_id = %device_id, reading = %reading, "Accepted reading");
        self.sink.append_reading(&device_id, &reading, received_at)?;
        debug!(device_id = %device_id, "Reading stored");

        Ok(reading)
    }

    /// Key lookup, envelope decoding and authenticated decryption, without
    /// touching the replay state
    pub fn verify(&self, device_id: &DeviceId, payload: &[u8]) -> Result<Reading, IngestError> {
        let key = self.keys.lookup(device_id)?;
        let envelope = Envelope::from_hex(payload)?;
        verify_and_decrypt(&envelope, key)
    }

    fn save_counters(&self) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.save(&self.replay) {
                warn!(path = %journal.path().display(), error = %e, "Failed to save replay counters");
            }
        }
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.keys
    }

    pub fn replay_guard(&self) -> &ReplayGuard {
        &self.replay
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::seal;
    use crate::constants::{IV_SIZE, KEY_SIZE};
    use crate::device::DeviceKey;

    const DEVICE: &str = "ESP32_0123456789AB";

    #[derive(Default)]
    struct VecSink {
        readings: Vec<(DeviceId, Reading)>,
        fail: bool,
    }

    impl ReadingSink for VecSink {
        fn append_reading(
            &mut self,
            device_id: &DeviceId,
            reading: &Reading,
            _timestamp: DateTime<Local>,
        ) -> Result<(), StorageError> {
            if self.fail {
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
            self.readings.push((device_id.clone(), reading.clone()));
            Ok(())
        }
    }

    fn key() -> DeviceKey {
        DeviceKey::from_bytes([0x42; KEY_SIZE])
    }

    fn dispatcher() -> Dispatcher<VecSink> {
        let mut keys = KeyStore::empty("unused.json");
        keys.upsert(DeviceId::parse(DEVICE).unwrap(), key());
        Dispatcher::new(keys, ReplayGuard::new(), VecSink::default())
    }

    fn payload(counter: u64) -> String {
        let reading = Reading::new(Some(20.0), Some(40.0), counter);
        seal(&reading.to_payload(), &key(), [counter as u8; IV_SIZE]).to_hex()
    }

    fn topic() -> String {
        format!("esp32/{}/secure", DEVICE)
    }

    #[test]
    fn test_accepts_fresh_message() {
        let mut dispatcher = dispatcher();
        let disposition = dispatcher.handle_message(&topic(), payload(1).as_bytes());
        assert!(disposition.is_accepted());
        assert_eq!(dispatcher.sink().readings.len(), 1);
        assert_eq!(
            dispatcher.replay_guard().last_counter(&DeviceId::parse(DEVICE).unwrap()),
            Some(1)
        );
    }

    #[test]
    fn test_invalid_topic_dropped() {
        let mut dispatcher = dispatcher();
        let disposition = dispatcher.handle_message("esp32/secure", payload(1).as_bytes());
        assert_eq!(disposition, Disposition::Dropped(FailureKind::InvalidTopic));
    }

    #[test]
    fn test_malformed_device_segment_is_unknown() {
        let mut dispatcher = dispatcher();
        let disposition = dispatcher.handle_message("esp32/not-a-device/secure", payload(1).as_bytes());
        assert_eq!(disposition, Disposition::Dropped(FailureKind::UnknownDevice));
    }

    #[test]
    fn test_storage_failure_reported() {
        let mut dispatcher = dispatcher();
        dispatcher.sink_mut().fail = true;
        let disposition = dispatcher.handle_message(&topic(), payload(1).as_bytes());
        assert_eq!(disposition, Disposition::Dropped(FailureKind::Storage));

        // The rejected storage attempt does not stop later messages
        dispatcher.sink_mut().fail = false;
        assert!(dispatcher.handle_message(&topic(), payload(2).as_bytes()).is_accepted());
    }

    #[test]
    fn test_journal_saved_after_accept() {
        let dir = tempfile::tempdir().unwrap();
        let journal = ReplayJournal::new(dir.path().join("replay_state.json"));
        let mut dispatcher = dispatcher().with_journal(journal.clone());

        assert!(dispatcher.handle_message(&topic(), payload(5).as_bytes()).is_accepted());
        let restored = journal.load().unwrap();
        assert_eq!(restored.last_counter(&DeviceId::parse(DEVICE).unwrap()), Some(5));
    }
}
