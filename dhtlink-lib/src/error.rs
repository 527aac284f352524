use std::io;
use std::path::PathBuf;
use std::time::Duration;
use strum_macros::{Display, IntoStaticStr};
use thiserror::Error;

/// Why an inbound telemetry message was dropped.
///
/// Each variant maps one-to-one onto an [`IngestError`] variant. The kind is what
/// gets logged; nothing about it is ever sent back over the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    InvalidTopic,
    UnknownDevice,
    MalformedEnvelope,
    Authentication,
    Padding,
    PayloadFormat,
    ReplayRejected,
    Storage,
}

/// Errors raised along the ingestion path.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid topic '{0}': expected '<namespace>/<device_id>/secure'")]
    InvalidTopic(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Authentication tag mismatch")]
    Authentication,

    #[error("Invalid ciphertext padding")]
    Padding,

    #[error("Invalid payload: {0}")]
    PayloadFormat(String),

    #[error("Replay rejected: counter does not exceed last accepted {last}")]
    ReplayRejected { last: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IngestError {
    pub fn kind(&self) -> FailureKind {
        match self {
            IngestError::InvalidTopic(_) => FailureKind::InvalidTopic,
            IngestError::UnknownDevice(_) => FailureKind::UnknownDevice,
            IngestError::MalformedEnvelope(_) => FailureKind::MalformedEnvelope,
            IngestError::Authentication => FailureKind::Authentication,
            IngestError::Padding => FailureKind::Padding,
            IngestError::PayloadFormat(_) => FailureKind::PayloadFormat,
            IngestError::ReplayRejected { .. } => FailureKind::ReplayRejected,
            IngestError::Storage(_) => FailureKind::Storage,
        }
    }
}

/// Errors from loading or persisting the device key file.
#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("Key store {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("Key store I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors from the record store and the replay journal.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialisation error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

/// Terminal failure of a provisioning run.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("No device identifier detected within {0:?}")]
    NoDeviceDetected(Duration),

    #[error("No acknowledgment received from {device_id} within {timeout:?}")]
    NoAck { device_id: String, timeout: Duration },

    #[error("Provisioning of {0} aborted by operator")]
    Aborted(String),

    #[error(transparent)]
    Store(#[from] KeyStoreError),

    #[error("Serial I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Describe a JSON error by category and position only.
///
/// serde_json messages quote the offending input, which may be key material or
/// rejected plaintext.
pub(crate) fn describe_json_error(err: &serde_json::Error) -> String {
    format!(
        "{:?} error at line {} column {}",
        err.classify(),
        err.line(),
        err.column()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_display_is_snake_case() {
        assert_eq!(FailureKind::MalformedEnvelope.to_string(), "malformed_envelope");
        assert_eq!(FailureKind::ReplayRejected.to_string(), "replay_rejected");
        let name: &'static str = FailureKind::UnknownDevice.into();
        assert_eq!(name, "unknown_device");
    }

    #[test]
    fn test_ingest_error_kind_mapping() {
        assert_eq!(IngestError::Authentication.kind(), FailureKind::Authentication);
        assert_eq!(IngestError::Padding.kind(), FailureKind::Padding);
        assert_eq!(
            IngestError::ReplayRejected { last: 3 }.kind(),
            FailureKind::ReplayRejected
        );
    }

    #[test]
    fn test_json_error_description_does_not_quote_input() {
        let err = serde_json::from_str::<serde_json::Value>("{\"secret\": tru").unwrap_err();
        let described = describe_json_error(&err);
        assert!(!described.contains("secret"));
        assert!(described.contains("column"));
    }
}
