pub mod atomic;
pub mod auth;
pub mod constants;
pub mod device;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod key_store;
pub mod provision;
pub mod reading;
pub mod replay;
pub mod serial;
pub mod storage;
pub mod topic;

// Re-export the types most callers need
pub use device::{DeviceId, DeviceKey};
pub use dispatcher::{Dispatcher, Disposition, ReadingSink};
pub use envelope::Envelope;
pub use error::{FailureKind, IngestError, KeyStoreError, ProvisionError, StorageError};
pub use key_store::KeyStore;
pub use provision::{Handshake, HandshakeTimeouts, LineChannel, OperatorPrompt, ProvisionedDevice};
pub use reading::Reading;
pub use replay::{ReplayGuard, ReplayJournal};
pub use storage::JsonRecordStore;
