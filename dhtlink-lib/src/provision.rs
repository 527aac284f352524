//! Serial provisioning handshake.
//!
//! The device prints its identifier after reset. The host looks it up in the
//! key store, asks the operator before replacing an existing key, generates a
//! fresh key, records it, sends it to the device as one line of uppercase hex
//! and waits for the firmware to confirm it wrote the key to flash.
//!
//! The key store is persisted before the key goes out on the wire, so a device
//! never holds a key the host does not know about.

use crate::constants::{ACK_TOKENS, DEFAULT_ACK_TIMEOUT, DEFAULT_DEVICE_ID_TIMEOUT, DEFAULT_POLL_INTERVAL};
use crate::device::{DeviceId, DeviceKey};
use crate::error::ProvisionError;
use crate::key_store::KeyStore;
use rand::{CryptoRng, RngCore};
use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Line-oriented access to the device console
pub trait LineChannel {
    /// Wait at most `timeout` for one complete line, without its terminator.
    /// Returns `Ok(None)` if no full line arrived in time.
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>>;

    /// Send `line` followed by `\n`
    fn write_line(&mut self, line: &str) -> io::Result<()>;
}

impl<C: LineChannel + ?Sized> LineChannel for &mut C {
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        (**self).read_line(timeout)
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        (**self).write_line(line)
    }
}

/// Asks the operator whether an already provisioned device may be re-keyed
pub trait OperatorPrompt {
    fn confirm_overwrite(&mut self, device_id: &DeviceId) -> bool;
}

impl<F: FnMut(&DeviceId) -> bool> OperatorPrompt for F {
    fn confirm_overwrite(&mut self, device_id: &DeviceId) -> bool {
        self(device_id)
    }
}

/// Deadlines for the two waiting states, plus the granularity of each read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeTimeouts {
    pub device_id: Duration,
    pub ack: Duration,
    pub poll: Duration,
}

impl Default for HandshakeTimeouts {
    fn default() -> Self {
        Self {
            device_id: DEFAULT_DEVICE_ID_TIMEOUT,
            ack: DEFAULT_ACK_TIMEOUT,
            poll: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Outcome of a successful handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedDevice {
    pub device_id: DeviceId,
    /// The device already had a key, which the operator agreed to replace
    pub replaced_existing: bool,
}

#[derive(Debug)]
pub enum HandshakeState {
    AwaitingDeviceId,
    KeyConflictCheck { device_id: DeviceId },
    KeyGenerated { device_id: DeviceId, replacing: bool },
    AwaitingAck { device_id: DeviceId, replacing: bool },
    Success(ProvisionedDevice),
    Failure(ProvisionError),
}

impl HandshakeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::Success(_) | HandshakeState::Failure(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            HandshakeState::AwaitingDeviceId => "awaiting_device_id",
            HandshakeState::KeyConflictCheck { .. } => "key_conflict_check",
            HandshakeState::KeyGenerated { .. } => "key_generated",
            HandshakeState::AwaitingAck { .. } => "awaiting_ack",
            HandshakeState::Success(_) => "success",
            HandshakeState::Failure(_) => "failure",
        }
    }
}

/// Provisioning state machine for one device
pub struct Handshake<'a, C, P, R> {
    channel: C,
    prompt: P,
    rng: R,
    keys: &'a mut KeyStore,
    timeouts: HandshakeTimeouts,
    state: HandshakeState,
}

impl<'a, C, P, R> Handshake<'a, C, P, R>
where
    C: LineChannel,
    P: OperatorPrompt,
    R: RngCore + CryptoRng,
{
    pub fn new(channel: C, prompt: P, rng: R, keys: &'a mut KeyStore) -> Self {
        Self {
            channel,
            prompt,
            rng,
            keys,
            timeouts: HandshakeTimeouts::default(),
            state: HandshakeState::AwaitingDeviceId,
        }
    }

    pub fn with_timeouts(mut self, timeouts: HandshakeTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// Perform one transition. Terminal states stay where they are.
    pub fn step(&mut self) -> &HandshakeState {
        if self.state.is_terminal() {
            return &self.state;
        }
        let current = std::mem::replace(&mut self.state, HandshakeState::AwaitingDeviceId);
        self.state = self.transition(current);
        &self.state
    }

    /// Drive the handshake to a terminal state
    pub fn run(mut self) -> Result<ProvisionedDevice, ProvisionError> {
        let mut state = std::mem::replace(&mut self.state, HandshakeState::AwaitingDeviceId);
        loop {
            state = match state {
                HandshakeState::Success(device) => return Ok(device),
                HandshakeState::Failure(e) => return Err(e),
                other => self.transition(other),
            };
        }
    }

    fn transition(&mut self, state: HandshakeState) -> HandshakeState {
        let next = match state {
            HandshakeState::AwaitingDeviceId => self.await_device_id(),
            HandshakeState::KeyConflictCheck { device_id } => self.check_conflict(device_id),
            HandshakeState::KeyGenerated { device_id, replacing } => self.issue_key(device_id, replacing),
            HandshakeState::AwaitingAck { device_id, replacing } => self.await_ack(device_id, replacing),
            terminal => terminal,
        };
        debug!(state = next.name(), "Handshake transition");
        next
    }

    fn await_device_id(&mut self) -> HandshakeState {
        info!("Waiting for device identifier...");
        let window = self.timeouts.device_id;
        match self.wait_for_line(window, true, DeviceId::find_in) {
            Ok(Some(device_id)) => {
                info!(device_id = %device_id, "Device detected");
                HandshakeState::KeyConflictCheck { device_id }
            }
            Ok(None) => HandshakeState::Failure(ProvisionError::NoDeviceDetected(window)),
            Err(e) => HandshakeState::Failure(e.into()),
        }
    }

    fn check_conflict(&mut self, device_id: DeviceId) -> HandshakeState {
        if !self.keys.contains(&device_id) {
            return HandshakeState::KeyGenerated {
                device_id,
                replacing: false,
            };
        }

        warn!(device_id = %device_id, "Device already has a key");
        if self.prompt.confirm_overwrite(&device_id) {
            HandshakeState::KeyGenerated {
                device_id,
                replacing: true,
            }
        } else {
            HandshakeState::Failure(ProvisionError::Aborted(device_id.to_string()))
        }
    }

    fn issue_key(&mut self, device_id: DeviceId, replacing: bool) -> HandshakeState {
        let key = DeviceKey::generate(&mut self.rng);
        let encoded = key.to_hex();

        let previous = self.keys.upsert(device_id.clone(), key);
        if let Err(e) = self.keys.persist() {
            // Keep memory in line with what is on disk
            match previous {
                Some(old) => {
                    self.keys.upsert(device_id, old);
                }
                None => {
                    self.keys.remove(&device_id);
                }
            }
            return HandshakeState::Failure(e.into());
        }
        info!(device_id = %device_id, path = %self.keys.path().display(), "Key recorded");

        if let Err(e) = self.channel.write_line(&encoded) {
            return HandshakeState::Failure(e.into());
        }
        info!(device_id = %device_id, "Key sent, waiting for acknowledgment...");

        HandshakeState::AwaitingAck { device_id, replacing }
    }

    fn await_ack(&mut self, device_id: DeviceId, replacing: bool) -> HandshakeState {
        let window = self.timeouts.ack;
        // Firmware may echo what it received, so lines are not logged here
        match self.wait_for_line(window, false, |line| {
            ACK_TOKENS.iter().any(|token| line.contains(token)).then_some(())
        }) {
            Ok(Some(())) => {
                info!(device_id = %device_id, "Device acknowledged key");
                HandshakeState::Success(ProvisionedDevice {
                    device_id,
                    replaced_existing: replacing,
                })
            }
            Ok(None) => HandshakeState::Failure(ProvisionError::NoAck {
                device_id: device_id.to_string(),
                timeout: window,
            }),
            Err(e) => HandshakeState::Failure(e.into()),
        }
    }

    /// Read lines until `matcher` accepts one or `window` elapses
    fn wait_for_line<T>(
        &mut self,
        window: Duration,
        echo: bool,
        mut matcher: impl FnMut(&str) -> Option<T>,
    ) -> io::Result<Option<T>> {
        let deadline = deadline_after(window);
        loop {
            let wait = match remaining(deadline) {
                Some(left) => left.min(self.timeouts.poll),
                None => return Ok(None),
            };

            let Some(line) = self.channel.read_line(wait)? else {
                continue;
            };
            if echo {
                debug!(line = %line, "device");
            } else {
                trace!(len = line.len(), "device line");
            }
            if let Some(found) = matcher(&line) {
                return Ok(Some(found));
            }
        }
    }
}

/// `Instant::now() + window`, or `None` when that is past what `Instant` can
/// represent, which waits without a deadline
pub(crate) fn deadline_after(window: Duration) -> Option<Instant> {
    Instant::now().checked_add(window)
}

/// Time left before `deadline`; `None` once it has passed
pub(crate) fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        Some(deadline) => {
            let left = deadline.saturating_duration_since(Instant::now());
            (!left.is_zero()).then_some(left)
        }
        None => Some(Duration::MAX),
    }
}
