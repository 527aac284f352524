//! Authentication and decryption of telemetry envelopes.
//!
//! Sensor nodes encrypt a small JSON document with AES-128-CBC (PKCS#7 padding)
//! and append an HMAC-SHA256 tag over `IV | ciphertext`, both under the same
//! per-device key.
//!
//! # Verification Flow
//!
//! 1. Recompute the HMAC over `IV | ciphertext` and compare it with the tag in
//!    constant time. A mismatch stops here; the ciphertext is never decrypted.
//! 2. AES-128-CBC decrypt with the envelope IV and strip the padding.
//! 3. Parse the plaintext into a [`Reading`].
//!
//! [`seal`] is the device side of the same scheme.

use crate::constants::{BLOCK_SIZE, IV_SIZE, TAG_SIZE};
use crate::device::DeviceKey;
use crate::envelope::Envelope;
use crate::error::IngestError;
use crate::reading::Reading;
use aes::Aes128;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Authenticate the envelope under `key`, then decrypt and parse it
pub fn verify_and_decrypt(envelope: &Envelope, key: &DeviceKey) -> Result<Reading, IngestError> {
    verify_tag(envelope, key)?;
    let plaintext = decrypt(envelope, key)?;
    Reading::from_payload(&plaintext)
}

/// Constant-time check of the envelope tag
pub fn verify_tag(envelope: &Envelope, key: &DeviceKey) -> Result<(), IngestError> {
    let mut mac = new_mac(key)?;
    mac.update(&envelope.iv);
    mac.update(&envelope.ciphertext);
    mac.verify_slice(&envelope.tag)
        .map_err(|_| IngestError::Authentication)
}

/// AES-128-CBC decrypt and remove PKCS#7 padding.
///
/// Only call this on an envelope that passed [`verify_tag`].
fn decrypt(envelope: &Envelope, key: &DeviceKey) -> Result<Vec<u8>, IngestError> {
    let ciphertext = envelope.ciphertext.as_ref();
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(IngestError::Padding);
    }

    Aes128CbcDec::new(key.as_bytes().into(), (&envelope.iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| IngestError::Padding)
}

/// Encrypt and tag `plaintext` the way the firmware does
pub fn seal(plaintext: &[u8], key: &DeviceKey, iv: [u8; IV_SIZE]) -> Envelope {
    let ciphertext = Aes128CbcEnc::new(key.as_bytes().into(), (&iv).into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    Envelope {
        iv,
        tag: compute_tag(&iv, &ciphertext, key),
        ciphertext: Bytes::from(ciphertext),
    }
}

/// HMAC-SHA256 over `IV | ciphertext`
pub fn compute_tag(iv: &[u8; IV_SIZE], ciphertext: &[u8], key: &DeviceKey) -> [u8; TAG_SIZE] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(iv);
    mac.update(ciphertext);
    mac.finalize().into_bytes().into()
}

fn new_mac(key: &DeviceKey) -> Result<HmacSha256, IngestError> {
    <HmacSha256 as Mac>::new_from_slice(key.as_bytes()).map_err(|_| IngestError::Authentication)
}
