use crate::constants::{IV_SIZE, MIN_ENVELOPE_SIZE, TAG_SIZE};
use crate::error::IngestError;
use bytes::{BufMut, Bytes, BytesMut};

/// Authenticated-ciphertext envelope as it travels over the wire.
///
/// Layout: `IV (16) | ciphertext (N) | HMAC-SHA256 tag (32)`, hex-encoded on the
/// transport. The tag covers `IV | ciphertext`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub iv: [u8; IV_SIZE],
    pub ciphertext: Bytes,
    pub tag: [u8; TAG_SIZE],
}

impl Envelope {
    /// Split raw envelope bytes into IV, ciphertext and tag
    pub fn decode(raw: &[u8]) -> Result<Self, IngestError> {
        Self::try_from(Bytes::copy_from_slice(raw))
    }

    /// Decode a hex-encoded transport payload
    pub fn from_hex(payload: &[u8]) -> Result<Self, IngestError> {
        let payload = payload.trim_ascii();
        let raw = hex::decode(payload)
            .map_err(|e| IngestError::MalformedEnvelope(format!("payload is not hex: {}", e)))?;
        Self::try_from(Bytes::from(raw))
    }

    /// The bytes covered by the authentication tag
    pub fn authenticated_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(IV_SIZE + self.ciphertext.len());
        buf.put_slice(&self.iv);
        buf.put_slice(&self.ciphertext);
        buf.freeze()
    }

    /// Serialise back to `IV | ciphertext | tag`
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&self.iv);
        buf.put_slice(&self.ciphertext);
        buf.put_slice(&self.tag);
        buf.freeze()
    }

    /// Lowercase hex of [`Envelope::encode`], ready to publish
    pub fn to_hex(&self) -> String {
        hex::encode(self.encode())
    }

    pub fn encoded_len(&self) -> usize {
        IV_SIZE + self.ciphertext.len() + TAG_SIZE
    }
}

impl TryFrom<Bytes> for Envelope {
    type Error = IngestError;

    fn try_from(mut bytes: Bytes) -> Result<Self, Self::Error> {
        if bytes.len() < MIN_ENVELOPE_SIZE {
            return Err(IngestError::MalformedEnvelope(format!(
                "too short: expected at least {} bytes, got {}",
                MIN_ENVELOPE_SIZE,
                bytes.len()
            )));
        }

        let iv: [u8; IV_SIZE] = bytes.split_to(IV_SIZE).as_ref().try_into().map_err(|_| {
            IngestError::MalformedEnvelope("invalid IV length".to_string())
        })?;
        let tag_bytes = bytes.split_off(bytes.len() - TAG_SIZE);
        let tag: [u8; TAG_SIZE] = tag_bytes
            .as_ref()
            .try_into()
            .map_err(|_| IngestError::MalformedEnvelope("invalid tag length".to_string()))?;

        Ok(Envelope {
            iv,
            ciphertext: bytes,
            tag,
        })
    }
}

impl From<Envelope> for Bytes {
    fn from(envelope: Envelope) -> Self {
        envelope.encode()
    }
}
