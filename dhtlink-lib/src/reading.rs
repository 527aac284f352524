use crate::error::{IngestError, describe_json_error};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One decrypted sensor sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Temperature in °C
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Relative humidity in %
    #[serde(rename = "h", default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    /// Strictly increasing per-device sequence number chosen by the firmware
    #[serde(rename = "cnt")]
    pub counter: u64,
}

impl Reading {
    pub fn new(temperature: Option<f64>, humidity: Option<f64>, counter: u64) -> Self {
        Self {
            temperature,
            humidity,
            counter,
        }
    }

    /// Parse the decrypted plaintext `{"t": .., "h": .., "cnt": ..}`
    pub fn from_payload(plaintext: &[u8]) -> Result<Self, IngestError> {
        let text = std::str::from_utf8(plaintext)
            .map_err(|_| IngestError::PayloadFormat("plaintext is not UTF-8".to_string()))?;
        let value: Value =
            serde_json::from_str(text).map_err(|e| IngestError::PayloadFormat(describe_json_error(&e)))?;
        // Derived struct deserialisation also takes sequences; only an object is a reading
        if !value.is_object() {
            return Err(IngestError::PayloadFormat("plaintext is not a JSON object".to_string()));
        }
        serde_json::from_value(value).map_err(|e| IngestError::PayloadFormat(describe_json_error(&e)))
    }

    /// Render the plaintext the firmware would encrypt for this reading
    pub fn to_payload(&self) -> Vec<u8> {
        // A struct of numbers and options always serialises.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.temperature {
            Some(t) => write!(f, "T={}°C", t)?,
            None => write!(f, "T=-")?,
        }
        match self.humidity {
            Some(h) => write!(f, " H={}%", h)?,
            None => write!(f, " H=-")?,
        }
        write!(f, " cnt={}", self.counter)
    }
}
