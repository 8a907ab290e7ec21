//! Wire envelope for published events.
//!
//! Redis pub/sub has no native message headers, so headers and payload travel
//! together as `{"headers": {...}, "payload": "<base64>"}`.

use carebase_core::broker::BrokerError;
use carebase_core::event::Headers;
use serde::{Deserialize, Serialize};

/// A published message as seen by consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Pass-through headers, unmodified.
    #[serde(default)]
    pub headers: Headers,
    /// Opaque producer payload.
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Encodes `payload` and `headers` for the wire.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Serialization` if encoding fails.
    pub fn encode(payload: &[u8], headers: &Headers) -> Result<Vec<u8>, BrokerError> {
        #[derive(Serialize)]
        struct Borrowed<'a> {
            headers: &'a Headers,
            #[serde(with = "base64_bytes")]
            payload: &'a [u8],
        }

        serde_json::to_vec(&Borrowed { headers, payload })
            .map_err(|e| BrokerError::Serialization(e.to_string()))
    }

    /// Decodes a message received from a channel.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Serialization` if the bytes are not an envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, BrokerError> {
        serde_json::from_slice(bytes).map_err(|e| BrokerError::Serialization(e.to_string()))
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S, B>(bytes: B, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        B: AsRef<[u8]>,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
