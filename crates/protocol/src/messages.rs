//! Request and response records exchanged after the handshake.
//!
//! Both are JSON objects carried inside an encrypted frame. The `params`
//! object keeps insertion order so requests serialize exactly as declared
//! in the command registry. The `result` of a successful response is kept
//! as raw JSON: its schema belongs to the remote method.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value};

use crate::error::{ProtocolError, Result};

/// Protocol version string announced by the daemon and echoed by the client.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Prefix of connection-scoped request ids (`cli-1`, `cli-2`, ...).
pub const REQUEST_ID_PREFIX: &str = "cli";

/// Formats the request id for the `n`th request on a connection.
pub fn request_id(n: u64) -> String {
    format!("{}-{}", REQUEST_ID_PREFIX, n)
}

/// A single method invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, unique within the connection.
    pub id: String,
    /// Remote method name, e.g. `window.getInfo`.
    pub method: String,
    /// Named parameters in declaration order.
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Request {
    /// Serialize the request to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize a request from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Failure detail reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable code, e.g. `NOT_FOUND`.
    pub code: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

/// The daemon's reply to a [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request this answers.
    pub id: String,
    /// Whether the method succeeded.
    #[serde(default)]
    pub ok: bool,
    /// Method result, present when `ok` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,
    /// Failure detail, present when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl Response {
    /// Deserialize a response from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize the response to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Checks the reply against the outstanding request and extracts the result.
    ///
    /// A successful reply yields the `result` JSON exactly as the daemon sent
    /// it (`null` if the field was absent). A failed reply becomes
    /// [`ProtocolError::Method`].
    pub fn into_result(self, expected_id: &str) -> Result<Box<RawValue>> {
        if self.id != expected_id {
            return Err(ProtocolError::UnexpectedResponse {
                expected: expected_id.to_string(),
                got: self.id,
            });
        }

        if !self.ok {
            let detail = self.error.unwrap_or_else(|| ErrorDetail {
                code: "UNKNOWN".to_string(),
                message: "daemon reported failure without detail".to_string(),
            });
            return Err(ProtocolError::Method {
                code: detail.code,
                message: detail.message,
            });
        }

        match self.result {
            Some(raw) => Ok(raw),
            None => Ok(RawValue::from_string("null".to_string())?),
        }
    }
}

/// Serde helpers for byte fields carried as standard base64 strings.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }

    /// Same encoding for `Option<Vec<u8>>`; `null` or a missing field is `None`.
    pub mod option {
        use super::*;

        pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match bytes {
                Some(bytes) => super::serialize(bytes, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<String>::deserialize(deserializer)? {
                Some(encoded) => STANDARD
                    .decode(encoded.as_bytes())
                    .map(Some)
                    .map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}
