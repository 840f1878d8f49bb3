//! Payload codings
//!
//! An event names the coding of its payload, so the bus never has to look at
//! the bytes and new schemes can be added here without touching the envelope
//! or routing.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::types::JSON_CODING;

/// Errors raised while (de)serializing a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The value could not be serialized under the coding.
    #[error("failed to encode payload as {coding}: {message}")]
    Encoding {
        /// Coding name
        coding: String,
        /// Underlying error
        message: String,
    },

    /// The bytes do not match the requested shape.
    #[error("failed to decode {coding} payload: {message}")]
    Decoding {
        /// Coding name
        coding: String,
        /// Underlying error
        message: String,
    },

    /// No such coding.
    #[error("unknown coding: {coding}")]
    UnknownCoding {
        /// Coding name
        coding: String,
        /// Raised while decoding (as opposed to encoding)
        decoding: bool,
    },
}

impl CodecError {
    /// Whether this error came from the decoding side.
    pub fn is_decoding(&self) -> bool {
        match self {
            CodecError::Encoding { .. } => false,
            CodecError::Decoding { .. } => true,
            CodecError::UnknownCoding { decoding, .. } => *decoding,
        }
    }
}

/// Supported codings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coding {
    /// `serde_json`
    Json,
}

impl Coding {
    /// Name carried in the envelope.
    pub fn as_str(&self) -> &'static str {
        match self {
            Coding::Json => JSON_CODING,
        }
    }

    fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>, String> {
        match self {
            Coding::Json => serde_json::to_vec(value).map_err(|e| e.to_string()),
        }
    }

    fn decode<T: DeserializeOwned>(self, raw: &[u8]) -> Result<T, String> {
        match self {
            Coding::Json => serde_json::from_slice(raw).map_err(|e| e.to_string()),
        }
    }
}

impl fmt::Display for Coding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Coding {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            JSON_CODING => Ok(Coding::Json),
            _ => Err(()),
        }
    }
}

/// Serialize `value` under the coding named `coding`.
pub fn encode<T: Serialize + ?Sized>(coding: &str, value: &T) -> Result<Vec<u8>, CodecError> {
    let scheme: Coding = coding.parse().map_err(|_| CodecError::UnknownCoding {
        coding: coding.to_string(),
        decoding: false,
    })?;
    scheme.encode(value).map_err(|message| CodecError::Encoding {
        coding: coding.to_string(),
        message,
    })
}

/// Deserialize `raw` under the coding named `coding`.
pub fn decode<T: DeserializeOwned>(raw: &[u8], coding: &str) -> Result<T, CodecError> {
    let scheme: Coding = coding.parse().map_err(|_| CodecError::UnknownCoding {
        coding: coding.to_string(),
        decoding: true,
    })?;
    scheme.decode(raw).map_err(|message| CodecError::Decoding {
        coding: coding.to_string(),
        message,
    })
}
