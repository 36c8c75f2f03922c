//! Value codecs.
//!
//! A codec is picked once when a handler is built and kept as a pair of
//! encode/decode functions, so no call has to branch on the codec kind.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Value (de)serialization failures.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("pickle codec error: {0}")]
    Pickle(#[from] serde_pickle::Error),

    #[error("value is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("custom codec error: {0}")]
    Custom(String),
}

/// The built-in codec families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Pickle,
    Json,
    String,
    Bytes,
    Custom,
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CodecKind::Pickle => "pickle",
            CodecKind::Json => "json",
            CodecKind::String => "string",
            CodecKind::Bytes => "bytes",
            CodecKind::Custom => "custom",
        };
        f.write_str(name)
    }
}

type EncodeFn<V> = dyn Fn(&V) -> Result<Vec<u8>, CodecError> + Send + Sync;
type DecodeFn<V> = dyn Fn(&[u8]) -> Result<V, CodecError> + Send + Sync;

/// Maps application values of type `V` to and from wire bytes.
pub struct ValueCodec<V> {
    kind: CodecKind,
    encode: Arc<EncodeFn<V>>,
    decode: Arc<DecodeFn<V>>,
}

impl<V> Clone for ValueCodec<V> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            encode: Arc::clone(&self.encode),
            decode: Arc::clone(&self.decode),
        }
    }
}

impl<V> fmt::Debug for ValueCodec<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCodec").field("kind", &self.kind).finish()
    }
}

impl<V> ValueCodec<V> {
    /// Creates a codec from user-supplied functions.
    pub fn custom<E, D>(encode: E, decode: D) -> Self
    where
        E: Fn(&V) -> Result<Vec<u8>, CodecError> + Send + Sync + 'static,
        D: Fn(&[u8]) -> Result<V, CodecError> + Send + Sync + 'static,
    {
        Self {
            kind: CodecKind::Custom,
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    pub fn encode(&self, value: &V) -> Result<Vec<u8>, CodecError> {
        (self.encode)(value)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<V, CodecError> {
        (self.decode)(bytes)
    }
}

impl<V> ValueCodec<V>
where
    V: Serialize + DeserializeOwned + 'static,
{
    /// Python pickle. Written with protocol 3, where older clients wrote
    /// protocol 2; Python 3 reads both, but the bytes are not identical.
    pub fn pickle() -> Self {
        Self {
            kind: CodecKind::Pickle,
            encode: Arc::new(|value: &V| -> Result<Vec<u8>, CodecError> {
                Ok(serde_pickle::to_vec(value, serde_pickle::SerOptions::new())?)
            }),
            decode: Arc::new(|bytes: &[u8]| -> Result<V, CodecError> {
                Ok(serde_pickle::from_slice(bytes, serde_pickle::DeOptions::new())?)
            }),
        }
    }

    /// UTF-8 JSON text.
    pub fn json() -> Self {
        Self {
            kind: CodecKind::Json,
            encode: Arc::new(|value: &V| -> Result<Vec<u8>, CodecError> {
                Ok(serde_json::to_vec(value)?)
            }),
            decode: Arc::new(|bytes: &[u8]| -> Result<V, CodecError> {
                Ok(serde_json::from_slice(bytes)?)
            }),
        }
    }

    /// Builds a serde-backed codec by kind. The `string` and `bytes` codecs
    /// are tied to their value types and custom codecs need functions, so
    /// those kinds are rejected here.
    pub fn from_kind(kind: CodecKind) -> Result<Self, CodecError> {
        match kind {
            CodecKind::Pickle => Ok(Self::pickle()),
            CodecKind::Json => Ok(Self::json()),
            other => Err(CodecError::Custom(format!(
                "the {} codec cannot be built for an arbitrary value type",
                other
            ))),
        }
    }
}

impl ValueCodec<String> {
    /// UTF-8 text stored as-is.
    pub fn string() -> Self {
        Self {
            kind: CodecKind::String,
            encode: Arc::new(|value: &String| -> Result<Vec<u8>, CodecError> {
                Ok(value.as_bytes().to_vec())
            }),
            decode: Arc::new(|bytes: &[u8]| -> Result<String, CodecError> {
                Ok(String::from_utf8(bytes.to_vec())?)
            }),
        }
    }
}

impl ValueCodec<Bytes> {
    /// Arbitrary octets stored as-is.
    pub fn bytes() -> Self {
        Self {
            kind: CodecKind::Bytes,
            encode: Arc::new(|value: &Bytes| -> Result<Vec<u8>, CodecError> {
                Ok(value.to_vec())
            }),
            decode: Arc::new(|bytes: &[u8]| -> Result<Bytes, CodecError> {
                Ok(Bytes::copy_from_slice(bytes))
            }),
        }
    }
}
