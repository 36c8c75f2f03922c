//! The contract shared by the binary and HTTP protocol handlers.

use crate::cursor::Cursor;
use crate::error::{ClientError, ErrorState};
use bytes::Bytes;
use ktycoon_protocol::tsv::quote;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Database selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Db {
    /// Database by position; `0` is the server's default database.
    Index(u16),
    /// Database by name (HTTP only).
    Name(String),
}

impl Db {
    /// Numeric index for the binary protocol, which has no notion of names.
    pub fn index(&self) -> Result<u16, ClientError> {
        match self {
            Db::Index(index) => Ok(*index),
            Db::Name(name) => Err(ClientError::Invalid(format!(
                "database names are not supported by the binary protocol: {}",
                name
            ))),
        }
    }

    /// Path segment / `DB` query value, or `None` for the default database.
    pub fn http_param(&self) -> Option<String> {
        match self {
            Db::Index(0) => None,
            Db::Index(index) => Some(index.to_string()),
            Db::Name(name) if name.is_empty() => None,
            Db::Name(name) => Some(quote(name.as_bytes())),
        }
    }
}

impl From<u16> for Db {
    fn from(index: u16) -> Self {
        Db::Index(index)
    }
}

impl From<&str> for Db {
    fn from(name: &str) -> Self {
        Db::Name(name.to_string())
    }
}

impl From<String> for Db {
    fn from(name: String) -> Self {
        Db::Name(name)
    }
}

impl fmt::Display for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Db::Index(index) => write!(f, "{}", index),
            Db::Name(name) => f.write_str(name),
        }
    }
}

/// Record expiration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expire {
    /// Relative to the time of the call.
    In(Duration),
    /// Absolute, in seconds since the Unix epoch.
    At(i64),
}

impl Expire {
    /// Absolute expiration in epoch seconds.
    pub fn resolve(&self) -> i64 {
        match self {
            Expire::In(ttl) => {
                let secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
                chrono::Utc::now().timestamp().saturating_add(secs)
            }
            Expire::At(at) => *at,
        }
    }
}

impl From<Duration> for Expire {
    fn from(ttl: Duration) -> Self {
        Expire::In(ttl)
    }
}

/// Values that `append` can concatenate client-side.
pub trait Concat: Default {
    fn concat(self, suffix: &Self) -> Self;
}

impl Concat for String {
    fn concat(mut self, suffix: &Self) -> Self {
        self.push_str(suffix);
        self
    }
}

impl Concat for Vec<u8> {
    fn concat(mut self, suffix: &Self) -> Self {
        self.extend_from_slice(suffix);
        self
    }
}

impl Concat for Bytes {
    fn concat(self, suffix: &Self) -> Self {
        let mut joined = Vec::with_capacity(self.len() + suffix.len());
        joined.extend_from_slice(&self);
        joined.extend_from_slice(suffix);
        Bytes::from(joined)
    }
}

/// Operations every protocol handler exposes.
///
/// Each call records its outcome in [`ProtocolHandler::error`]. `NotFound`
/// never surfaces as `Err`; the call returns its absent value (`None`,
/// `false`, `0`, an empty collection) instead. An operation the transport
/// cannot carry fails with [`ClientError::Unsupported`].
pub trait ProtocolHandler<V> {
    /// Outcome of the last call.
    fn error(&self) -> &ErrorState;

    fn open(&mut self, host: &str, port: u16, timeout: Duration) -> Result<bool, ClientError>;

    fn close(&mut self) -> Result<bool, ClientError>;

    /// Checks the server is answering.
    fn echo(&mut self) -> Result<bool, ClientError>;

    fn report(&mut self) -> Result<HashMap<String, String>, ClientError>;

    fn status(&mut self, db: Option<Db>) -> Result<HashMap<String, String>, ClientError>;

    /// Removes every record of the database.
    fn clear(&mut self, db: Option<Db>) -> Result<bool, ClientError>;

    /// Number of records.
    fn count(&mut self, db: Option<Db>) -> Result<Option<u64>, ClientError>;

    /// Database size in bytes.
    fn size(&mut self, db: Option<Db>) -> Result<Option<u64>, ClientError>;

    fn vacuum(&mut self, db: Option<Db>) -> Result<bool, ClientError>;

    fn get(&mut self, key: &[u8], db: Option<Db>) -> Result<Option<V>, ClientError>;

    /// Reads a value stored by `increment` (8-byte big-endian integer).
    fn get_int(&mut self, key: &[u8], db: Option<Db>) -> Result<Option<i64>, ClientError>;

    fn set(
        &mut self,
        key: &[u8],
        value: &V,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<bool, ClientError>;

    /// Stores only if the key is absent.
    fn add(
        &mut self,
        key: &[u8],
        value: &V,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<bool, ClientError>;

    /// Stores only if the key exists.
    fn replace(
        &mut self,
        key: &[u8],
        value: &V,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<bool, ClientError>;

    fn remove(&mut self, key: &[u8], db: Option<Db>) -> Result<bool, ClientError>;

    /// Compare-and-swap. `old == None` requires the key to be absent,
    /// `new == None` removes it.
    fn cas(
        &mut self,
        key: &[u8],
        old: Option<&V>,
        new: Option<&V>,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<bool, ClientError>;

    /// Appends to the current value, starting from an empty value when the
    /// key is absent. Not atomic: a concurrent writer between the read and
    /// the write is lost.
    fn append(
        &mut self,
        key: &[u8],
        value: &V,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<bool, ClientError>
    where
        V: Concat;

    fn increment(
        &mut self,
        key: &[u8],
        delta: i64,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<Option<i64>, ClientError>;

    fn increment_double(
        &mut self,
        key: &[u8],
        delta: f64,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<Option<f64>, ClientError>;

    /// Stores several records; returns how many were stored.
    fn set_bulk(
        &mut self,
        records: &[(&[u8], V)],
        expire: Option<Expire>,
        atomic: bool,
        db: Option<Db>,
    ) -> Result<u64, ClientError>;

    /// Removes several records; returns how many existed.
    fn remove_bulk(
        &mut self,
        keys: &[&[u8]],
        atomic: bool,
        db: Option<Db>,
    ) -> Result<u64, ClientError>;

    fn get_bulk(
        &mut self,
        keys: &[&[u8]],
        atomic: bool,
        db: Option<Db>,
    ) -> Result<HashMap<Bytes, V>, ClientError>;

    fn match_prefix(
        &mut self,
        prefix: &[u8],
        max: Option<usize>,
        db: Option<Db>,
    ) -> Result<Vec<Bytes>, ClientError>;

    fn match_regex(
        &mut self,
        regex: &str,
        max: Option<usize>,
        db: Option<Db>,
    ) -> Result<Vec<Bytes>, ClientError>;

    /// Calls a server-side script. Arguments and results are raw bytes.
    fn play_script(
        &mut self,
        name: &str,
        args: &[(&[u8], &[u8])],
    ) -> Result<Vec<(Bytes, Bytes)>, ClientError>;

    /// Creates a cursor bound to this handler.
    fn cursor(&mut self) -> Result<Cursor<'_, V>, ClientError>;
}

/// Interprets a raw value written by `increment`.
pub(crate) fn decode_int(raw: &[u8]) -> Result<i64, ClientError> {
    let array: [u8; 8] = raw.try_into().map_err(|_| {
        ClientError::Invalid(format!(
            "value is {} bytes, not an 8-byte integer",
            raw.len()
        ))
    })?;
    Ok(i64::from_be_bytes(array))
}
