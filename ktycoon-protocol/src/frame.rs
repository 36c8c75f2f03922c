//! Binary protocol frames.
//!
//! Every request starts with a 5-byte header (opcode + reserved flags), every
//! response with the echoed opcode. All integers are big-endian.
//!
//! ```text
//! set_bulk request:
//! +-------+---------+---------+----------------------------------------------+
//! | magic | flags   | count   | count x (db, key_len, value_len, expire,     |
//! | 1     | 4 (= 0) | 4       |          key, value)  2 + 4 + 4 + 8 + ...    |
//! +-------+---------+---------+----------------------------------------------+
//!
//! get_bulk / remove_bulk request:
//! +-------+---------+---------+----------------------------------------------+
//! | magic | flags   | count   | count x (db, key_len, key)  2 + 4 + ...      |
//! +-------+---------+---------+----------------------------------------------+
//!
//! play_script request:
//! +-------+---------+----------+---------+------+----------------------------+
//! | magic | flags   | name_len | count   | name | count x (key_len,          |
//! |       |         | 4        | 4       |      |   value_len, key, value)   |
//! +-------+---------+----------+---------+------+----------------------------+
//! ```

use crate::error::ProtocolError;
use crate::MAX_FIELD_SIZE;
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{ErrorKind, Read};

/// Expiration sent for records without one: the maximum signed 64-bit value.
pub const DEFAULT_EXPIRE: i64 = i64::MAX;

/// Size of the request header (opcode + flags).
pub const REQUEST_HEADER_SIZE: usize = 5;

/// Size of the per-record header in `set_bulk` requests and `get_bulk` responses.
pub const RECORD_HEADER_SIZE: usize = 18;

/// Binary protocol opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Magic {
    /// The replication log head was reached (server) / keep streaming (client).
    LogHeadReached = 0xb0,
    /// Replication request and replication data frames.
    Replication = 0xb1,
    /// Call a server-side script.
    PlayScript = 0xb4,
    /// Store several records.
    SetBulk = 0xb8,
    /// Remove several records.
    RemoveBulk = 0xb9,
    /// Fetch several records.
    GetBulk = 0xba,
}

impl Magic {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Magic {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0xb0 => Ok(Magic::LogHeadReached),
            0xb1 => Ok(Magic::Replication),
            0xb4 => Ok(Magic::PlayScript),
            0xb8 => Ok(Magic::SetBulk),
            0xb9 => Ok(Magic::RemoveBulk),
            0xba => Ok(Magic::GetBulk),
            _ => Err(ProtocolError::Malformed(format!(
                "unknown opcode: {:#04x}",
                value
            ))),
        }
    }
}

/// A record as carried by bulk frames. Values are already codec-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkRecord {
    pub db: u16,
    pub key: Bytes,
    pub value: Bytes,
    pub expire: i64,
}

impl BulkRecord {
    pub fn new(db: u16, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            db,
            key: key.into(),
            value: value.into(),
            expire: DEFAULT_EXPIRE,
        }
    }

    pub fn with_expire(mut self, expire: i64) -> Self {
        self.expire = expire;
        self
    }
}

fn put_header(buf: &mut BytesMut, magic: Magic) {
    buf.put_u8(magic.as_u8());
    buf.put_u32(0);
}

/// Length prefix for a key, value or name, subject to the same limit the
/// reader enforces.
fn field_len(len: usize) -> Result<u32, ProtocolError> {
    match u32::try_from(len) {
        Ok(len) if len <= MAX_FIELD_SIZE => Ok(len),
        _ => Err(ProtocolError::FrameTooLarge {
            size: u32::try_from(len).unwrap_or(u32::MAX),
            max: MAX_FIELD_SIZE,
        }),
    }
}

fn entry_count(count: usize) -> Result<u32, ProtocolError> {
    u32::try_from(count)
        .map_err(|_| ProtocolError::Malformed(format!("{} entries do not fit one request", count)))
}

/// Encodes a `set_bulk` request.
pub fn encode_set_bulk(records: &[BulkRecord]) -> Result<BytesMut, ProtocolError> {
    let body: usize = records
        .iter()
        .map(|r| RECORD_HEADER_SIZE + r.key.len() + r.value.len())
        .sum();
    let mut buf = BytesMut::with_capacity(REQUEST_HEADER_SIZE + 4 + body);

    put_header(&mut buf, Magic::SetBulk);
    buf.put_u32(entry_count(records.len())?);

    for record in records {
        buf.put_u16(record.db);
        buf.put_u32(field_len(record.key.len())?);
        buf.put_u32(field_len(record.value.len())?);
        buf.put_i64(record.expire);
        buf.put_slice(&record.key);
        buf.put_slice(&record.value);
    }

    Ok(buf)
}

fn encode_key_list(magic: Magic, db: u16, keys: &[&[u8]]) -> Result<BytesMut, ProtocolError> {
    let body: usize = keys.iter().map(|k| 6 + k.len()).sum();
    let mut buf = BytesMut::with_capacity(REQUEST_HEADER_SIZE + 4 + body);

    put_header(&mut buf, magic);
    buf.put_u32(entry_count(keys.len())?);

    for key in keys {
        buf.put_u16(db);
        buf.put_u32(field_len(key.len())?);
        buf.put_slice(key);
    }

    Ok(buf)
}

/// Encodes a `get_bulk` request.
pub fn encode_get_bulk(db: u16, keys: &[&[u8]]) -> Result<BytesMut, ProtocolError> {
    encode_key_list(Magic::GetBulk, db, keys)
}

/// Encodes a `remove_bulk` request.
pub fn encode_remove_bulk(db: u16, keys: &[&[u8]]) -> Result<BytesMut, ProtocolError> {
    encode_key_list(Magic::RemoveBulk, db, keys)
}

/// Encodes a `play_script` request. Values are passed through untouched.
pub fn encode_play_script(
    name: &str,
    args: &[(&[u8], &[u8])],
) -> Result<BytesMut, ProtocolError> {
    let body: usize = args.iter().map(|(k, v)| 8 + k.len() + v.len()).sum();
    let mut buf = BytesMut::with_capacity(REQUEST_HEADER_SIZE + 8 + name.len() + body);

    put_header(&mut buf, Magic::PlayScript);
    buf.put_u32(field_len(name.len())?);
    buf.put_u32(entry_count(args.len())?);
    buf.put_slice(name.as_bytes());

    for (key, value) in args {
        buf.put_u32(field_len(key.len())?);
        buf.put_u32(field_len(value.len())?);
        buf.put_slice(key);
        buf.put_slice(value);
    }

    Ok(buf)
}

/// Blocking reader for response frames.
///
/// Reads loop until the requested byte count is satisfied. A peer that goes
/// away mid-frame yields [`ProtocolError::ConnectionClosed`], never a short
/// buffer.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Fills `buf` completely.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        let mut filled = 0;

        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(ProtocolError::ConnectionClosed {
                        needed: buf.len() - filled,
                    })
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ProtocolError::Io(e)),
            }
        }

        Ok(())
    }

    /// Reads exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, ProtocolError> {
        let mut buf = vec![0u8; len];
        self.read_into(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Reads a length-prefixed field size and checks it against the limit.
    fn read_len(&mut self) -> Result<usize, ProtocolError> {
        let len = self.read_u32()?;
        if len > MAX_FIELD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: MAX_FIELD_SIZE,
            });
        }
        Ok(len as usize)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        let mut buf = [0u8; 1];
        self.read_into(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        let mut buf = [0u8; 2];
        self.read_into(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        let mut buf = [0u8; 4];
        self.read_into(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        let mut buf = [0u8; 8];
        self.read_into(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        let mut buf = [0u8; 8];
        self.read_into(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }

    /// Reads the response opcode and checks it against the request's.
    pub fn expect_magic(&mut self, expected: Magic) -> Result<(), ProtocolError> {
        let actual = self.read_u8()?;
        if actual != expected.as_u8() {
            return Err(ProtocolError::UnexpectedMagic {
                expected: expected.as_u8(),
                actual,
            });
        }
        Ok(())
    }

    /// Reads a `set_bulk` or `remove_bulk` response: opcode + affected count.
    pub fn read_count_response(&mut self, magic: Magic) -> Result<u32, ProtocolError> {
        self.expect_magic(magic)?;
        self.read_u32()
    }

    /// Reads a `get_bulk` response.
    pub fn read_get_bulk_response(&mut self) -> Result<Vec<BulkRecord>, ProtocolError> {
        self.expect_magic(Magic::GetBulk)?;
        let count = self.read_u32()?;

        let mut records = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            let db = self.read_u16()?;
            let key_len = self.read_len()?;
            let value_len = self.read_len()?;
            let expire = self.read_i64()?;
            let key = self.read_bytes(key_len)?;
            let value = self.read_bytes(value_len)?;
            records.push(BulkRecord {
                db,
                key,
                value,
                expire,
            });
        }

        Ok(records)
    }

    /// Reads a `play_script` response. Values are returned raw.
    pub fn read_play_script_response(&mut self) -> Result<Vec<(Bytes, Bytes)>, ProtocolError> {
        self.expect_magic(Magic::PlayScript)?;
        let count = self.read_u32()?;

        let mut pairs = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            let key_len = self.read_len()?;
            let value_len = self.read_len()?;
            let key = self.read_bytes(key_len)?;
            let value = self.read_bytes(value_len)?;
            pairs.push((key, value));
        }

        Ok(pairs)
    }
}
