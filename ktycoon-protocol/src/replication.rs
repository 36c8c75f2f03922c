//! Replication log stream.
//!
//! A consumer sends one request frame and then reads an unbounded sequence of
//! frames. Each frame starts with a 9-byte header (opcode + timestamp):
//!
//! ```text
//! head reached:  [0xb0][ts: u64]                  -> reply with a single 0xb1
//! log entry:     [0xb1][ts: u64][size: u32][sid: u16][db: u16][op: u8][body]
//!                                  |<-------------- size bytes ------------->|
//! ```
//!
//! Entry bodies use varint lengths:
//!
//! ```text
//! REMOVE: [key_len][key]
//! SET:    [key_len][value_len][key][xt: 5 bytes][value]   value_len includes xt
//! CLEAR:  (empty)
//! ```

use crate::error::ProtocolError;
use crate::frame::{FrameReader, Magic};
use crate::varint::{get_varint, put_varint};
use crate::MAX_FIELD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;

/// Size of the replication request frame.
pub const REQUEST_SIZE: usize = 15;

/// Size of the per-frame header (opcode + timestamp).
pub const FRAME_HEADER_SIZE: usize = 9;

/// Size of the entry sub-header (sid + db + operation).
pub const ENTRY_HEADER_SIZE: usize = 5;

/// Bytes of expiration timestamp stored in front of every SET value.
pub const EXPIRE_SIZE: usize = 5;

/// Database mutation carried by a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogOperation {
    Set = 0xa1,
    Remove = 0xa2,
    Clear = 0xa5,
}

impl LogOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogOperation::Set => "set",
            LogOperation::Remove => "remove",
            LogOperation::Clear => "clear",
        }
    }
}

impl TryFrom<u8> for LogOperation {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0xa1 => Ok(LogOperation::Set),
            0xa2 => Ok(LogOperation::Remove),
            0xa5 => Ok(LogOperation::Clear),
            _ => Err(ProtocolError::UnknownOperation(value)),
        }
    }
}

impl fmt::Display for LogOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded mutation from the server's transaction log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Frame-header timestamp of the entry.
    pub timestamp: u64,
    pub sid: u16,
    pub db: u16,
    pub operation: LogOperation,
    /// Present for SET and REMOVE.
    pub key: Option<Bytes>,
    /// Present for SET only.
    pub value: Option<Bytes>,
    /// Absolute expiration, present for SET only.
    pub expire: Option<u64>,
}

/// A frame read from the replication stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationEvent {
    /// No more buffered entries; the consumer must answer before reading on.
    HeadReached { timestamp: u64 },
    Entry(LogEntry),
}

/// Encodes the request that starts a replication stream.
pub fn encode_request(start_ns: u64, sid: u16) -> BytesMut {
    let mut buf = BytesMut::with_capacity(REQUEST_SIZE);
    buf.put_u8(Magic::Replication.as_u8());
    buf.put_u32(0);
    buf.put_u64(start_ns);
    buf.put_u16(sid);
    buf
}

/// Decodes an entry body for the given operation.
pub fn decode_entry(
    timestamp: u64,
    sid: u16,
    db: u16,
    operation: LogOperation,
    body: Bytes,
) -> Result<LogEntry, ProtocolError> {
    let mut entry = LogEntry {
        timestamp,
        sid,
        db,
        operation,
        key: None,
        value: None,
        expire: None,
    };

    let mut buf = body;

    match operation {
        LogOperation::Clear => {}
        LogOperation::Remove => {
            let key_len = get_varint(&mut buf)?;
            entry.key = Some(take(&mut buf, key_len, "key")?);
        }
        LogOperation::Set => {
            let key_len = get_varint(&mut buf)?;
            let value_len = get_varint(&mut buf)?;
            entry.key = Some(take(&mut buf, key_len, "key")?);

            let mut value = take(&mut buf, value_len, "value")?;
            if value.len() < EXPIRE_SIZE {
                return Err(ProtocolError::Malformed(format!(
                    "SET value shorter than its {}-byte expiration",
                    EXPIRE_SIZE
                )));
            }

            let mut xt = [0u8; 8];
            value.copy_to_slice(&mut xt[8 - EXPIRE_SIZE..]);
            entry.expire = Some(u64::from_be_bytes(xt));
            entry.value = Some(value);
        }
    }

    Ok(entry)
}

fn take(buf: &mut Bytes, len: u64, what: &str) -> Result<Bytes, ProtocolError> {
    if len > buf.len() as u64 {
        return Err(ProtocolError::Malformed(format!(
            "{} length {} exceeds remaining {} bytes",
            what,
            len,
            buf.len()
        )));
    }
    Ok(buf.split_to(len as usize))
}

/// Encodes a log entry frame, header included.
pub fn encode_entry(entry: &LogEntry) -> BytesMut {
    let mut body = BytesMut::new();
    let key = entry.key.clone().unwrap_or_default();

    match entry.operation {
        LogOperation::Clear => {}
        LogOperation::Remove => {
            put_varint(&mut body, key.len() as u64);
            body.put_slice(&key);
        }
        LogOperation::Set => {
            let value = entry.value.clone().unwrap_or_default();
            put_varint(&mut body, key.len() as u64);
            put_varint(&mut body, (value.len() + EXPIRE_SIZE) as u64);
            body.put_slice(&key);
            let xt = entry.expire.unwrap_or(0).to_be_bytes();
            body.put_slice(&xt[8 - EXPIRE_SIZE..]);
            body.put_slice(&value);
        }
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4 + ENTRY_HEADER_SIZE + body.len());
    buf.put_u8(Magic::Replication.as_u8());
    buf.put_u64(entry.timestamp);
    buf.put_u32((ENTRY_HEADER_SIZE + body.len()) as u32);
    buf.put_u16(entry.sid);
    buf.put_u16(entry.db);
    buf.put_u8(entry.operation as u8);
    buf.put_slice(&body);
    buf
}

impl<R: Read> FrameReader<R> {
    /// Reads the single-byte acknowledgement that follows the request.
    pub fn read_replication_ack(&mut self) -> Result<(), ProtocolError> {
        self.expect_magic(Magic::Replication)
    }

    /// Reads the next frame of a replication stream.
    pub fn read_replication_event(&mut self) -> Result<ReplicationEvent, ProtocolError> {
        let magic = self.read_u8()?;
        let timestamp = self.read_u64()?;

        if magic == Magic::LogHeadReached.as_u8() {
            return Ok(ReplicationEvent::HeadReached { timestamp });
        }
        if magic != Magic::Replication.as_u8() {
            return Err(ProtocolError::UnexpectedMagic {
                expected: Magic::Replication.as_u8(),
                actual: magic,
            });
        }

        let size = self.read_u32()?;
        if size > MAX_FIELD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: MAX_FIELD_SIZE,
            });
        }
        if (size as usize) < ENTRY_HEADER_SIZE {
            return Err(ProtocolError::Malformed(format!(
                "log entry size {} smaller than its header",
                size
            )));
        }

        let sid = self.read_u16()?;
        let db = self.read_u16()?;
        let operation = LogOperation::try_from(self.read_u8()?)?;
        let body = self.read_bytes(size as usize - ENTRY_HEADER_SIZE)?;

        decode_entry(timestamp, sid, db, operation, body).map(ReplicationEvent::Entry)
    }
}
