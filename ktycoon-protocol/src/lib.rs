//! # ktycoon-protocol
//!
//! Wire protocol implementation for Kyoto Tycoon.
//!
//! This crate provides:
//! - Binary framing for the bulk and script operations (big-endian, opcode tagged)
//! - A blocking frame reader that distinguishes a lost peer from a short frame
//! - Replication log entry decoding, including the varint key/value sizes
//! - Tab-separated-value bodies for the HTTP RPC endpoints (`colenc` aware)
//! - Value codecs (pickle, JSON, string, bytes, custom)
//! - Error codes shared by every handler

pub mod codec;
pub mod error;
pub mod frame;
pub mod replication;
pub mod rpc;
pub mod tsv;
pub mod varint;

pub use codec::{CodecError, CodecKind, ValueCodec};
pub use error::{ErrorCode, ProtocolError};
pub use frame::{BulkRecord, FrameReader, Magic, DEFAULT_EXPIRE};
pub use replication::{LogEntry, LogOperation, ReplicationEvent};
pub use rpc::{RestMode, RpcMethod};
pub use tsv::ColumnEncoding;

/// Default port of a Kyoto Tycoon server.
pub const DEFAULT_PORT: u16 = 1978;

/// Default host of a Kyoto Tycoon server.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default socket timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum key or value size accepted when reading a binary frame (256 MiB).
pub const MAX_FIELD_SIZE: u32 = 256 * 1024 * 1024;
