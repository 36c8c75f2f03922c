//! # ktycoon-client
//!
//! Client library for Kyoto Tycoon.
//!
//! This crate provides:
//! - Blocking binary and HTTP protocol handlers behind one trait
//! - Server-side cursors over the HTTP RPC interface
//! - A replication log consumer
//! - Per-handler error state with exception or inspect mode

pub mod binary;
pub mod client;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod handler;
pub mod http;
pub mod replication;

#[cfg(test)]
mod test_support;

pub use binary::BinaryProtocolHandler;
pub use client::KyotoTycoon;
pub use config::{ClientConfig, ConnectionConfig};
pub use connection::Connection;
pub use cursor::Cursor;
pub use error::{ClientError, ErrorState};
pub use handler::{Concat, Db, Expire, ProtocolHandler};
pub use http::HttpProtocolHandler;
pub use replication::{LogStream, ReplicationConsumer, StreamCloser};

pub use ktycoon_protocol::{CodecKind, ErrorCode, LogEntry, LogOperation, ValueCodec};
