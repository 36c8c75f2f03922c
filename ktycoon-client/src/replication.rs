//! Replication log consumer.
//!
//! Opens a dedicated binary connection, asks the server for every log entry
//! since a timestamp and yields them one by one. The stream never ends on its
//! own: a pull blocks until the server sends the next entry. Closing the
//! socket through a [`StreamCloser`] is the only way to stop a blocked pull.

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::ClientError;
use ktycoon_protocol::replication::encode_request;
use ktycoon_protocol::{ErrorCode, LogEntry, Magic, ReplicationEvent};
use std::net::{Shutdown, TcpStream};

/// Follows a server's transaction log under a source id.
#[derive(Debug, Clone)]
pub struct ReplicationConsumer {
    sid: u16,
    config: ConnectionConfig,
}

impl ReplicationConsumer {
    pub fn new(sid: u16, config: ConnectionConfig) -> Self {
        Self { sid, config }
    }

    pub fn sid(&self) -> u16 {
        self.sid
    }

    /// Connects and starts the stream at `since` (nanoseconds since the
    /// epoch), or at the current time.
    pub fn consume(&self, since: Option<u64>) -> Result<LogStream, ClientError> {
        let start = since.unwrap_or_else(now_nanos);
        let mut conn = Connection::connect(&self.config)?;

        tracing::debug!(
            "Requesting replication log since {} as sid {}",
            start,
            self.sid
        );
        conn.send(&encode_request(start, self.sid))?;
        conn.reader().read_replication_ack()?;

        Ok(LogStream { conn, done: false })
    }
}

/// Blocking iterator over decoded log entries.
///
/// Heartbeats are answered internally and never surface. After the first
/// error the iterator is exhausted.
pub struct LogStream {
    conn: Connection,
    done: bool,
}

impl LogStream {
    /// A handle that can stop this stream from another thread.
    pub fn closer(&self) -> Result<StreamCloser, ClientError> {
        Ok(StreamCloser {
            stream: self.conn.try_clone_stream()?,
        })
    }

    /// Shuts the socket down. The next pull fails with a network error,
    /// after which the stream is exhausted.
    pub fn close(&mut self) -> Result<(), ClientError> {
        self.conn.shutdown()
    }

    fn next_entry(&mut self) -> Result<LogEntry, ClientError> {
        loop {
            match self.conn.reader().read_replication_event()? {
                ReplicationEvent::HeadReached { timestamp } => {
                    tracing::debug!("Log head reached at {}", timestamp);
                    self.conn.send(&[Magic::Replication.as_u8()])?;
                }
                ReplicationEvent::Entry(entry) => return Ok(entry),
            }
        }
    }
}

impl Iterator for LogStream {
    type Item = Result<LogEntry, ClientError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.next_entry() {
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                if e.code() != ErrorCode::Network {
                    tracing::warn!("Replication stream failed: {}", e);
                }
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for LogStream {}

/// Shuts a [`LogStream`]'s socket down, unblocking a pending pull.
#[derive(Debug)]
pub struct StreamCloser {
    stream: TcpStream,
}

impl StreamCloser {
    pub fn close(&self) -> Result<(), ClientError> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(ClientError::Io(e)),
        }
    }
}

fn now_nanos() -> u64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .and_then(|ns| u64::try_from(ns).ok())
        .unwrap_or(0)
}
