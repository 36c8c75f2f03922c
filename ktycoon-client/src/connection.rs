//! Blocking TCP connection used by the binary protocol.

use crate::config::ConnectionConfig;
use crate::error::ClientError;
use ktycoon_protocol::FrameReader;
use std::io::{BufReader, ErrorKind, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// A connection to a Kyoto Tycoon server.
///
/// Reads go through a buffered [`FrameReader`] over a clone of the socket;
/// writes go straight to the socket.
pub struct Connection {
    config: ConnectionConfig,
    writer: TcpStream,
    reader: FrameReader<BufReader<TcpStream>>,
}

impl Connection {
    /// Connects to the server, trying every resolved address in turn.
    pub fn connect(config: &ConnectionConfig) -> Result<Self, ClientError> {
        tracing::debug!("Connecting to {}...", config.addr());

        let timeout = non_zero(config.timeout);
        let mut last_err = None;
        let mut stream = None;

        for addr in config.addr().to_socket_addrs()? {
            let attempt = match timeout {
                Some(t) => TcpStream::connect_timeout(&addr, t),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    tracing::debug!("Connection to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        let stream = match stream {
            Some(s) => s,
            None => {
                return Err(ClientError::Io(last_err.unwrap_or_else(|| {
                    std::io::Error::new(ErrorKind::NotFound, "no address resolved")
                })))
            }
        };

        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        stream.set_nodelay(true).ok();

        let reader = FrameReader::new(BufReader::new(stream.try_clone()?));
        tracing::debug!("Connected to {}", config.addr());

        Ok(Self {
            config: config.clone(),
            writer: stream,
            reader,
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Writes a whole request.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn reader(&mut self) -> &mut FrameReader<BufReader<TcpStream>> {
        &mut self.reader
    }

    /// A handle on the same socket, usable from another thread to shut it down.
    pub fn try_clone_stream(&self) -> Result<TcpStream, ClientError> {
        Ok(self.writer.try_clone()?)
    }

    /// Shuts both directions down; blocked reads on any handle return.
    pub fn shutdown(&self) -> Result<(), ClientError> {
        match self.writer.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(ClientError::Io(e)),
        }
    }
}

/// Socket APIs reject a zero timeout; treat it as "no timeout".
fn non_zero(timeout: Duration) -> Option<Duration> {
    if timeout.is_zero() {
        None
    } else {
        Some(timeout)
    }
}
