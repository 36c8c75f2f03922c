//! Test peers: a scripted single-connection TCP server for the binary
//! protocol and helpers around mockito for HTTP.

use crate::config::ConnectionConfig;
use crate::handler::ProtocolHandler;
use crate::http::HttpProtocolHandler;
use ktycoon_protocol::ValueCodec;
use mockito::ServerGuard;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

pub(crate) struct ScriptedServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    /// Accepts one connection and runs `script` against it on a thread.
    pub(crate) fn start<F>(script: F) -> Self
    where
        F: FnOnce(Peer) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            script(Peer { stream });
        });

        Self { addr, handle }
    }

    pub(crate) fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.addr.ip().to_string(), self.addr.port())
            .with_timeout(Duration::from_secs(5))
    }

    /// Waits for the script to finish, re-raising its assertion failures.
    pub(crate) fn join(self) {
        if let Err(panic) = self.handle.join() {
            std::panic::resume_unwind(panic);
        }
    }
}

pub(crate) struct Peer {
    stream: TcpStream,
}

impl Peer {
    pub(crate) fn read_exact(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).unwrap();
        buf
    }

    pub(crate) fn write(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    /// Reads until the client closes its side.
    pub(crate) fn read_to_close(&mut self) -> Vec<u8> {
        let mut buf = Vec::new();
        let _ = self.stream.read_to_end(&mut buf);
        buf
    }
}

/// Opens an HTTP handler against a mockito server.
pub(crate) fn open_http<V>(server: &ServerGuard, codec: ValueCodec<V>) -> HttpProtocolHandler<V> {
    let addr = server.host_with_port();
    let (host, port) = addr.rsplit_once(':').unwrap();
    let mut handler = HttpProtocolHandler::new(codec, true);
    assert!(handler
        .open(host, port.parse().unwrap(), Duration::from_secs(5))
        .unwrap());
    handler
}
