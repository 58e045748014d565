//! TCP listener for monitor connections.
//!
//! Each accepted connection gets its own task that reassembles envelopes
//! with [`EnvelopeDecoder`] and writes one reply per answered request. A
//! malformed stream drops that connection only.

// Rust guideline compliant 2026-02

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::msg::framing::EnvelopeDecoder;

/// Read buffer per connection.
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Monitor listener bound to a TCP address.
#[derive(Debug)]
pub struct SignalServer {
    local_addr: SocketAddr,
    accept_handle: JoinHandle<()>,
}

impl SignalServer {
    /// Bind `addr` and start accepting on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(addr: &str, shutdown: Arc<AtomicBool>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind monitor listener on {addr}"))?;
        let local_addr = listener.local_addr().context("Failed to read bound address")?;
        log::info!("[signal] listening on {local_addr}");

        let accept_handle = tokio::spawn(Self::accept_loop(listener, shutdown));
        Ok(Self {
            local_addr,
            accept_handle,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting. Connections already open finish on their own.
    pub fn shutdown(self) {
        self.accept_handle.abort();
    }

    async fn accept_loop(listener: TcpListener, shutdown: Arc<AtomicBool>) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    log::info!("[signal] monitor connected from {peer}");
                    tokio::spawn(serve_connection(stream, Arc::clone(&shutdown)));
                }
                Err(e) => {
                    log::error!("[signal] accept error: {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }
}

/// Answer requests on one connection until EOF, a bad stream, or shutdown.
pub async fn serve_connection(mut stream: TcpStream, shutdown: Arc<AtomicBool>) {
    let mut decoder = EnvelopeDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => {
                log::info!("[signal] monitor disconnected");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                log::warn!("[signal] read error: {e}");
                break;
            }
        };

        let envelopes = match decoder.feed(&buf[..n]) {
            Ok(envelopes) => envelopes,
            Err(e) => {
                log::warn!("[signal] dropping connection: {e:#}");
                break;
            }
        };

        for envelope in envelopes {
            let Some(reply) = super::respond(&envelope, &shutdown) else {
                continue;
            };
            if let Err(e) = stream.write_all(&reply.encode()).await {
                log::warn!("[signal] write error: {e}");
                return;
            }
        }

        if shutdown.load(Ordering::SeqCst) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{Envelope, UserCommand};

    async fn roundtrip(stream: &mut TcpStream, decoder: &mut EnvelopeDecoder, request: Envelope) -> Envelope {
        stream.write_all(&request.encode()).await.unwrap();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "server closed early");
            if let Some(reply) = decoder.feed(&buf[..n]).unwrap().into_iter().next() {
                return reply;
            }
        }
    }

    #[tokio::test]
    async fn test_ping_and_shutdown_over_tcp() {
        let flag = Arc::new(AtomicBool::new(false));
        let server = SignalServer::start("127.0.0.1:0", Arc::clone(&flag)).await.unwrap();
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
        let mut decoder = EnvelopeDecoder::new();

        let ping = Envelope::UserCommand(UserCommand {
            sequence: 5,
            app_id: 1,
            inner: Box::new(Envelope::Ping),
        });
        let reply = roundtrip(&mut stream, &mut decoder, ping).await;
        assert_eq!(
            reply,
            Envelope::UserCommandAck(UserCommand {
                sequence: 5,
                app_id: 1,
                inner: Box::new(Envelope::Pong),
            })
        );

        let stop = Envelope::UserCommand(UserCommand {
            sequence: 6,
            app_id: 1,
            inner: Box::new(Envelope::Shutdown),
        });
        let reply = roundtrip(&mut stream, &mut decoder, stop).await;
        assert!(matches!(reply, Envelope::UserCommandAck(ref c) if c.sequence == 6));
        assert!(flag.load(Ordering::SeqCst));

        server.shutdown();
    }

    #[tokio::test]
    async fn test_garbage_drops_only_that_connection() {
        let flag = Arc::new(AtomicBool::new(false));
        let server = SignalServer::start("127.0.0.1:0", Arc::clone(&flag)).await.unwrap();

        let mut bad = TcpStream::connect(server.local_addr()).await.unwrap();
        bad.write_all(&[0xff, 0xff, 0, 0, 0, 0]).await.unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(bad.read(&mut buf).await.unwrap_or(0), 0);

        let mut good = TcpStream::connect(server.local_addr()).await.unwrap();
        let mut decoder = EnvelopeDecoder::new();
        let ping = Envelope::UserCommand(UserCommand {
            sequence: 1,
            app_id: 2,
            inner: Box::new(Envelope::Ping),
        });
        let reply = roundtrip(&mut good, &mut decoder, ping).await;
        assert!(matches!(reply, Envelope::UserCommandAck(_)));
        server.shutdown();
    }
}
