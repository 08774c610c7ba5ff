//! Listening side of the remote socket transport.
//!
//! A [`CompanionServer`] accepts any number of connections and reads one JSON
//! envelope per newline-terminated frame. Decoded messages go to a handler
//! closure, a channel, or straight into a mirror [`Timeline`]. There is no
//! authentication; bind it to loopback or a trusted network.

use crate::error::Result;
use crate::sinks::WireMessage;
use crate::timeline::Timeline;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Longest frame the listener accepts, excluding the newline. Longer frames
/// are dropped without closing the connection.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

type Handler = Arc<dyn Fn(WireMessage) + Send + Sync>;

pub struct CompanionServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl CompanionServer {
    /// Bind the listener. Use port 0 to let the OS pick one.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "Companion listening");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URIs a remote sink can connect to.
    pub fn bind_addresses(&self) -> Vec<String> {
        bind_addresses(self.local_addr)
    }

    /// Serve connections, passing every decoded message to `handler`.
    pub fn spawn<F>(self, handler: F) -> CompanionHandle
    where
        F: Fn(WireMessage) + Send + Sync + 'static,
    {
        let local_addr = self.local_addr;
        let task = tokio::spawn(accept_loop(self.listener, Arc::new(handler)));
        CompanionHandle { local_addr, task }
    }

    /// Serve connections, forwarding decoded messages to the returned receiver.
    pub fn spawn_channel(self) -> (CompanionHandle, mpsc::UnboundedReceiver<WireMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.spawn(move |message| {
            let _ = tx.send(message);
        });
        (handle, rx)
    }

    /// Serve connections, applying decoded messages to `timeline`.
    pub fn spawn_mirror(self, timeline: Arc<Timeline>) -> CompanionHandle {
        self.spawn(move |message| {
            let kind = message.message_type();
            if !timeline.apply_wire_message(message) {
                debug!(message_type = kind, "Mirror ignored message");
            }
        })
    }
}

/// A running companion listener.
pub struct CompanionHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl CompanionHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn bind_addresses(&self) -> Vec<String> {
        bind_addresses(self.local_addr)
    }

    /// Stop accepting and close every open connection.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

fn bind_addresses(addr: SocketAddr) -> Vec<String> {
    let mut uris = vec![format!("tcp://{}", addr)];
    if addr.ip().is_unspecified() {
        uris.push(format!("tcp://127.0.0.1:{}", addr.port()));
    }
    uris
}

async fn accept_loop(listener: TcpListener, handler: Handler) {
    // Dropping the set on abort tears down the per-connection tasks too.
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "Companion connection opened");
                    connections.spawn(serve_connection(stream, peer, Arc::clone(&handler)));
                }
                Err(e) => warn!(error = %e, "Companion accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, handler: Handler) {
    let mut reader = BufReader::new(stream);
    let mut frame = Vec::new();
    loop {
        frame.clear();
        let limit = MAX_FRAME_BYTES as u64 + 1;
        match (&mut reader).take(limit).read_until(b'\n', &mut frame).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(%peer, error = %e, "Companion connection failed");
                break;
            }
        }

        if frame.len() > MAX_FRAME_BYTES && !frame.ends_with(b"\n") {
            warn!(%peer, limit = MAX_FRAME_BYTES, "Dropping oversized companion frame");
            match skip_line(&mut reader).await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    warn!(%peer, error = %e, "Companion connection failed");
                    break;
                }
            }
        }

        let text = match std::str::from_utf8(&frame) {
            Ok(text) => text.trim(),
            Err(e) => {
                warn!(%peer, error = %e, "Skipping companion frame that is not UTF-8");
                continue;
            }
        };
        if text.is_empty() {
            continue;
        }
        match WireMessage::parse_lenient(text) {
            Some(message) => handler(message),
            None => warn!(%peer, "Skipping malformed companion frame"),
        }
    }
    debug!(%peer, "Companion connection closed");
}

/// Discard input up to and including the next newline. Returns `false` at
/// end of stream.
async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<bool> {
    let mut scratch = Vec::new();
    loop {
        scratch.clear();
        let read = (&mut *reader)
            .take(MAX_FRAME_BYTES as u64)
            .read_until(b'\n', &mut scratch)
            .await?;
        if read == 0 {
            return Ok(false);
        }
        if scratch.ends_with(b"\n") {
            return Ok(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_addresses() {
        let specific: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(bind_addresses(specific), vec!["tcp://127.0.0.1:9000"]);

        let any: SocketAddr = "0.0.0.0:9000".parse().unwrap();
        assert_eq!(
            bind_addresses(any),
            vec!["tcp://0.0.0.0:9000", "tcp://127.0.0.1:9000"]
        );
    }
}
