//! Remote socket sink: mirrors timeline mutations to a companion process.
//!
//! Frames are single-line JSON envelopes terminated by `\n`. Connecting is
//! the only async step; after that the hooks hand frames to a writer task and
//! return immediately. Write failures are reported through the status
//! callback and never reach the timeline. There is no reconnection: after a
//! failure the caller connects a fresh sink and registers it.

use super::{TimelineEvent, TimelineSink, WireMessage};
use crate::config::RemoteSinkConfig;
use crate::error::{Result, TimelineError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Connection state reported to the status callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkStatus {
    Connected { uri: String },
    Error(String),
    Closed,
}

type StatusCallback = Arc<dyn Fn(SinkStatus) + Send + Sync>;

pub struct RemoteSocketSink {
    uri: String,
    sender: Mutex<Option<mpsc::UnboundedSender<String>>>,
    disposed: AtomicBool,
    status: StatusCallback,
}

impl fmt::Debug for RemoteSocketSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSocketSink")
            .field("uri", &self.uri)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl RemoteSocketSink {
    /// Open the connection. Must be called inside a tokio runtime.
    ///
    /// Fails with `InvalidUri`, `Connection` or `ConnectTimeout`; the caller
    /// decides whether to retry.
    pub async fn connect<F>(config: RemoteSinkConfig, on_status: F) -> Result<Self>
    where
        F: Fn(SinkStatus) + Send + Sync + 'static,
    {
        let address = parse_uri(&config.uri)?;
        let stream =
            match tokio::time::timeout(config.connect_timeout, TcpStream::connect(&address)).await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    return Err(TimelineError::Connection {
                        uri: config.uri,
                        reason: e.to_string(),
                    })
                }
                Err(_) => {
                    return Err(TimelineError::ConnectTimeout {
                        uri: config.uri,
                        timeout: config.connect_timeout,
                    })
                }
            };
        let _ = stream.set_nodelay(true);

        let status: StatusCallback = Arc::new(on_status);
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(stream, receiver, Arc::clone(&status)));

        debug!(uri = %config.uri, "Remote sink connected");
        status(SinkStatus::Connected {
            uri: config.uri.clone(),
        });

        Ok(Self {
            uri: config.uri,
            sender: Mutex::new(Some(sender)),
            disposed: AtomicBool::new(false),
            status,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Close the connection. Later hook calls are ignored.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the sender lets the writer flush what is queued and close.
        self.sender.lock().take();
    }

    /// Queue a message for the writer task.
    pub fn send(&self, message: &WireMessage) -> Result<()> {
        if self.is_disposed() {
            return Err(TimelineError::SinkDisposed);
        }
        let frame = message.to_frame()?;
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| TimelineError::Connection {
                uri: self.uri.clone(),
                reason: "connection closed".into(),
            }),
            None => Err(TimelineError::SinkDisposed),
        }
    }
}

impl TimelineSink for RemoteSocketSink {
    fn handle(&self, event: &TimelineEvent) {
        if self.is_disposed() {
            return;
        }
        let Some(message) = WireMessage::from_event(event) else {
            return;
        };
        match self.send(&message) {
            Ok(()) | Err(TimelineError::SinkDisposed) => {}
            Err(e) => {
                warn!(uri = %self.uri, error = %e, "Remote sink write failed");
                (self.status)(SinkStatus::Error(e.to_string()));
            }
        }
    }
}

impl Drop for RemoteSocketSink {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn write_loop(
    mut stream: TcpStream,
    mut frames: mpsc::UnboundedReceiver<String>,
    status: StatusCallback,
) {
    while let Some(frame) = frames.recv().await {
        let written = async {
            stream.write_all(frame.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(error = %e, "Remote sink connection lost");
            status(SinkStatus::Error(e.to_string()));
            return;
        }
    }
    let _ = stream.shutdown().await;
    status(SinkStatus::Closed);
}

/// Accepts `tcp://host:port` or bare `host:port`.
pub(crate) fn parse_uri(uri: &str) -> Result<String> {
    let rest = match uri.split_once("://") {
        Some(("tcp", rest)) => rest,
        Some((scheme, _)) => {
            return Err(TimelineError::InvalidUri(format!(
                "unsupported scheme '{}' in {}",
                scheme, uri
            )))
        }
        None => uri,
    };
    let address = rest.trim_end_matches('/');
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(address.to_string())
        }
        _ => Err(TimelineError::InvalidUri(uri.to_string())),
    }
}
