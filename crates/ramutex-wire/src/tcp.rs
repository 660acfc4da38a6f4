//! TcpTransport: one TCP connection per message.
//!
//! Sending opens a fresh connection to the target, writes a single frame and
//! closes it. There is no pooling, no retry and no delivery confirmation
//! beyond the local write; the protocol above does not depend on ordering
//! between two messages to the same peer, so stateless connections keep the
//! transport trivial.
//!
//! The server accepts connections and reads each one until EOF, handing every
//! complete frame to the registered [`MessageHandler`]. The number of
//! connections served at once is bounded by a semaphore: when it is
//! exhausted the accept loop stops accepting until a connection finishes.

use crate::frame::{encode_frame, FrameBuffer};
use crate::transport::{MessageHandler, Transport, WireError};

use async_trait::async_trait;
use ramutex_types::config::{PeerDirectory, TransportConfig};
use ramutex_types::NodeId;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Size of a single socket read.
const READ_CHUNK: usize = 1024;

/// Back-off after a failed `accept`.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Transport over plain TCP with a static peer directory.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    directory: PeerDirectory,
    config: TransportConfig,
}

impl TcpTransport {
    pub fn new(directory: PeerDirectory, config: TransportConfig) -> Self {
        Self { directory, config }
    }

    /// Send one payload, reporting any failure to the caller.
    ///
    /// [`Transport::send_message`] wraps this and only logs the error.
    pub async fn try_send(&self, target: NodeId, payload: &str) -> Result<(), WireError> {
        let addr = self
            .directory
            .get(target)
            .ok_or(WireError::UnknownPeer(target))?;
        let frame = encode_frame(payload)?;

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let connect = TcpStream::connect((addr.host.as_str(), addr.port));
        let mut stream = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| WireError::ConnectTimeout {
                peer: target,
                timeout_ms: self.config.connect_timeout_ms,
            })??;
        stream.write_all(&frame).await?;
        stream.shutdown().await?;
        Ok(())
    }

    /// Bind `listen_addr` and start serving inbound connections.
    pub async fn start_server(
        &self,
        listen_addr: SocketAddr,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<ServerHandle, WireError> {
        let listener = TcpListener::bind(listen_addr).await?;
        self.serve(listener, handler)
    }

    /// Start serving on an already bound listener.
    pub fn serve(
        &self,
        listener: TcpListener,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<ServerHandle, WireError> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Transport: listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let limits = Arc::new(Semaphore::new(self.config.max_connections));
        let max_frame = self.config.max_frame_bytes;

        let task = tokio::spawn(async move {
            accept_loop(listener, handler, limits, max_frame, shutdown_rx).await;
        });

        Ok(ServerHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send_message(&self, target: NodeId, payload: &str) {
        if let Err(e) = self.try_send(target, payload).await {
            match e {
                WireError::UnknownPeer(_) => warn!(peer = target, "Transport: peer not found"),
                other => warn!(peer = target, error = %other, "Transport: send failed"),
            }
        }
    }

    fn peers(&self) -> Vec<NodeId> {
        self.directory.ids()
    }
}

/// A running server. Dropping the handle also stops the accept loop.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The bound address (useful when binding to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wait for the accept loop to exit.
    ///
    /// Connections already accepted are served until their peers close them.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Transport: accept loop panicked");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn MessageHandler>,
    limits: Arc<Semaphore>,
    max_frame: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = Arc::clone(&limits).acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };

        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                debug!(%addr, "Transport: accepted connection");
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let _permit = permit;
                    match read_frames(stream, max_frame, &*handler).await {
                        Ok(frames) => debug!(%addr, frames, "Transport: connection closed"),
                        Err(e) => warn!(%addr, error = %e, "Transport: connection dropped"),
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Transport: accept error");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
    info!("Transport: listener stopped");
}

/// Read `reader` to EOF, invoking `handler` once per complete frame.
///
/// Returns the number of frames delivered. Oversized and non-UTF-8 frames are
/// dropped with a warning and reading continues; an unterminated tail at EOF
/// is discarded. Only an I/O error ends the connection early.
pub async fn read_frames<R>(
    mut reader: R,
    max_frame: usize,
    handler: &dyn MessageHandler,
) -> Result<usize, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameBuffer::new(max_frame);
    let mut chunk = [0u8; READ_CHUNK];
    let mut delivered = 0;

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            if frames.pending() > 0 {
                debug!(
                    bytes = frames.pending(),
                    "Transport: discarding unterminated frame at EOF"
                );
            }
            return Ok(delivered);
        }

        frames.extend(&chunk[..n]);
        loop {
            let frame = match frames.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Transport: dropping oversized frame");
                    continue;
                }
            };
            match std::str::from_utf8(&frame) {
                Ok(text) => {
                    handler.on_message(text).await;
                    delivered += 1;
                }
                Err(_) => warn!(bytes = frame.len(), "Transport: dropping non-UTF-8 frame"),
            }
        }
    }
}
