//! The seams between the wire layer and the agent.

use async_trait::async_trait;
use ramutex_types::NodeId;
use thiserror::Error;

/// Errors from the wire layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unknown peer: {0}")]
    UnknownPeer(NodeId),
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("Payload contains the frame delimiter")]
    EmbeddedDelimiter,
    #[error("Connecting to peer {peer} timed out after {timeout_ms} ms")]
    ConnectTimeout { peer: NodeId, timeout_ms: u64 },
}

/// Outbound half: deliver payloads to peers by id.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Deliver one payload to `target`.
    ///
    /// Never fails from the caller's point of view: an unknown peer or an
    /// I/O error is logged and the payload is lost.
    async fn send_message(&self, target: NodeId, payload: &str);

    /// Ids of every other participant, ascending.
    fn peers(&self) -> Vec<NodeId>;
}

/// Inbound half: invoked once per complete frame.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_message(&self, raw: &str);
}
