//! ramutex wire layer: point-to-point delivery of framed messages.
//!
//! Payloads are newline-free text; each one travels as a single
//! newline-terminated frame. The layer knows nothing about the mutual
//! exclusion protocol.
//!
//! ## Architecture
//!
//! - **Transport**: trait the agent sends through
//! - **MessageHandler**: trait the agent receives through
//! - **TcpTransport**: one TCP connection per message, bounded inbound server
//! - **MemoryNetwork**: in-process hub for simulations and tests

pub mod frame;
pub mod memory;
pub mod tcp;
pub mod transport;

pub use frame::{encode_frame, FrameBuffer, FRAME_DELIMITER};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::{read_frames, ServerHandle, TcpTransport};
pub use transport::{MessageHandler, Transport, WireError};
