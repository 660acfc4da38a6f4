//! Kernel-specific error types.

use crate::agent::AgentPhase;
use ramutex_types::error::RamutexError;
use ramutex_types::NodeId;
use ramutex_wire::WireError;
use thiserror::Error;

/// Kernel error type wrapping the lower layers' errors.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A wrapped configuration or codec error.
    #[error(transparent)]
    Ramutex(#[from] RamutexError),

    /// The transport could not be started.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The agent is in the wrong phase for the requested operation.
    #[error("Node {node} is in phase '{current}', cannot {operation}")]
    InvalidState {
        node: NodeId,
        current: AgentPhase,
        operation: &'static str,
    },
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;
