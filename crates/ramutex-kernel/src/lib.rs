//! ramutex kernel: the per-node mutual-exclusion agent.
//!
//! Each participant runs one [`MutexAgent`] implementing the Ricart–Agrawala
//! protocol: a requester broadcasts a timestamped REQUEST and enters once
//! every other participant has acknowledged it. Conflicting requests are
//! ordered by `(logical_clock, sender_id)`; the loser's ACK is deferred until
//! the winner releases.
//!
//! # Invariants
//!
//! 1. **Exclusion**: an agent enters only after collecting an ACK from every
//!    other participant for its current request.
//! 2. **One ACK per request**: every REQUEST is acknowledged exactly once,
//!    immediately or when the deferring agent releases.
//! 3. **Monotonic clock**: the Lamport clock strictly increases on every
//!    send and receive.

pub mod agent;
pub mod audit;
pub mod clock;
pub mod driver;
pub mod error;
pub mod node;
pub mod resource;

pub use agent::{AgentOptions, AgentPhase, AgentSnapshot, MutexAgent};
pub use audit::{AuditEvent, AuditSink, FanoutAudit, FileAudit, MemoryAudit, TracingAudit};
pub use clock::LamportClock;
pub use driver::RequestDriver;
pub use error::{KernelError, KernelResult};
pub use node::Node;
pub use resource::{SharedResource, SimulatedTrack};
