//! Audit trail of protocol milestones.
//!
//! The agent reports four events and never formats them itself; sinks decide
//! where they go. [`MemoryAudit`] keeps them in order, which is enough to
//! check exclusion after a run: every `Entered` must be followed by the
//! matching `Exited` before any other node's `Entered`.

use ramutex_types::NodeId;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// A protocol milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    /// `node` broadcast a REQUEST stamped `clock`.
    RequestSent { node: NodeId, clock: u64 },
    /// `node` counted an ACK towards its pending request.
    AckReceived { node: NodeId },
    /// `node` entered the critical section.
    Entered { node: NodeId },
    /// `node` left the critical section.
    Exited { node: NodeId },
}

impl AuditEvent {
    pub fn node(&self) -> NodeId {
        match *self {
            Self::RequestSent { node, .. }
            | Self::AckReceived { node }
            | Self::Entered { node }
            | Self::Exited { node } => node,
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestSent { node, clock } => {
                write!(f, "Node {node} sending REQUEST with clock {clock}")
            }
            Self::AckReceived { node } => write!(f, "Node {node} received ACK"),
            Self::Entered { node } => write!(f, "Node {node} entering critical section"),
            Self::Exited { node } => write!(f, "Node {node} exiting critical section"),
        }
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync + 'static {
    fn record(&self, event: AuditEvent);
}

/// Emits every event as an `info` tracing record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, event: AuditEvent) {
        info!(target: "ramutex::audit", node = event.node(), "{event}");
    }
}

/// Appends `[LOG]` lines to a text file.
#[derive(Debug)]
pub struct FileAudit {
    file: Mutex<File>,
}

impl FileAudit {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAudit {
    fn record(&self, event: AuditEvent) {
        let line = format!("{} [LOG] {event}\n", chrono::Utc::now().to_rfc3339());
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = file.write_all(line.as_bytes()) {
            warn!(error = %e, "Audit: failed to write log line");
        }
    }
}

/// Keeps events in memory, in the order they were recorded.
#[derive(Debug, Default)]
pub struct MemoryAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Nodes in the order they entered the critical section.
    pub fn entry_order(&self) -> Vec<NodeId> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                AuditEvent::Entered { node } => Some(*node),
                _ => None,
            })
            .collect()
    }

    /// Highest number of nodes inside the critical section at once.
    pub fn max_concurrent_holders(&self) -> usize {
        let mut inside: Vec<NodeId> = Vec::new();
        let mut max = 0;
        for event in self.events() {
            match event {
                AuditEvent::Entered { node } => {
                    inside.push(node);
                    max = max.max(inside.len());
                }
                AuditEvent::Exited { node } => inside.retain(|n| *n != node),
                _ => {}
            }
        }
        max
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

/// Forwards every event to each inner sink.
#[derive(Default)]
pub struct FanoutAudit {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAudit {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn AuditSink>) {
        self.sinks.push(sink);
    }
}

impl AuditSink for FanoutAudit {
    fn record(&self, event: AuditEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}
