//! MutexAgent: one participant of the Ricart–Agrawala protocol.
//!
//! The agent cycles through `Idle → Requesting → InCriticalSection → Idle`.
//! State shared between the requesting task and the inbound handlers lives in
//! two places:
//!
//! - the [`LamportClock`], behind its own lock, touched on every send and
//!   receive;
//! - a single [`RequestState`] block behind a second lock, paired with a
//!   [`Notify`] that wakes the requester once the last ACK arrives.
//!
//! No lock is held across an `.await`. Lock order, where both are taken, is
//! state then clock.

use crate::audit::{AuditEvent, AuditSink};
use crate::clock::LamportClock;
use crate::error::{KernelError, KernelResult};
use crate::resource::SharedResource;

use async_trait::async_trait;
use futures::future::join_all;
use ramutex_types::message::{decode_message, encode_message, Message, MessageType};
use ramutex_types::NodeId;
use ramutex_wire::{MessageHandler, Transport};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Where an agent is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentPhase {
    Idle,
    /// REQUEST broadcast, waiting for ACKs.
    Requesting,
    /// Every ACK collected; the resource is ours until release.
    InCriticalSection,
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Requesting => write!(f, "requesting"),
            Self::InCriticalSection => write!(f, "in_critical_section"),
        }
    }
}

/// Tunables for a [`MutexAgent`].
#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    /// Carried in every REQUEST. Once a request has waited this long the
    /// agent warns about the peers still missing; it keeps waiting.
    pub request_deadline: Option<Duration>,
}

/// Point-in-time copy of an agent's protocol state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSnapshot {
    pub id: NodeId,
    pub clock: u64,
    pub phase: AgentPhase,
    pub requesting: bool,
    /// Timestamp of the outstanding request, if any.
    pub my_request_ts: Option<u64>,
    pub ack_count: usize,
    /// Peers whose REQUEST is waiting for our release, in arrival order.
    pub deferred_acks: Vec<NodeId>,
}

#[derive(Debug)]
struct RequestState {
    phase: AgentPhase,
    my_request_ts: u64,
    /// Peers that acknowledged the current request.
    acked_by: BTreeSet<NodeId>,
    deferred_acks: Vec<NodeId>,
    /// Set while `enter_critical_section` runs the resource hook.
    working: bool,
}

impl RequestState {
    fn requesting(&self) -> bool {
        self.phase != AgentPhase::Idle
    }
}

enum AckOutcome {
    Counted(usize),
    Complete,
    Duplicate,
    Stale,
}

/// A single participant.
pub struct MutexAgent {
    id: NodeId,
    /// Every other participant, ascending. Fixed at construction.
    peers: Vec<NodeId>,
    clock: LamportClock,
    state: Mutex<RequestState>,
    acks_ready: Notify,
    transport: Arc<dyn Transport>,
    audit: Arc<dyn AuditSink>,
    resource: Arc<dyn SharedResource>,
    options: AgentOptions,
}

impl MutexAgent {
    /// Create an idle agent. The peer set is taken from `transport`.
    pub fn new(
        id: NodeId,
        transport: Arc<dyn Transport>,
        audit: Arc<dyn AuditSink>,
        resource: Arc<dyn SharedResource>,
        options: AgentOptions,
    ) -> Arc<Self> {
        let mut peers = transport.peers();
        peers.retain(|p| *p != id);
        peers.sort_unstable();
        peers.dedup();

        Arc::new(Self {
            id,
            peers,
            clock: LamportClock::new(),
            state: Mutex::new(RequestState {
                phase: AgentPhase::Idle,
                my_request_ts: 0,
                acked_by: BTreeSet::new(),
                deferred_acks: Vec::new(),
                working: false,
            }),
            acks_ready: Notify::new(),
            transport,
            audit,
            resource,
            options,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn peers(&self) -> &[NodeId] {
        &self.peers
    }

    /// Total participant count, this agent included.
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        let state = self.lock_state();
        AgentSnapshot {
            id: self.id,
            clock: self.clock.now(),
            phase: state.phase,
            requesting: state.requesting(),
            my_request_ts: state.requesting().then_some(state.my_request_ts),
            ack_count: state.acked_by.len(),
            deferred_acks: state.deferred_acks.clone(),
        }
    }

    /// One full cycle: request, use the resource, release.
    pub async fn run_round(&self) -> KernelResult<()> {
        self.request_critical_section().await?;
        self.enter_critical_section().await
    }

    /// Broadcast a REQUEST and wait until every peer has acknowledged it.
    ///
    /// Valid only while idle. There is no timeout: if a peer never answers,
    /// this never returns.
    pub async fn request_critical_section(&self) -> KernelResult<()> {
        let ts = {
            let mut state = self.lock_state();
            if state.phase != AgentPhase::Idle {
                return Err(self.invalid_state(state.phase, "request the critical section"));
            }
            let ts = self.clock.tick();
            state.phase = AgentPhase::Requesting;
            state.my_request_ts = ts;
            state.acked_by.clear();
            ts
        };

        info!(node = self.id, clock = ts, "Sending REQUEST");
        self.audit
            .record(AuditEvent::RequestSent { node: self.id, clock: ts });

        let deadline_ms = self
            .options
            .request_deadline
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.broadcast(Message::request(self.id, ts, deadline_ms))
            .await;

        self.wait_for_acks().await;

        let mut state = self.lock_state();
        state.phase = AgentPhase::InCriticalSection;
        Ok(())
    }

    /// Use the shared resource, then release.
    ///
    /// Valid only after [`MutexAgent::request_critical_section`] returned and
    /// while no other call of this method is running.
    pub async fn enter_critical_section(&self) -> KernelResult<()> {
        {
            let mut state = self.lock_state();
            if state.phase != AgentPhase::InCriticalSection || state.working {
                return Err(self.invalid_state(state.phase, "enter the critical section"));
            }
            state.working = true;
        }

        info!(node = self.id, "Entering critical section");
        self.audit.record(AuditEvent::Entered { node: self.id });

        self.resource.access(self.id).await;

        self.lock_state().working = false;
        self.release_critical_section().await
    }

    /// Leave the critical section: broadcast RELEASE, then send every
    /// deferred ACK exactly once.
    pub async fn release_critical_section(&self) -> KernelResult<()> {
        let (clock, deferred) = {
            let mut state = self.lock_state();
            if state.phase != AgentPhase::InCriticalSection || state.working {
                return Err(self.invalid_state(state.phase, "release the critical section"));
            }
            state.phase = AgentPhase::Idle;
            state.acked_by.clear();
            let deferred = std::mem::take(&mut state.deferred_acks);
            (self.clock.tick(), deferred)
        };

        info!(node = self.id, clock, deferred = ?deferred, "Sending RELEASE");
        self.audit.record(AuditEvent::Exited { node: self.id });

        self.broadcast(Message::release(self.id, clock)).await;
        for peer in deferred {
            self.send_ack(peer).await;
        }
        Ok(())
    }

    /// Decode one inbound payload and dispatch it.
    ///
    /// Malformed payloads and messages from ids outside the peer set are
    /// logged and dropped without touching any state.
    pub async fn on_receive_message(&self, raw: &str) {
        let msg = match decode_message(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(node = self.id, error = %e, raw, "Dropping malformed message");
                return;
            }
        };
        if !self.peers.contains(&msg.sender_id) {
            warn!(
                node = self.id,
                sender = msg.sender_id,
                "Dropping message from unknown sender"
            );
            return;
        }

        match msg.kind {
            MessageType::Request => self.on_receive_request(msg).await,
            MessageType::Ack => self.on_receive_ack(msg),
            MessageType::Release => self.on_receive_release(msg),
        }
    }

    /// Answer a REQUEST now, or defer the answer if our own pending request
    /// has priority (lower timestamp, then lower id).
    pub async fn on_receive_request(&self, msg: Message) {
        let clock = self.clock.observe(msg.logical_clock);

        let deferred = {
            let mut state = self.lock_state();
            let defer = state.requesting()
                && (state.my_request_ts, self.id) < (msg.logical_clock, msg.sender_id);
            if defer && !state.deferred_acks.contains(&msg.sender_id) {
                state.deferred_acks.push(msg.sender_id);
            }
            defer
        };

        if deferred {
            debug!(
                node = self.id,
                peer = msg.sender_id,
                their_ts = msg.logical_clock,
                clock,
                "Deferring ACK"
            );
        } else {
            self.send_ack(msg.sender_id).await;
        }
    }

    /// Count an ACK towards the pending request.
    pub fn on_receive_ack(&self, msg: Message) {
        self.clock.observe(msg.logical_clock);

        let outcome = {
            let mut state = self.lock_state();
            if state.phase != AgentPhase::Requesting {
                AckOutcome::Stale
            } else if !state.acked_by.insert(msg.sender_id) {
                AckOutcome::Duplicate
            } else if state.acked_by.len() == self.peers.len() {
                AckOutcome::Complete
            } else {
                AckOutcome::Counted(state.acked_by.len())
            }
        };

        match outcome {
            AckOutcome::Stale => {
                warn!(node = self.id, peer = msg.sender_id, "Ignoring ACK with no pending request");
                return;
            }
            AckOutcome::Duplicate => {
                warn!(node = self.id, peer = msg.sender_id, "Ignoring duplicate ACK");
                return;
            }
            AckOutcome::Counted(count) => {
                debug!(node = self.id, peer = msg.sender_id, count, "Received ACK");
            }
            AckOutcome::Complete => {
                debug!(node = self.id, peer = msg.sender_id, "Received final ACK");
                self.acks_ready.notify_one();
            }
        }
        self.audit.record(AuditEvent::AckReceived { node: self.id });
    }

    /// RELEASE only advances the clock; exclusion is enforced by ACK counting
    /// at the requester, so receivers track no ownership.
    pub fn on_receive_release(&self, msg: Message) {
        let clock = self.clock.observe(msg.logical_clock);
        debug!(node = self.id, peer = msg.sender_id, clock, "Received RELEASE");
    }

    async fn wait_for_acks(&self) {
        let needed = self.peers.len();
        let started = Instant::now();
        let mut warned = false;

        loop {
            let notified = self.acks_ready.notified();
            let have = self.lock_state().acked_by.len();
            if have >= needed {
                return;
            }

            match self.options.request_deadline {
                Some(deadline) if !warned => {
                    let remaining = deadline.saturating_sub(started.elapsed());
                    if tokio::time::timeout(remaining, notified).await.is_err() {
                        warned = true;
                        warn!(
                            node = self.id,
                            waited_ms = started.elapsed().as_millis() as u64,
                            missing = ?self.missing_acks(),
                            "Request past its deadline, still waiting for ACKs"
                        );
                    }
                }
                _ => notified.await,
            }
        }
    }

    fn missing_acks(&self) -> Vec<NodeId> {
        let state = self.lock_state();
        self.peers
            .iter()
            .copied()
            .filter(|p| !state.acked_by.contains(p))
            .collect()
    }

    async fn send_ack(&self, peer: NodeId) {
        let clock = self.clock.tick();
        debug!(node = self.id, peer, clock, "Sending ACK");
        let payload = encode_message(&Message::ack(self.id, clock));
        self.transport.send_message(peer, &payload).await;
    }

    async fn broadcast(&self, msg: Message) {
        let payload = encode_message(&msg);
        join_all(
            self.peers
                .iter()
                .map(|peer| self.transport.send_message(*peer, &payload)),
        )
        .await;
    }

    fn invalid_state(&self, current: AgentPhase, operation: &'static str) -> KernelError {
        KernelError::InvalidState {
            node: self.id,
            current,
            operation,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RequestState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MessageHandler for MutexAgent {
    async fn on_message(&self, raw: &str) {
        self.on_receive_message(raw).await;
    }
}
