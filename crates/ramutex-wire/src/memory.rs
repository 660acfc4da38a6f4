//! In-process transport for simulations and tests.
//!
//! A [`MemoryNetwork`] keeps one inbox per attached node. Every delivered
//! payload is handed to the node's handler on its own task, mirroring the
//! one-task-per-connection model of the TCP server. With jitter enabled each
//! payload is delayed by a random amount first, so messages between the same
//! pair of nodes can overtake each other. [`MemoryNetwork::pause`] holds every
//! payload back until [`MemoryNetwork::resume`], which lets a test line up
//! events that must happen "simultaneously".

use crate::transport::{MessageHandler, Transport};

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use ramutex_types::NodeId;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Hub connecting any number of in-process nodes.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    inboxes: DashMap<NodeId, mpsc::UnboundedSender<String>>,
    max_jitter: Option<Duration>,
    delivered: AtomicU64,
    dropped: AtomicU64,
    paused: AtomicBool,
    held: Mutex<Vec<(mpsc::UnboundedSender<String>, String)>>,
}

impl MemoryNetwork {
    /// Network delivering payloads immediately.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Network delaying each payload by a random duration up to `max_jitter`.
    pub fn with_jitter(max_jitter: Duration) -> Arc<Self> {
        Arc::new(Self {
            max_jitter: Some(max_jitter),
            ..Self::default()
        })
    }

    /// Transport for node `id` that can reach `peers`.
    pub fn transport(self: &Arc<Self>, id: NodeId, peers: Vec<NodeId>) -> Arc<MemoryTransport> {
        let mut peers = peers;
        peers.sort_unstable();
        peers.dedup();
        peers.retain(|p| *p != id);
        Arc::new(MemoryTransport {
            id,
            peers,
            network: Arc::clone(self),
        })
    }

    /// Start delivering payloads addressed to `id` to `handler`.
    ///
    /// Payloads sent before a node is attached are dropped.
    pub fn attach(&self, id: NodeId, handler: Arc<dyn MessageHandler>) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.inboxes.insert(id, tx);
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    handler.on_message(&payload).await;
                });
            }
            debug!(node = id, "MemoryNetwork: inbox closed");
        })
    }

    /// Stop delivering to `id`; later payloads for it are dropped.
    pub fn detach(&self, id: NodeId) {
        self.inboxes.remove(&id);
    }

    /// Hold back every payload until [`MemoryNetwork::resume`].
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Deliver everything held back while paused, in send order.
    pub fn resume(&self) {
        let held = {
            let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
            self.paused.store(false, Ordering::SeqCst);
            std::mem::take(&mut *held)
        };
        for (inbox, payload) in held {
            self.forward(inbox, payload);
        }
    }

    /// Payloads handed to an inbox so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Payloads lost because the target had no inbox.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn deliver(&self, from: NodeId, target: NodeId, payload: String) {
        let Some(inbox) = self.inboxes.get(&target).map(|tx| tx.clone()) else {
            warn!(from, peer = target, "MemoryNetwork: no inbox, payload dropped");
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        self.delivered.fetch_add(1, Ordering::Relaxed);

        if self.paused.load(Ordering::SeqCst) {
            let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
            if self.paused.load(Ordering::SeqCst) {
                held.push((inbox, payload));
                return;
            }
        }
        self.forward(inbox, payload);
    }

    fn forward(&self, inbox: mpsc::UnboundedSender<String>, payload: String) {
        match self.max_jitter {
            Some(max) if !max.is_zero() => {
                let delay = rand::thread_rng().gen_range(Duration::ZERO..=max);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = inbox.send(payload);
                });
            }
            _ => {
                let _ = inbox.send(payload);
            }
        }
    }
}

/// One node's view of a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryTransport {
    id: NodeId,
    peers: Vec<NodeId>,
    network: Arc<MemoryNetwork>,
}

impl MemoryTransport {
    pub fn id(&self) -> NodeId {
        self.id
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_message(&self, target: NodeId, payload: &str) {
        if !self.peers.contains(&target) {
            warn!(node = self.id, peer = target, "MemoryNetwork: peer not found");
            return;
        }
        self.network.deliver(self.id, target, payload.to_string());
    }

    fn peers(&self) -> Vec<NodeId> {
        self.peers.clone()
    }
}
