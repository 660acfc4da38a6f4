//! Multi-node scenarios over the in-process network and over real TCP.
//!
//! Every agent in a scenario shares one `MemoryAudit`, so the recorded event
//! order is the global order in which nodes entered and left the critical
//! section.

use async_trait::async_trait;
use ramutex_kernel::{
    AgentOptions, AgentPhase, AuditSink, KernelResult, MemoryAudit, MutexAgent, Node,
    SharedResource, SimulatedTrack,
};
use ramutex_types::config::{ClusterConfig, DriverConfig, NodeEntry, TransportConfig};
use ramutex_types::message::{decode_message, MessageType};
use ramutex_types::NodeId;
use ramutex_wire::{MemoryNetwork, Transport};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Resource that blocks each holder until the test hands out a permit.
struct GatedResource {
    gate: Semaphore,
}

impl GatedResource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
        })
    }

    fn open_once(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl SharedResource for GatedResource {
    async fn access(&self, _node: NodeId) {
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
    }
}

/// Resource that measures how many holders are inside at the same time.
#[derive(Default)]
struct OccupancyProbe {
    inside: AtomicUsize,
    max_inside: AtomicUsize,
    visits: AtomicUsize,
}

#[async_trait]
impl SharedResource for OccupancyProbe {
    async fn access(&self, _node: NodeId) {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inside.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.inside.fetch_sub(1, Ordering::SeqCst);
        self.visits.fetch_add(1, Ordering::SeqCst);
    }
}

/// Wraps a transport and counts the ACKs sent to each peer.
struct CountingTransport {
    id: NodeId,
    inner: Arc<dyn Transport>,
    acks: Arc<Mutex<HashMap<(NodeId, NodeId), usize>>>,
}

#[async_trait]
impl Transport for CountingTransport {
    async fn send_message(&self, target: NodeId, payload: &str) {
        if let Ok(msg) = decode_message(payload) {
            if msg.kind == MessageType::Ack {
                *self
                    .acks
                    .lock()
                    .unwrap()
                    .entry((self.id, target))
                    .or_default() += 1;
            }
        }
        self.inner.send_message(target, payload).await;
    }

    fn peers(&self) -> Vec<NodeId> {
        self.inner.peers()
    }
}

fn cluster(
    net: &Arc<MemoryNetwork>,
    size: NodeId,
    audit: &Arc<MemoryAudit>,
    resource: Arc<dyn SharedResource>,
) -> Vec<Arc<MutexAgent>> {
    let ids: Vec<NodeId> = (0..size).collect();
    ids.iter()
        .map(|&id| {
            let agent = MutexAgent::new(
                id,
                net.transport(id, ids.clone()),
                audit.clone(),
                Arc::clone(&resource),
                AgentOptions::default(),
            );
            net.attach(id, agent.clone());
            agent
        })
        .collect()
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

fn spawn_round(agent: &Arc<MutexAgent>) -> tokio::task::JoinHandle<KernelResult<()>> {
    let agent = Arc::clone(agent);
    tokio::spawn(async move { agent.run_round().await })
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_simultaneous_requests_resolved_by_id() {
    let net = MemoryNetwork::new();
    let audit = Arc::new(MemoryAudit::new());
    let gate = GatedResource::new();
    let agents = cluster(&net, 3, &audit, gate.clone());

    // Hold every REQUEST back so all three are stamped before any arrives.
    net.pause();
    let rounds: Vec<_> = agents.iter().map(spawn_round).collect();
    eventually("all agents requesting", || {
        agents
            .iter()
            .all(|a| a.snapshot().phase == AgentPhase::Requesting)
    })
    .await;
    for agent in &agents {
        assert_eq!(agent.snapshot().my_request_ts, Some(1));
    }
    net.resume();

    eventually("node 0 holds the resource", || {
        agents[0].snapshot().phase == AgentPhase::InCriticalSection
    })
    .await;
    eventually("node 1 defers node 2", || {
        agents[1].snapshot().deferred_acks == vec![2]
    })
    .await;
    let mut deferred_by_0 = agents[0].snapshot().deferred_acks;
    deferred_by_0.sort();
    assert_eq!(deferred_by_0, vec![1, 2]);
    assert!(agents[2].snapshot().deferred_acks.is_empty());

    for _ in 0..3 {
        gate.open_once();
    }
    for round in rounds {
        round.await.unwrap().unwrap();
    }

    assert_eq!(audit.entry_order(), vec![0, 1, 2]);
    assert_eq!(audit.max_concurrent_holders(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion_under_jitter() {
    let net = MemoryNetwork::with_jitter(Duration::from_millis(5));
    let audit = Arc::new(MemoryAudit::new());
    let probe = Arc::new(OccupancyProbe::default());
    let agents = cluster(&net, 4, &audit, probe.clone());

    let workers: Vec<_> = agents
        .iter()
        .map(|agent| {
            let agent = Arc::clone(agent);
            tokio::spawn(async move {
                for _ in 0..3 {
                    agent.run_round().await?;
                }
                KernelResult::Ok(())
            })
        })
        .collect();

    let all = futures::future::join_all(workers);
    let results = tokio::time::timeout(Duration::from_secs(30), all)
        .await
        .expect("cluster stalled");
    for result in results {
        result.unwrap().unwrap();
    }

    assert_eq!(probe.visits.load(Ordering::SeqCst), 12);
    assert_eq!(probe.max_inside.load(Ordering::SeqCst), 1);
    assert_eq!(audit.max_concurrent_holders(), 1);
    assert_eq!(audit.entry_order().len(), 12);
    for agent in &agents {
        let snap = agent.snapshot();
        assert_eq!(snap.phase, AgentPhase::Idle);
        assert!(snap.deferred_acks.is_empty());
    }
}

#[tokio::test]
async fn test_every_request_acknowledged_exactly_once() {
    let net = MemoryNetwork::with_jitter(Duration::from_millis(3));
    let audit = Arc::new(MemoryAudit::new());
    let acks = Arc::new(Mutex::new(HashMap::new()));
    let ids: Vec<NodeId> = (0..4).collect();

    let agents: Vec<Arc<MutexAgent>> = ids
        .iter()
        .map(|&id| {
            let transport = Arc::new(CountingTransport {
                id,
                inner: net.transport(id, ids.clone()),
                acks: Arc::clone(&acks),
            });
            let agent = MutexAgent::new(
                id,
                transport,
                audit.clone(),
                Arc::new(SimulatedTrack::new(Duration::from_millis(1))),
                AgentOptions::default(),
            );
            net.attach(id, agent.clone());
            agent
        })
        .collect();

    let rounds: Vec<_> = agents.iter().map(spawn_round).collect();
    for round in rounds {
        round.await.unwrap().unwrap();
    }
    // Let any stray message land before counting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let acks = acks.lock().unwrap().clone();
    for &from in &ids {
        for &to in &ids {
            if from != to {
                assert_eq!(acks.get(&(from, to)), Some(&1), "ACK {from} -> {to}");
            }
        }
    }
    assert_eq!(acks.len(), 12);
    let mut order = audit.entry_order();
    order.sort();
    assert_eq!(order, ids);
}

#[tokio::test]
async fn test_silent_peer_blocks_requester() {
    let net = MemoryNetwork::new();
    let audit = Arc::new(MemoryAudit::new());
    let agent = MutexAgent::new(
        0,
        net.transport(0, vec![0, 1]),
        audit.clone(),
        Arc::new(SimulatedTrack::new(Duration::ZERO)),
        AgentOptions {
            request_deadline: Some(Duration::from_millis(20)),
        },
    );
    net.attach(0, agent.clone());
    // Node 1 never attaches.

    let waited = tokio::time::timeout(Duration::from_millis(200), agent.run_round()).await;
    assert!(waited.is_err());
    assert_eq!(agent.snapshot().phase, AgentPhase::Requesting);
    assert!(audit.entry_order().is_empty());
    assert_eq!(net.dropped(), 1);
}

#[tokio::test]
async fn test_tcp_cluster_rounds() {
    let mut listeners = Vec::new();
    let mut nodes = Vec::new();
    for id in 0..3 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        nodes.push(NodeEntry {
            id,
            host: "127.0.0.1".to_string(),
            port: listener.local_addr().unwrap().port(),
        });
        listeners.push(listener);
    }
    let config = ClusterConfig {
        num_nodes: 3,
        nodes,
        driver: DriverConfig {
            rounds: 2,
            startup_delay_ms: 10,
            request_interval_ms: 5,
            hold_ms: 5,
            request_deadline_ms: 0,
        },
        transport: TransportConfig::default(),
    };
    config.validate().unwrap();

    let audit = Arc::new(MemoryAudit::new());
    let mut started = Vec::new();
    for (id, listener) in listeners.into_iter().enumerate() {
        let sink: Arc<dyn AuditSink> = audit.clone();
        let node = Node::start_on(
            &config,
            id as NodeId,
            listener,
            sink,
            Arc::new(SimulatedTrack::new(Duration::from_millis(config.driver.hold_ms))),
        )
        .unwrap();
        assert_eq!(node.agent().peers().len(), 2);
        started.push(Arc::new(node));
    }

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let drivers: Vec<_> = started
        .iter()
        .map(|node| {
            let node = Arc::clone(node);
            let rx = shutdown_rx.clone();
            tokio::spawn(async move { node.run_driver(rx).await })
        })
        .collect();

    let all = futures::future::join_all(drivers);
    let results = tokio::time::timeout(Duration::from_secs(30), all)
        .await
        .expect("tcp cluster stalled");
    for result in results {
        assert_eq!(result.unwrap().unwrap(), 2);
    }

    assert_eq!(audit.entry_order().len(), 6);
    assert_eq!(audit.max_concurrent_holders(), 1);

    for node in started {
        let node = Arc::try_unwrap(node).ok().unwrap();
        node.shutdown().await;
    }
}
