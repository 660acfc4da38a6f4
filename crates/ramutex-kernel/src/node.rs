//! Node bootstrap: wires an agent to a TCP transport and its listener.

use crate::agent::{AgentOptions, MutexAgent};
use crate::audit::AuditSink;
use crate::driver::RequestDriver;
use crate::error::{KernelError, KernelResult};
use crate::resource::SharedResource;

use ramutex_types::config::ClusterConfig;
use ramutex_types::error::RamutexError;
use ramutex_types::NodeId;
use ramutex_wire::{MessageHandler, ServerHandle, TcpTransport};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// A running participant: its agent plus the server feeding it.
pub struct Node {
    agent: Arc<MutexAgent>,
    server: ServerHandle,
    driver: RequestDriver,
}

impl Node {
    /// Start node `id`, listening on all interfaces at its configured port.
    pub async fn start(
        config: &ClusterConfig,
        id: NodeId,
        audit: Arc<dyn AuditSink>,
        resource: Arc<dyn SharedResource>,
    ) -> KernelResult<Self> {
        let entry = config.node(id).ok_or_else(|| {
            RamutexError::Config(format!("node {id} is not listed in the configuration"))
        })?;
        let listen_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, entry.port));
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|e| KernelError::Wire(e.into()))?;
        Self::start_on(config, id, listener, audit, resource)
    }

    /// Start node `id` on a listener the caller already bound.
    pub fn start_on(
        config: &ClusterConfig,
        id: NodeId,
        listener: TcpListener,
        audit: Arc<dyn AuditSink>,
        resource: Arc<dyn SharedResource>,
    ) -> KernelResult<Self> {
        let directory = config.peer_directory(id)?;
        let transport = Arc::new(TcpTransport::new(directory, config.transport.clone()));

        let deadline_ms = config.driver.request_deadline_ms;
        let options = AgentOptions {
            request_deadline: (deadline_ms > 0).then(|| Duration::from_millis(deadline_ms)),
        };
        let agent = MutexAgent::new(id, transport.clone(), audit, resource, options);

        let handler: Arc<dyn MessageHandler> = agent.clone();
        let server = transport.serve(listener, handler)?;
        info!(
            node = id,
            addr = %server.local_addr(),
            peers = ?agent.peers(),
            "Node started"
        );

        let driver = RequestDriver::new(Arc::clone(&agent), config.driver.clone());
        Ok(Self {
            agent,
            server,
            driver,
        })
    }

    pub fn agent(&self) -> &Arc<MutexAgent> {
        &self.agent
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Run the configured request rounds. See [`RequestDriver::run`].
    pub async fn run_driver(&self, shutdown: watch::Receiver<bool>) -> KernelResult<u32> {
        self.driver.run(shutdown).await
    }

    /// Stop the listener.
    pub async fn shutdown(self) {
        let id = self.agent.id();
        self.server.shutdown().await;
        info!(node = id, "Node stopped");
    }
}
