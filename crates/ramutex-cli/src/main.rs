//! ramutex CLI: launches mutual-exclusion nodes from a cluster config.
//!
//! With `--node` a single participant runs in this process and talks to the
//! others over TCP; without it every configured participant is started here,
//! each on its own port.

mod cli;

use crate::cli::Cli;
use anyhow::Context;
use clap::Parser;
use ramutex_kernel::{AuditSink, FanoutAudit, FileAudit, Node, SimulatedTrack, TracingAudit};
use ramutex_types::config::ClusterConfig;
use ramutex_types::NodeId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    let mut config = match ClusterConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };
    if let Some(rounds) = cli.rounds {
        config.driver.rounds = rounds;
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(run(cli, config)) {
        error!("ramutex exited with an error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: ClusterConfig) -> anyhow::Result<()> {
    let audit = build_audit(&cli)?;
    let ids: Vec<NodeId> = match cli.node {
        Some(id) => vec![id],
        None => config.nodes.iter().map(|n| n.id).collect(),
    };

    let mut nodes = Vec::with_capacity(ids.len());
    for id in ids {
        let resource = Arc::new(SimulatedTrack::new(Duration::from_millis(
            config.driver.hold_ms,
        )));
        let node = Node::start(&config, id, Arc::clone(&audit), resource)
            .await
            .with_context(|| format!("starting node {id}"))?;
        nodes.push(node);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if signal_tx.send(()).is_err() {
                break;
            }
        }
    });
    tokio::spawn(async move {
        if watch_interrupts(&mut signal_rx, &shutdown_tx).await {
            std::process::exit(130);
        }
    });

    let results =
        futures::future::join_all(nodes.iter().map(|n| n.run_driver(shutdown_rx.clone()))).await;

    let mut failed = None;
    for (node, result) in nodes.iter().zip(results) {
        match result {
            Ok(rounds) => info!(node = node.agent().id(), rounds, "Driver finished"),
            Err(e) => {
                error!(node = node.agent().id(), error = %e, "Driver failed");
                failed.get_or_insert(e);
            }
        }
    }

    for node in nodes {
        node.shutdown().await;
    }
    match failed {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// React to interrupts: the first asks every driver to stop after its current
/// round, the second gives up on them.
///
/// Returns `true` when the process should exit immediately, `false` if the
/// signal source closed first.
async fn watch_interrupts(
    signals: &mut mpsc::UnboundedReceiver<()>,
    shutdown: &watch::Sender<bool>,
) -> bool {
    if signals.recv().await.is_none() {
        return false;
    }
    warn!("Ctrl-C received, stopping after the current round (press again to force)");
    let _ = shutdown.send(true);

    if signals.recv().await.is_none() {
        return false;
    }
    error!("Second Ctrl-C received, exiting without waiting for pending rounds");
    true
}

fn build_audit(cli: &Cli) -> anyhow::Result<Arc<dyn AuditSink>> {
    let console: Arc<dyn AuditSink> = Arc::new(TracingAudit);
    let mut fanout = FanoutAudit::new(vec![console]);
    if let Some(path) = &cli.audit_log {
        let file = FileAudit::open(path)
            .with_context(|| format!("opening audit log {}", path.display()))?;
        fanout.push(Arc::new(file));
    }
    Ok(Arc::new(fanout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_interrupt_requests_shutdown() {
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        signal_tx.send(()).unwrap();
        let watcher = tokio::spawn(async move {
            watch_interrupts(&mut signal_rx, &shutdown_tx).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(*shutdown_rx.borrow());
        assert!(!watcher.is_finished());

        drop(signal_tx);
        assert!(!watcher.await.unwrap());
    }

    #[tokio::test]
    async fn test_second_interrupt_forces_exit() {
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        signal_tx.send(()).unwrap();
        signal_tx.send(()).unwrap();
        let force = tokio::time::timeout(
            Duration::from_secs(1),
            watch_interrupts(&mut signal_rx, &shutdown_tx),
        )
        .await
        .unwrap();

        assert!(force);
        assert!(*shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn test_no_interrupt_leaves_drivers_running() {
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<()>();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(signal_tx);

        assert!(!watch_interrupts(&mut signal_rx, &shutdown_tx).await);
        assert!(!*shutdown_rx.borrow());
    }
}
