use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use fleet_core::{LedgerGateway, NodeId};

pub struct HeartbeatManager {
    node_id: NodeId,
    ledger: Arc<dyn LedgerGateway>,
    heartbeat_interval: Duration,
}

impl HeartbeatManager {
    pub fn new(node_id: NodeId, ledger: Arc<dyn LedgerGateway>, heartbeat_interval: Duration) -> Self {
        Self {
            node_id,
            ledger,
            heartbeat_interval,
        }
    }

    /// Sends a heartbeat every interval until shutdown is signalled.
    /// Failed heartbeats are logged and retried on the next tick.
    pub fn start(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.heartbeat_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.ledger.submit_heartbeat(self.node_id).await {
                            Ok(()) => debug!(node_id = %self.node_id, "Heartbeat sent"),
                            Err(e) => {
                                warn!(node_id = %self.node_id, "Failed to send heartbeat: {}", e);
                                metrics::counter!("fleet_node_heartbeat_failures_total").increment(1);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Heartbeat task shutting down");
                        break;
                    }
                }
            }
        })
    }
}
