use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use fleet_core::{
    config::{NodeConfig, StorageConfig, TelemetryConfig, TelemetrySourceKind},
    AssignmentNotice, FleetConfig, FleetError, FleetResult, LedgerGateway, NodeCapability, NodeId,
    NodeRegistration, TaskStorage, TelemetrySource,
};

use crate::backends::BackendRegistry;
use crate::executor::{ExecutionRecord, ExecutorConfig, ShutdownReport, TaskAssignment, TaskExecutor};
use crate::heartbeat::HeartbeatManager;
use crate::resource_manager::{ResourceManager, ResourceSnapshot};
use crate::storage::LocalTaskStorage;
use crate::telemetry::{spawn_telemetry_poller, NvidiaSmiTelemetry, StaticTelemetry};

/// What `GET /api/status` reports for this node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatusReport {
    pub node_id: Option<NodeId>,
    pub name: String,
    pub address: String,
    pub running: bool,
    pub accepting: bool,
    pub active_tasks: usize,
    pub resources: ResourceSnapshot,
    pub tasks: Vec<ExecutionRecord>,
}

/// Lifecycle of one compute node: registration, heartbeats, telemetry
/// polling and assignment intake around a [`TaskExecutor`].
pub struct NodeService {
    config: NodeConfig,
    storage_config: StorageConfig,
    telemetry_config: TelemetryConfig,
    ledger: Arc<dyn LedgerGateway>,
    telemetry: Arc<dyn TelemetrySource>,
    storage: Arc<LocalTaskStorage>,
    resources: Arc<ResourceManager>,
    executor: TaskExecutor,
    intake_tx: mpsc::UnboundedSender<AssignmentNotice>,
    intake_rx: Mutex<Option<mpsc::UnboundedReceiver<AssignmentNotice>>>,
    node_id: RwLock<Option<NodeId>>,
    shutdown_tx: RwLock<Option<broadcast::Sender<()>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    is_running: RwLock<bool>,
}

impl NodeService {
    /// Builds the node with telemetry source and backends taken from config.
    pub fn from_config(config: &FleetConfig, ledger: Arc<dyn LedgerGateway>) -> Self {
        let telemetry: Arc<dyn TelemetrySource> = match config.telemetry.source {
            TelemetrySourceKind::NvidiaSmi => Arc::new(NvidiaSmiTelemetry::new()),
            TelemetrySourceKind::Static => Arc::new(StaticTelemetry::idle(config.node.memory_bytes)),
        };
        let backends = BackendRegistry::from_config(&config.node.backends);
        Self::new(config, ledger, telemetry, backends)
    }

    pub fn new(
        config: &FleetConfig,
        ledger: Arc<dyn LedgerGateway>,
        telemetry: Arc<dyn TelemetrySource>,
        backends: BackendRegistry,
    ) -> Self {
        let storage = Arc::new(LocalTaskStorage::new(&config.storage));
        let resources = Arc::new(ResourceManager::new(
            config.node.compute_power_units,
            config.node.memory_bytes,
            config.storage.max_storage_bytes,
            config.telemetry.thresholds.clone(),
            Arc::clone(&storage) as Arc<dyn TaskStorage>,
        ));
        let executor = TaskExecutor::new(
            ExecutorConfig::from(&config.node),
            Arc::clone(&resources),
            Arc::new(backends),
            Arc::clone(&ledger),
        );
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();

        Self {
            config: config.node.clone(),
            storage_config: config.storage.clone(),
            telemetry_config: config.telemetry.clone(),
            ledger,
            telemetry,
            storage,
            resources,
            executor,
            intake_tx,
            intake_rx: Mutex::new(Some(intake_rx)),
            node_id: RwLock::new(None),
            shutdown_tx: RwLock::new(None),
            handles: Mutex::new(Vec::new()),
            is_running: RwLock::new(false),
        }
    }

    /// Uses an externally created intake channel, so a dispatcher in the same
    /// process can push assignments without HTTP.
    pub fn with_intake_channel(
        mut self,
        sender: mpsc::UnboundedSender<AssignmentNotice>,
        receiver: mpsc::UnboundedReceiver<AssignmentNotice>,
    ) -> Self {
        self.intake_tx = sender;
        self.intake_rx = Mutex::new(Some(receiver));
        self
    }

    /// Verifies the accelerator, registers with the ledger and spawns the
    /// heartbeat, telemetry and intake loops.
    pub async fn start(&self) -> FleetResult<NodeId> {
        let mut is_running = self.is_running.write().await;
        if *is_running {
            return Err(FleetError::Internal(
                "node service already running".to_string(),
            ));
        }
        info!(name = %self.config.name, address = %self.config.advertise_address, "Starting node service");

        match self.telemetry.sample().await {
            Ok(sample) => {
                info!(
                    source = self.telemetry.name(),
                    memory_total = sample.memory_total,
                    temperature_c = sample.temperature_c,
                    "Accelerator verified"
                );
                self.resources.apply_telemetry(sample);
            }
            Err(e) if self.telemetry_config.source == TelemetrySourceKind::NvidiaSmi => {
                error!("Accelerator verification failed: {}", e);
                return Err(e);
            }
            Err(e) => warn!(source = self.telemetry.name(), "Initial telemetry sample failed: {}", e),
        }

        self.storage.init().await?;
        let existing = self.storage.usage_bytes().await?;
        let charged = self.resources.account_existing_storage(existing);
        if charged > 0 {
            info!(bytes = charged, "Charged existing data against the storage quota");
        }

        let node_id = self.ledger.register_node(self.registration()).await?;
        *self.node_id.write().await = Some(node_id);

        let receiver = self.intake_rx.lock().await.take().ok_or_else(|| {
            FleetError::Internal("node service cannot be restarted after stop".to_string())
        })?;

        let (shutdown_tx, _) = broadcast::channel(1);
        let heartbeat = HeartbeatManager::new(
            node_id,
            Arc::clone(&self.ledger),
            Duration::from_secs(self.config.heartbeat_interval_seconds),
        )
        .start(shutdown_tx.subscribe());
        let poller = spawn_telemetry_poller(
            Arc::clone(&self.telemetry),
            Arc::clone(&self.resources),
            Duration::from_secs(self.telemetry_config.poll_interval_seconds),
            shutdown_tx.subscribe(),
        );
        let intake = self.spawn_intake(node_id, receiver, shutdown_tx.subscribe());

        self.handles.lock().await.extend([heartbeat, poller, intake]);
        *self.shutdown_tx.write().await = Some(shutdown_tx);
        *is_running = true;

        info!(node_id = %node_id, "Node service started");
        Ok(node_id)
    }

    /// Stops the background loops, then drains the executor within the
    /// configured deadline and cleans the temp directory.
    pub async fn stop(&self) -> FleetResult<ShutdownReport> {
        let mut is_running = self.is_running.write().await;
        if !*is_running {
            return Ok(ShutdownReport::default());
        }
        info!(name = %self.config.name, "Stopping node service");

        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }

        let report = self
            .executor
            .shutdown(Duration::from_secs(self.config.drain_deadline_seconds))
            .await;

        if let Err(e) = self.storage.cleanup_temp().await {
            warn!(
                temp_dir = %self.storage_config.temp_dir,
                "Failed to clean temp directory: {}", e
            );
        }

        *is_running = false;
        info!(name = %self.config.name, "Node service stopped");
        Ok(report)
    }

    fn spawn_intake(
        &self,
        node_id: NodeId,
        mut receiver: mpsc::UnboundedReceiver<AssignmentNotice>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let ledger = Arc::clone(&self.ledger);
        let executor = self.executor.clone();
        let address = self.config.advertise_address.clone();

        tokio::spawn(async move {
            loop {
                // Accepting runs outside the select so an in-progress admission
                // is never dropped halfway.
                let notice = tokio::select! {
                    notice = receiver.recv() => match notice {
                        Some(notice) => notice,
                        None => break,
                    },
                    _ = shutdown_rx.recv() => {
                        info!("Intake loop shutting down");
                        break;
                    }
                };

                let task_id = notice.task_id;
                if let Err(e) = accept(node_id, &address, ledger.as_ref(), &executor, notice).await {
                    warn!(task_id = %task_id, "Assignment not accepted: {}", e);
                }
            }
        })
    }

    /// Queues a `TaskAssigned` notification for the intake loop.
    pub fn enqueue(&self, notice: AssignmentNotice) -> FleetResult<()> {
        self.intake_tx
            .send(notice)
            .map_err(|_| FleetError::Internal("intake loop is not running".to_string()))
    }

    pub fn intake_sender(&self) -> mpsc::UnboundedSender<AssignmentNotice> {
        self.intake_tx.clone()
    }

    pub fn registration(&self) -> NodeRegistration {
        NodeRegistration {
            address: self.config.advertise_address.clone(),
            capability: NodeCapability {
                accelerator_type: self.config.accelerator_type.clone(),
                compute_power_units: self.config.compute_power_units,
                memory_bytes: self.config.memory_bytes,
                storage_bytes: self
                    .storage_config
                    .max_storage_bytes
                    .saturating_sub(self.resources.existing_storage()),
                supported_frameworks: self.config.supported_frameworks.iter().cloned().collect(),
            },
        }
    }

    pub async fn node_id(&self) -> Option<NodeId> {
        *self.node_id.read().await
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn status(&self) -> NodeStatusReport {
        let mut tasks = self.executor.records();
        tasks.sort_by(|a, b| a.received_at.cmp(&b.received_at));
        NodeStatusReport {
            node_id: self.node_id().await,
            name: self.config.name.clone(),
            address: self.config.advertise_address.clone(),
            running: self.is_running().await,
            accepting: self.executor.is_accepting(),
            active_tasks: self.executor.active_count(),
            resources: self.resources.snapshot(),
            tasks,
        }
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }
}

fn same_address(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

async fn accept(
    node_id: NodeId,
    address: &str,
    ledger: &dyn LedgerGateway,
    executor: &TaskExecutor,
    notice: AssignmentNotice,
) -> FleetResult<()> {
    if !same_address(&notice.node_address, address) {
        debug!(
            task_id = %notice.task_id,
            target = %notice.node_address,
            "Ignoring assignment addressed to another node"
        );
        return Ok(());
    }

    let record = ledger.task_info(notice.task_id).await?;
    if record.assigned_node != Some(node_id) {
        return Err(FleetError::validation(format!(
            "task {} is assigned to {:?}, not {}",
            record.id, record.assigned_node, node_id
        )));
    }

    info!(task_id = %record.id, kind = %record.kind, "Assignment received");
    executor.submit(TaskAssignment::from(record)).await
}
