use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use fleet_core::{
    config::NodeConfig, ExecutionBackend, ExecutionOutput, ExecutionRequest, FailureReason,
    FleetError, FleetResult, LedgerGateway, ResourceVector, TaskId, TaskKind, TaskRecord,
    TaskRequirements,
};

use crate::backends::BackendRegistry;
use crate::resource_manager::ResourceManager;

/// Node-side lifecycle of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Admitted,
    Running,
    Completed,
    Failed(FailureReason),
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionState::Completed | ExecutionState::Failed(_))
    }
}

/// A task handed to this node by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub requirements: TaskRequirements,
    pub input_ref: String,
    pub output_ref: String,
    pub model_ref: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl From<TaskRecord> for TaskAssignment {
    fn from(record: TaskRecord) -> Self {
        Self {
            task_id: record.id,
            kind: record.kind,
            requirements: record.requirements,
            input_ref: record.input_ref,
            output_ref: record.output_ref,
            model_ref: record.model_ref,
            timeout_seconds: record.timeout_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub state: ExecutionState,
    pub requested: ResourceVector,
    pub work_dir: Option<PathBuf>,
    pub output_location: Option<String>,
    pub error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    gpu_reserved: bool,
    #[serde(skip)]
    storage_reserved: bool,
}

impl ExecutionRecord {
    fn new(assignment: &TaskAssignment) -> Self {
        Self {
            task_id: assignment.task_id,
            kind: assignment.kind,
            state: ExecutionState::Pending,
            requested: assignment.requirements.as_resources(),
            work_dir: None,
            output_location: None,
            error: None,
            received_at: Utc::now(),
            finished_at: None,
            gpu_reserved: false,
            storage_reserved: false,
        }
    }

    pub fn holds_reservation(&self) -> bool {
        self.gpu_reserved || self.storage_reserved
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_concurrent_tasks: usize,
    pub task_timeout: Duration,
    pub report_timeout: Duration,
    /// Finished records kept for status queries; older ones are dropped first.
    pub retained_records: usize,
}

const DEFAULT_RETAINED_RECORDS: usize = 256;

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            task_timeout: Duration::from_secs(3600),
            report_timeout: Duration::from_secs(10),
            retained_records: DEFAULT_RETAINED_RECORDS,
        }
    }
}

impl From<&NodeConfig> for ExecutorConfig {
    fn from(config: &NodeConfig) -> Self {
        Self {
            max_concurrent_tasks: config.max_concurrent_tasks,
            task_timeout: Duration::from_secs(config.task_timeout_seconds),
            report_timeout: Duration::from_secs(config.report_timeout_seconds),
            retained_records: DEFAULT_RETAINED_RECORDS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub cancelled: Vec<TaskId>,
    pub abandoned: Vec<TaskId>,
}

enum Outcome {
    Completed(ExecutionOutput),
    Failed { reason: FailureReason, error: String },
}

struct RunningTask {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct ExecutorInner {
    config: ExecutorConfig,
    resources: Arc<ResourceManager>,
    backends: Arc<BackendRegistry>,
    ledger: Arc<dyn LedgerGateway>,
    permits: Arc<Semaphore>,
    records: Mutex<HashMap<TaskId, ExecutionRecord>>,
    running: Mutex<HashMap<TaskId, RunningTask>>,
    accepting: AtomicBool,
}

/// Admits, runs and finalizes tasks on this node.
///
/// Admission reserves GPU and storage through the [`ResourceManager`]; both
/// must succeed or neither is kept. Every task is finalized through a single
/// state-guarded path, so its reservations are released and its result
/// reported at most once, whichever of backend result, timeout or shutdown
/// comes first.
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<ExecutorInner>,
}

fn finalized_during_admission(task_id: TaskId) -> FleetError {
    FleetError::resource_exhausted(format!("task {task_id} was finalized during admission"))
}

fn prune_finished(records: &mut HashMap<TaskId, ExecutionRecord>, retained: usize) {
    let mut finished: Vec<(DateTime<Utc>, TaskId)> = records
        .values()
        .filter(|record| record.state.is_terminal())
        .filter_map(|record| record.finished_at.map(|at| (at, record.task_id)))
        .collect();
    let excess = finished.len().saturating_sub(retained.max(1));
    if excess == 0 {
        return;
    }

    finished.sort_by_key(|(at, _)| *at);
    for (_, task_id) in finished.into_iter().take(excess) {
        records.remove(&task_id);
    }
    debug!(pruned = excess, "Dropped oldest finished task records");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TaskExecutor {
    pub fn new(
        config: ExecutorConfig,
        resources: Arc<ResourceManager>,
        backends: Arc<BackendRegistry>,
        ledger: Arc<dyn LedgerGateway>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_tasks));
        Self {
            inner: Arc::new(ExecutorInner {
                config,
                resources,
                backends,
                ledger,
                permits,
                records: Mutex::new(HashMap::new()),
                running: Mutex::new(HashMap::new()),
                accepting: AtomicBool::new(true),
            }),
        }
    }

    /// Admits the task and starts it in the background.
    ///
    /// Returns once the task is running or has been rejected. A rejected task
    /// is recorded as failed and the failure is reported to the ledger.
    pub async fn submit(&self, assignment: TaskAssignment) -> FleetResult<()> {
        let task_id = assignment.task_id;
        {
            let mut records = lock(&self.inner.records);
            if records.contains_key(&task_id) {
                return Err(FleetError::validation(format!(
                    "task {task_id} already submitted to this node"
                )));
            }
            records.insert(task_id, ExecutionRecord::new(&assignment));
        }

        if !self.inner.accepting.load(Ordering::SeqCst) {
            return self
                .reject(task_id, "node is shutting down".to_string())
                .await;
        }

        let permit = match Arc::clone(&self.inner.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let message = format!(
                    "max concurrency {} reached",
                    self.inner.config.max_concurrent_tasks
                );
                return self.reject(task_id, message).await;
            }
        };

        // Both reservations are recorded on the task before anything awaits,
        // so a shutdown that finalizes it meanwhile releases exactly what is held.
        let requested = assignment.requirements.as_resources();
        let reserved = {
            let mut records = lock(&self.inner.records);
            match records.get_mut(&task_id) {
                Some(record) if !record.state.is_terminal() => {
                    record.gpu_reserved = self
                        .inner
                        .resources
                        .allocate(requested.memory, requested.compute);
                    if record.gpu_reserved {
                        record.storage_reserved =
                            self.inner.resources.allocate_storage(requested.storage);
                    }
                    Some((record.gpu_reserved, record.storage_reserved))
                }
                _ => None,
            }
        };
        match reserved {
            None => return Err(finalized_during_admission(task_id)),
            Some((false, _)) => {
                return self
                    .reject(task_id, "insufficient GPU capacity or accelerator unhealthy".to_string())
                    .await;
            }
            Some((true, false)) => {
                let message = format!(
                    "storage quota exceeded: requested {} bytes",
                    requested.storage
                );
                return self.reject(task_id, message).await;
            }
            Some((true, true)) => {}
        }

        let work_dir = match self.inner.resources.create_area(task_id).await {
            Ok(work_dir) => work_dir,
            Err(e) => {
                return self
                    .reject(task_id, format!("storage area creation failed: {e}"))
                    .await;
            }
        };

        let admitted = {
            let mut records = lock(&self.inner.records);
            match records.get_mut(&task_id) {
                Some(record) if !record.state.is_terminal() => {
                    record.work_dir = Some(work_dir.clone());
                    record.state = ExecutionState::Admitted;
                    true
                }
                _ => false,
            }
        };
        if !admitted {
            // reservations went with the finalization; only the new area is left
            self.inner.resources.remove_area(task_id).await;
            return Err(finalized_during_admission(task_id));
        }
        debug!(task_id = %task_id, work_dir = %work_dir.display(), "Task admitted");

        let Some(backend) = self.inner.backends.get(assignment.kind) else {
            let message = format!("no backend registered for {} tasks", assignment.kind);
            self.finalize(
                task_id,
                Outcome::Failed {
                    reason: FailureReason::BackendExecutionError,
                    error: message.clone(),
                },
                true,
            )
            .await;
            return Err(FleetError::backend(message));
        };

        let request = ExecutionRequest {
            task_id,
            kind: assignment.kind,
            input_ref: assignment.input_ref,
            output_ref: assignment.output_ref,
            model_ref: assignment.model_ref,
            work_dir,
        };
        let timeout = assignment
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.inner.config.task_timeout);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        {
            let mut running = lock(&self.inner.running);
            let executor = self.clone();
            let handle = tokio::spawn(async move {
                executor
                    .run(request, backend, timeout, cancel_rx, permit)
                    .await;
            });
            running.insert(
                task_id,
                RunningTask {
                    cancel: cancel_tx,
                    handle,
                },
            );
        }
        Ok(())
    }

    async fn reject(&self, task_id: TaskId, message: String) -> FleetResult<()> {
        warn!(task_id = %task_id, "Task rejected: {}", message);
        self.finalize(
            task_id,
            Outcome::Failed {
                reason: FailureReason::ResourceExhausted,
                error: message.clone(),
            },
            true,
        )
        .await;
        Err(FleetError::resource_exhausted(message))
    }

    async fn run(
        self,
        request: ExecutionRequest,
        backend: Arc<dyn ExecutionBackend>,
        timeout: Duration,
        cancel_rx: oneshot::Receiver<()>,
        _permit: OwnedSemaphorePermit,
    ) {
        let task_id = request.task_id;
        {
            let mut records = lock(&self.inner.records);
            if let Some(record) = records.get_mut(&task_id) {
                if record.state.is_terminal() {
                    return;
                }
                record.state = ExecutionState::Running;
            }
        }
        info!(
            task_id = %task_id,
            kind = %request.kind,
            backend = backend.name(),
            timeout_secs = timeout.as_secs(),
            "Task running"
        );

        let outcome = tokio::select! {
            result = tokio::time::timeout(timeout, backend.execute(&request)) => match result {
                Ok(Ok(output)) => Outcome::Completed(output),
                Ok(Err(e)) => Outcome::Failed {
                    reason: e.failure_reason().unwrap_or(FailureReason::BackendExecutionError),
                    error: e.to_string(),
                },
                Err(_) => Outcome::Failed {
                    reason: FailureReason::Timeout,
                    error: format!("task exceeded timeout of {}s", timeout.as_secs()),
                },
            },
            _ = cancel_rx => Outcome::Failed {
                reason: FailureReason::Shutdown,
                error: "cancelled by node shutdown".to_string(),
            },
        };

        self.finalize(task_id, outcome, true).await;
    }

    /// The single finalization path. Returns false if the task was already
    /// finalized (or is unknown), in which case nothing is released or reported.
    async fn finalize(&self, task_id: TaskId, outcome: Outcome, report: bool) -> bool {
        let had_storage = {
            let mut records = lock(&self.inner.records);
            let Some(record) = records.get_mut(&task_id) else {
                return false;
            };
            if record.state.is_terminal() {
                return false;
            }

            if record.gpu_reserved {
                self.inner
                    .resources
                    .release(record.requested.memory, record.requested.compute);
                record.gpu_reserved = false;
            }
            let had_storage = record.storage_reserved;
            if had_storage {
                self.inner.resources.release_storage(record.requested.storage);
                record.storage_reserved = false;
            }

            match &outcome {
                Outcome::Completed(output) => {
                    record.state = ExecutionState::Completed;
                    record.output_location = Some(output.output_location.clone());
                }
                Outcome::Failed { reason, error } => {
                    record.state = ExecutionState::Failed(*reason);
                    record.error = Some(error.clone());
                }
            }
            record.finished_at = Some(Utc::now());
            prune_finished(&mut records, self.inner.config.retained_records);
            had_storage
        };

        lock(&self.inner.running).remove(&task_id);
        if had_storage {
            self.inner.resources.remove_area(task_id).await;
        }

        match &outcome {
            Outcome::Completed(output) => {
                info!(
                    task_id = %task_id,
                    duration_ms = output.duration_ms,
                    output = %output.output_location,
                    "Task completed"
                );
                metrics::counter!("fleet_node_tasks_completed_total").increment(1);
            }
            Outcome::Failed { reason, error } => {
                warn!(task_id = %task_id, reason = %reason, "Task failed: {}", error);
                metrics::counter!("fleet_node_tasks_failed_total", "reason" => reason.to_string())
                    .increment(1);
            }
        }

        if report {
            self.report(task_id, &outcome).await;
        }
        true
    }

    async fn report(&self, task_id: TaskId, outcome: &Outcome) {
        let call = match outcome {
            Outcome::Completed(_) => self.inner.ledger.report_completion(task_id),
            Outcome::Failed { reason, .. } => self.inner.ledger.report_failure(task_id, *reason),
        };

        match tokio::time::timeout(self.inner.config.report_timeout, call).await {
            Ok(Ok(())) => debug!(task_id = %task_id, "Result reported to ledger"),
            Ok(Err(e)) => {
                let e = FleetError::LedgerReporting(e.to_string());
                error!(task_id = %task_id, "Keeping local state: {}", e);
                metrics::counter!("fleet_ledger_report_failures_total").increment(1);
            }
            Err(_) => {
                error!(
                    task_id = %task_id,
                    "Keeping local state: ledger report timed out after {:?}",
                    self.inner.config.report_timeout
                );
                metrics::counter!("fleet_ledger_report_failures_total").increment(1);
            }
        }
    }

    /// Stops intake and cancels every running task.
    ///
    /// Cancelled tasks finalize as failed (shutdown) and report. Whatever has
    /// not resolved by `drain_deadline` is aborted, its reservations released
    /// locally and the task marked failed without reporting.
    pub async fn shutdown(&self, drain_deadline: Duration) -> ShutdownReport {
        self.inner.accepting.store(false, Ordering::SeqCst);

        let drained: Vec<(TaskId, JoinHandle<()>)> = {
            let mut running = lock(&self.inner.running);
            running
                .drain()
                .map(|(task_id, task)| {
                    let _ = task.cancel.send(());
                    (task_id, task.handle)
                })
                .collect()
        };
        let (cancelled, mut handles): (Vec<TaskId>, Vec<JoinHandle<()>>) =
            drained.into_iter().unzip();
        if !cancelled.is_empty() {
            info!(
                count = cancelled.len(),
                "Draining running tasks, deadline {:?}", drain_deadline
            );
        }

        if tokio::time::timeout(drain_deadline, join_all(handles.iter_mut()))
            .await
            .is_err()
        {
            for handle in handles.iter_mut() {
                if !handle.is_finished() {
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }

        let unresolved: Vec<TaskId> = lock(&self.inner.records)
            .values()
            .filter(|record| !record.state.is_terminal())
            .map(|record| record.task_id)
            .collect();

        let mut abandoned = Vec::new();
        for task_id in unresolved {
            let forced = self
                .finalize(
                    task_id,
                    Outcome::Failed {
                        reason: FailureReason::Shutdown,
                        error: "abandoned at drain deadline".to_string(),
                    },
                    false,
                )
                .await;
            if forced {
                error!(
                    task_id = %task_id,
                    "Task abandoned at drain deadline, reservations force-released"
                );
                metrics::counter!("fleet_node_tasks_abandoned_total").increment(1);
                abandoned.push(task_id);
            }
        }

        info!(
            cancelled = cancelled.len(),
            abandoned = abandoned.len(),
            "Executor shut down"
        );
        ShutdownReport {
            cancelled,
            abandoned,
        }
    }

    pub fn state(&self, task_id: TaskId) -> Option<ExecutionState> {
        lock(&self.inner.records)
            .get(&task_id)
            .map(|record| record.state)
    }

    pub fn record(&self, task_id: TaskId) -> Option<ExecutionRecord> {
        lock(&self.inner.records).get(&task_id).cloned()
    }

    pub fn records(&self) -> Vec<ExecutionRecord> {
        lock(&self.inner.records).values().cloned().collect()
    }

    /// Tasks admitted or running.
    pub fn active_count(&self) -> usize {
        lock(&self.inner.records)
            .values()
            .filter(|record| !record.state.is_terminal())
            .count()
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.inner.resources
    }
}
