use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, warn};

use fleet_core::{
    FleetResult, GpuTelemetry, HealthThresholds, ReleaseOutcome, ResourceLedger,
    ResourceVector, TaskId, TaskStorage,
};

struct ResourceState {
    ledger: ResourceLedger,
    telemetry: Option<GpuTelemetry>,
    telemetry_stale: bool,
    existing_storage: u64,
    inconsistencies: u64,
}

/// Point-in-time view of the node's capacity, backing the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSnapshot {
    pub total: ResourceVector,
    pub used: ResourceVector,
    pub telemetry: Option<GpuTelemetry>,
    pub telemetry_stale: bool,
    pub available: bool,
    pub inconsistencies: u64,
}

/// Node-local accounting of GPU compute/memory and storage.
///
/// Every allocate/release goes through one mutex covering the GPU and
/// storage dimensions together. Critical sections never await.
pub struct ResourceManager {
    state: Mutex<ResourceState>,
    thresholds: HealthThresholds,
    storage: Arc<dyn TaskStorage>,
}

impl ResourceManager {
    pub fn new(
        compute_power_units: u64,
        memory_bytes: u64,
        max_storage_bytes: u64,
        thresholds: HealthThresholds,
        storage: Arc<dyn TaskStorage>,
    ) -> Self {
        Self {
            state: Mutex::new(ResourceState {
                ledger: ResourceLedger::new(ResourceVector::new(
                    compute_power_units,
                    memory_bytes,
                    max_storage_bytes,
                )),
                telemetry: None,
                telemetry_stale: false,
                existing_storage: 0,
                inconsistencies: 0,
            }),
            thresholds,
            storage,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ResourceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Latest telemetry reading from the poller.
    pub fn apply_telemetry(&self, sample: GpuTelemetry) {
        let mut state = self.lock();
        if !self.thresholds.is_healthy(&sample) {
            debug!(
                temperature_c = sample.temperature_c,
                utilization_percent = sample.utilization_percent,
                memory_ratio = sample.memory_ratio(),
                "Accelerator above health thresholds"
            );
        }
        state.telemetry = Some(sample);
        state.telemetry_stale = false;
    }

    /// Marks the last reading as outdated; allocation is refused until the
    /// next successful sample.
    pub fn mark_telemetry_stale(&self) {
        let mut state = self.lock();
        if !state.telemetry_stale {
            warn!("Accelerator telemetry is stale, refusing new allocations");
        }
        state.telemetry_stale = true;
    }

    pub fn is_available(&self) -> bool {
        let state = self.lock();
        self.healthy(&state)
    }

    fn healthy(&self, state: &ResourceState) -> bool {
        !state.telemetry_stale
            && state
            .telemetry
            .as_ref()
            .map_or(true, |sample| self.thresholds.is_healthy(sample))
    }

    pub fn allocate(&self, memory: u64, compute: u64) -> bool {
        let mut state = self.lock();
        if !self.healthy(&state) {
            debug!(memory, compute, "Allocation refused: accelerator unhealthy");
            return false;
        }
        state.ledger.try_reserve(&ResourceVector::gpu(compute, memory))
    }

    pub fn release(&self, memory: u64, compute: u64) {
        let mut state = self.lock();
        let outcome = state.ledger.release(&ResourceVector::gpu(compute, memory));
        Self::record_outcome(&mut state, outcome, "gpu");
    }

    pub fn allocate_storage(&self, bytes: u64) -> bool {
        self.lock()
            .ledger
            .try_reserve(&ResourceVector::storage_only(bytes))
    }

    pub fn release_storage(&self, bytes: u64) {
        let mut state = self.lock();
        let outcome = state.ledger.release(&ResourceVector::storage_only(bytes));
        Self::record_outcome(&mut state, outcome, "storage");
    }

    fn record_outcome(state: &mut ResourceState, outcome: ReleaseOutcome, dimension: &'static str) {
        if outcome.is_consistent() {
            return;
        }
        state.inconsistencies += 1;
        warn!(
            dimension,
            over_released = ?outcome.over_released,
            "Released more than was reserved, clamped at zero"
        );
        metrics::counter!("fleet_ledger_inconsistencies_total", "side" => "node").increment(1);
    }

    /// Charges bytes already on disk at startup against the storage quota.
    ///
    /// Replaces any earlier charge, so a retried startup does not count the
    /// same data twice. The charge is clamped to the remaining headroom;
    /// returns the amount actually charged.
    pub fn account_existing_storage(&self, bytes: u64) -> u64 {
        let mut state = self.lock();
        let previous = state.existing_storage;
        if previous > 0 {
            let outcome = state.ledger.release(&ResourceVector::storage_only(previous));
            Self::record_outcome(&mut state, outcome, "storage");
        }

        let headroom = state
            .ledger
            .total()
            .storage
            .saturating_sub(state.ledger.used().storage);
        let charged = bytes.min(headroom);
        if charged < bytes {
            warn!(
                existing_bytes = bytes,
                charged_bytes = charged,
                "Existing data exceeds the storage quota, charged up to the limit"
            );
        }
        let charged = if state.ledger.try_reserve(&ResourceVector::storage_only(charged)) {
            charged
        } else {
            0
        };
        state.existing_storage = charged;
        charged
    }

    /// Storage charged for data that predates this process.
    pub fn existing_storage(&self) -> u64 {
        self.lock().existing_storage
    }

    /// Creates the task's storage area without touching the ledger.
    pub async fn create_area(&self, task_id: TaskId) -> FleetResult<PathBuf> {
        self.storage.create_area(task_id).await
    }

    /// Deletes the task's storage area; failures are only logged.
    pub async fn remove_area(&self, task_id: TaskId) {
        if let Err(e) = self.storage.delete_area(task_id).await {
            warn!(task_id = %task_id, "Failed to delete storage area: {}", e);
        }
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        let state = self.lock();
        ResourceSnapshot {
            total: state.ledger.total(),
            used: state.ledger.used(),
            telemetry: state.telemetry.clone(),
            telemetry_stale: state.telemetry_stale,
            available: self.healthy(&state),
            inconsistencies: state.inconsistencies,
        }
    }

    pub fn used(&self) -> ResourceVector {
        self.lock().ledger.used()
    }

    pub fn total(&self) -> ResourceVector {
        self.lock().ledger.total()
    }
}
