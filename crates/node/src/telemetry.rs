use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use fleet_core::{FleetError, FleetResult, GpuTelemetry, TelemetrySource};

use crate::resource_manager::ResourceManager;

const BYTES_PER_MIB: u64 = 1024 * 1024;
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Consecutive failed samples after which the last reading is treated as stale.
pub const STALE_AFTER_FAILURES: u32 = 3;

/// Reads accelerator state through `nvidia-smi`.
pub struct NvidiaSmiTelemetry {
    binary: String,
    query_timeout: Duration,
}

impl NvidiaSmiTelemetry {
    pub fn new() -> Self {
        Self::with_binary("nvidia-smi")
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }
}

impl Default for NvidiaSmiTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses one `memory.used, memory.total, temperature.gpu, utilization.gpu`
/// line as printed with `--format=csv,noheader,nounits`. Memory is in MiB.
pub fn parse_nvidia_smi_line(line: &str) -> FleetResult<GpuTelemetry> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 4 {
        return Err(FleetError::Telemetry(format!(
            "expected 4 fields from nvidia-smi, got {}: {line:?}",
            fields.len()
        )));
    }

    let parse = |value: &str, name: &str| -> FleetResult<f64> {
        value
            .parse::<f64>()
            .map_err(|_| FleetError::Telemetry(format!("invalid {name} value: {value:?}")))
    };

    Ok(GpuTelemetry {
        memory_used: parse(fields[0], "memory.used")? as u64 * BYTES_PER_MIB,
        memory_total: parse(fields[1], "memory.total")? as u64 * BYTES_PER_MIB,
        temperature_c: parse(fields[2], "temperature.gpu")?,
        utilization_percent: parse(fields[3], "utilization.gpu")?,
        sampled_at: Utc::now(),
    })
}

#[async_trait]
impl TelemetrySource for NvidiaSmiTelemetry {
    async fn sample(&self) -> FleetResult<GpuTelemetry> {
        // a hung driver must not stall the poller; the child dies with the future
        let query = Command::new(&self.binary)
            .arg("--query-gpu=memory.used,memory.total,temperature.gpu,utilization.gpu")
            .arg("--format=csv,noheader,nounits")
            .kill_on_drop(true)
            .output();
        let output = timeout(self.query_timeout, query)
            .await
            .map_err(|_| {
                FleetError::Telemetry(format!(
                    "{} did not answer within {:?}",
                    self.binary, self.query_timeout
                ))
            })?
            .map_err(|e| FleetError::Telemetry(format!("failed to run {}: {e}", self.binary)))?;

        if !output.status.success() {
            return Err(FleetError::Telemetry(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .next()
            .ok_or_else(|| FleetError::Telemetry("nvidia-smi returned no GPUs".to_string()))?;
        parse_nvidia_smi_line(line)
    }

    fn name(&self) -> &str {
        "nvidia-smi"
    }
}

/// Fixed reading, for accelerators without a query tool and for tests.
pub struct StaticTelemetry {
    sample: GpuTelemetry,
}

impl StaticTelemetry {
    pub fn new(sample: GpuTelemetry) -> Self {
        Self { sample }
    }

    pub fn idle(memory_total: u64) -> Self {
        Self::new(GpuTelemetry::idle(memory_total))
    }
}

#[async_trait]
impl TelemetrySource for StaticTelemetry {
    async fn sample(&self) -> FleetResult<GpuTelemetry> {
        Ok(GpuTelemetry {
            sampled_at: Utc::now(),
            ..self.sample.clone()
        })
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Polls the telemetry source on a fixed period and feeds the resource manager.
///
/// After [`STALE_AFTER_FAILURES`] failures in a row the resource manager is
/// told the reading is stale, which stops admission until a sample succeeds.
pub fn spawn_telemetry_poller(
    source: Arc<dyn TelemetrySource>,
    resources: Arc<ResourceManager>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(source = source.name(), "Telemetry poller started, period {:?}", period);
        let mut ticker = interval(period);
        let mut consecutive_failures: u32 = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match source.sample().await {
                        Ok(sample) => {
                            debug!(
                                temperature_c = sample.temperature_c,
                                utilization_percent = sample.utilization_percent,
                                memory_used = sample.memory_used,
                                "Telemetry sample"
                            );
                            if consecutive_failures >= STALE_AFTER_FAILURES {
                                info!(source = source.name(), "Telemetry recovered");
                            }
                            consecutive_failures = 0;
                            resources.apply_telemetry(sample);
                        }
                        Err(e) => {
                            consecutive_failures = consecutive_failures.saturating_add(1);
                            warn!(
                                source = source.name(),
                                consecutive_failures,
                                "Telemetry sample failed: {}", e
                            );
                            metrics::counter!("fleet_node_telemetry_failures_total").increment(1);
                            if consecutive_failures >= STALE_AFTER_FAILURES {
                                resources.mark_telemetry_stale();
                            }
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Telemetry poller shutting down");
                    break;
                }
            }
        }
    })
}
