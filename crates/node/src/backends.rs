use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use fleet_core::{
    config::BackendConfig, ExecutionBackend, ExecutionOutput, ExecutionRequest, FleetError,
    FleetResult, TaskKind,
};

/// Runs a configured command for one task kind.
///
/// Task references are passed as environment variables and the process runs
/// inside the task's storage area. The child is killed if the execution
/// future is dropped (timeout or shutdown).
pub struct CommandBackend {
    kind: TaskKind,
    name: String,
    command: String,
    args: Vec<String>,
}

impl CommandBackend {
    pub fn new(kind: TaskKind, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind,
            name: format!("command-{kind}"),
            command: command.into(),
            args,
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(config.kind, config.command.clone(), config.args.clone())
    }
}

#[async_trait]
impl ExecutionBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, kind: TaskKind) -> bool {
        kind == self.kind
    }

    async fn execute(&self, request: &ExecutionRequest) -> FleetResult<ExecutionOutput> {
        let started = Instant::now();
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(&request.work_dir)
            .env("FLEET_TASK_ID", request.task_id.to_string())
            .env("FLEET_TASK_KIND", request.kind.as_str())
            .env("FLEET_INPUT_REF", &request.input_ref)
            .env("FLEET_OUTPUT_REF", &request.output_ref)
            .env("FLEET_WORK_DIR", &request.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(model_ref) = &request.model_ref {
            cmd.env("FLEET_MODEL_REF", model_ref);
        }

        debug!(task_id = %request.task_id, command = %self.command, "Spawning backend process");
        let output = cmd
            .output()
            .await
            .map_err(|e| FleetError::backend(format!("failed to spawn {}: {e}", self.command)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(5)..].join("\n");
            return Err(FleetError::backend(format!(
                "{} exited with {}: {}",
                self.command, output.status, tail
            )));
        }

        Ok(ExecutionOutput {
            output_location: request.output_ref.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Completes immediately; default for kinds without a configured command.
pub struct NoopBackend;

#[async_trait]
impl ExecutionBackend for NoopBackend {
    fn name(&self) -> &str {
        "noop"
    }

    fn supports(&self, _kind: TaskKind) -> bool {
        true
    }

    async fn execute(&self, request: &ExecutionRequest) -> FleetResult<ExecutionOutput> {
        Ok(ExecutionOutput {
            output_location: request.output_ref.clone(),
            duration_ms: 0,
        })
    }
}

/// Backends available on this node, looked up by task kind.
#[derive(Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn ExecutionBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Command backends from config; kinds without one fall back to [`NoopBackend`].
    pub fn from_config(configs: &[BackendConfig]) -> Self {
        let mut registry = Self::new();
        for config in configs {
            registry.register(Arc::new(CommandBackend::from_config(config)));
        }
        let unconfigured: Vec<TaskKind> = TaskKind::ALL
            .into_iter()
            .filter(|kind| registry.get(*kind).is_none())
            .collect();
        if !unconfigured.is_empty() {
            info!(?unconfigured, "No backend configured, using noop backend");
            registry.register(Arc::new(NoopBackend));
        }
        registry
    }

    pub fn register(&mut self, backend: Arc<dyn ExecutionBackend>) {
        self.backends.push(backend);
    }

    /// First registered backend supporting `kind`.
    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn ExecutionBackend>> {
        self.backends
            .iter()
            .find(|backend| backend.supports(kind))
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }
}
