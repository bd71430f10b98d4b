//! Compute node: local resource accounting, task execution and the
//! registration/heartbeat/intake lifecycle against the dispatcher.

pub mod backends;
pub mod executor;
pub mod heartbeat;
pub mod ledger_client;
pub mod resource_manager;
pub mod service;
pub mod storage;
pub mod telemetry;

pub use backends::{BackendRegistry, CommandBackend, NoopBackend};
pub use executor::{
    ExecutionRecord, ExecutionState, ExecutorConfig, ShutdownReport, TaskAssignment, TaskExecutor,
};
pub use heartbeat::HeartbeatManager;
pub use ledger_client::HttpLedgerClient;
pub use resource_manager::{ResourceManager, ResourceSnapshot};
pub use service::{NodeService, NodeStatusReport};
pub use storage::LocalTaskStorage;
pub use telemetry::{spawn_telemetry_poller, NvidiaSmiTelemetry, StaticTelemetry};
