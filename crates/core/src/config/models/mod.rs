pub mod app_config;
pub mod dispatcher_node;
pub mod observability;
pub mod storage_telemetry;

pub use app_config::FleetConfig;
pub use dispatcher_node::{BackendConfig, DispatcherConfig, NodeConfig};
pub use observability::ObservabilityConfig;
pub use storage_telemetry::{StorageConfig, TelemetryConfig, TelemetrySourceKind};
