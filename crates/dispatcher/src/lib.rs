//! 调度器
//!
//! 节点注册表、任务存储、最佳适配调度、心跳监控与分配通知转发。

pub mod gateway;
pub mod heartbeat_monitor;
pub mod notifier;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod strategies;
pub mod task_store;

pub use gateway::LocalLedgerGateway;
pub use heartbeat_monitor::{HeartbeatMonitor, HeartbeatMonitorConfig, SweepReport};
pub use notifier::{
    AssignmentNotifier, AssignmentRelay, ChannelAssignmentNotifier, HttpAssignmentNotifier,
};
pub use registry::{NodeEntry, NodeHandle, NodeRegistry, NodeSnapshot};
pub use scheduler::{SchedulerStats, TaskScheduler};
pub use service::DispatcherService;
pub use strategies::{BestFitStrategy, NodeSelectionStrategy};
pub use task_store::{TaskCounts, TaskStore};
