//! # 外部协作方接口
//!
//! 调度核心只通过这些 trait 与外部系统交互，每个 trait 至少有一个具体适配器：
//!
//! - [`LedgerGateway`] 账本/注册服务，节点注册、心跳与任务结果上报
//! - [`TelemetrySource`] 加速器遥测采集
//! - [`ExecutionBackend`] 按任务类型划分的执行后端
//! - [`TaskStorage`] 每个任务的本地存储区

pub mod backend;
pub mod ledger;
pub mod storage;
pub mod telemetry;

pub use backend::*;
pub use ledger::*;
pub use storage::*;
pub use telemetry::*;
