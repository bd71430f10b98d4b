//! # 数据模型
//!
//! 定义算力调度系统的核心数据结构：节点、任务、资源账本与遥测样本。
//!
//! ## 核心模型
//!
//! ### NodeRecord - 节点记录
//! 节点的声明能力（加速器类型、算力、显存、存储）、在线状态与最后心跳时间。
//! 只由节点注册表持有和修改。
//!
//! ### TaskRecord - 任务记录
//! 一次训练/推理/渲染任务的需求、状态与分配节点。状态只能单调前进：
//!
//! ```text
//! Pending → Running → Completed
//!    ↓         ↓
//!  Failed    Failed
//! ```
//!
//! ### ResourceLedger - 资源账本
//! 每个节点的容量总量与已用量，任何时刻每个维度都满足 `0 ≤ used ≤ total`。
//! 调度器侧的预留镜像与节点侧的 ResourceManager 共用同一个账本类型。
//!
//! ### GpuTelemetry - 遥测样本
//! 由外部采集器周期性提供的显存、温度、利用率读数。

pub mod node;
pub mod resource;
pub mod task;
pub mod telemetry;

pub use node::*;
pub use resource::*;
pub use task::*;
pub use telemetry::*;
