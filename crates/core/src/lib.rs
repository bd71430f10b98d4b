//! # fleet-core
//!
//! 算力调度系统的公共基础：错误类型、数据模型、调度事件、
//! 外部协作方接口与配置。调度器（fleet-dispatcher）和节点（fleet-node）
//! 两侧都只依赖这里定义的类型交换数据。

pub mod config;
pub mod errors;
pub mod events;
pub mod models;
pub mod traits;

pub use config::FleetConfig;
pub use errors::*;
pub use events::{AssignmentNotice, EventSink, SchedulerEvent};
pub use models::*;
pub use traits::*;
