//! 配置管理
//!
//! 配置按以下顺序加载，后者覆盖前者：
//!
//! 1. 代码内默认值（各配置段的 `Default` 实现）
//! 2. TOML 配置文件（显式路径，或默认搜索路径）
//! 3. 环境变量，前缀 `FLEET_`，层级分隔符 `__`，
//!    例如 `FLEET_NODE__MAX_CONCURRENT_TASKS=8`
//!
//! 加载完成后对每个配置段执行 `validate()`。

pub mod models;

pub use models::*;
