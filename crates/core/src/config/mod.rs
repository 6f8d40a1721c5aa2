//! 配置管理
//!
//! 加载顺序：内置默认值 → TOML配置文件 → 环境变量（前缀 `EVENT_WORKER`，
//! 层级分隔符 `__`，例如 `EVENT_WORKER__WORKER__BATCH_SIZE=5`）。

pub mod models;

pub use models::*;
