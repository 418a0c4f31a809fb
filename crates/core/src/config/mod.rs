//! 配置管理模块
//!
//! 提供应用配置的数据模型与加载逻辑，支持TOML文件与环境变量分层覆盖。

pub mod loader;
pub mod models;

pub use loader::load_config;
pub use models::{AppConfig, DatabaseConfig, DispatcherConfig, ObservabilityConfig, QueueConfig};
