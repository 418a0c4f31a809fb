//! 调度与派发引擎
//!
//! 触发评估、账号选择、并发守卫、节奏排布与任务生命周期管理
//! 都在这个 crate 内，上层只负责装配与对外暴露。

pub mod analyzer;
pub mod batch;
pub mod controller;
pub mod cron_utils;
pub mod dispatch;
pub mod guard;
pub mod metrics;
pub mod recovery_service;
pub mod retry_service;
pub mod slots;
pub mod status;
pub mod strategies;
pub mod trigger;

pub use analyzer::StrategyAnalyzer;
pub use batch::BatchTracker;
pub use controller::DispatchController;
pub use dispatch::TaskDispatcher;
pub use guard::ConcurrencyGuard;
pub use metrics::DispatchMetrics;
pub use recovery_service::{RecoveryReport, SystemHealthStatus, SystemRecoveryService};
pub use retry_service::{RetryConfig, TaskRetryService};
pub use status::TaskStatusService;
pub use strategies::StrategyResolver;
pub use trigger::TriggerEngine;
