use serde::{Deserialize, Serialize};

use crate::errors::{PublisherError, PublisherResult};

/// 应用配置根结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub dispatcher: DispatcherConfig,
    pub observability: ObservabilityConfig,
}

/// 数据库连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

/// 派发队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// 任务执行消息队列名
    pub task_queue: String,
    /// 取消通知队列名
    pub control_queue: String,
    /// 队列容量上限，超出时发布端阻塞等待
    pub capacity: usize,
    /// 发布背压等待超时（秒）
    pub publish_timeout_seconds: u64,
}

/// 调度派发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// 触发器轮询间隔（秒）
    pub tick_interval_seconds: u64,
    /// 并发派发上限
    pub max_concurrent_dispatches: usize,
    /// 批次时间窗口查找容差（分钟）
    pub batch_tolerance_minutes: i64,
    /// 恢复扫描间隔（秒）
    pub recovery_interval_seconds: u64,
    /// running状态任务的过期阈值（秒）
    pub stale_task_threshold_seconds: i64,
    /// 错过触发的回溯上限（小时），超出的历史场次不再补发
    pub missed_fire_lookback_hours: i64,
    /// 隔离锁获取最大尝试次数
    pub guard_acquire_max_attempts: u32,
    /// 隔离锁获取重试基础退避（毫秒）
    pub guard_acquire_backoff_ms: u64,
}

/// 可观测性配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://publisher.db".to_string(),
                max_connections: 10,
                min_connections: 1,
                connection_timeout_seconds: 30,
                idle_timeout_seconds: 600,
            },
            queue: QueueConfig {
                task_queue: "publish_tasks".to_string(),
                control_queue: "publish_control".to_string(),
                capacity: 1000,
                publish_timeout_seconds: 30,
            },
            dispatcher: DispatcherConfig {
                enabled: true,
                tick_interval_seconds: 1,
                max_concurrent_dispatches: 8,
                batch_tolerance_minutes: 5,
                recovery_interval_seconds: 60,
                stale_task_threshold_seconds: 1800,
                missed_fire_lookback_hours: 168,
                guard_acquire_max_attempts: 3,
                guard_acquire_backoff_ms: 50,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                log_format: "pretty".to_string(),
                metrics_enabled: true,
            },
        }
    }
}

impl AppConfig {
    /// 校验配置取值范围，拒绝无法安全运行的配置
    pub fn validate(&self) -> PublisherResult<()> {
        if self.database.url.is_empty() {
            return Err(PublisherError::Configuration(
                "数据库URL不能为空".to_string(),
            ));
        }
        if self.database.max_connections < self.database.min_connections {
            return Err(PublisherError::Configuration(format!(
                "数据库最大连接数 {} 小于最小连接数 {}",
                self.database.max_connections, self.database.min_connections
            )));
        }
        if self.queue.task_queue.is_empty() || self.queue.control_queue.is_empty() {
            return Err(PublisherError::Configuration(
                "队列名不能为空".to_string(),
            ));
        }
        if self.queue.capacity == 0 {
            return Err(PublisherError::Configuration(
                "队列容量必须大于0".to_string(),
            ));
        }
        if self.dispatcher.tick_interval_seconds == 0 {
            return Err(PublisherError::Configuration(
                "触发器轮询间隔必须大于0".to_string(),
            ));
        }
        if self.dispatcher.max_concurrent_dispatches == 0 {
            return Err(PublisherError::Configuration(
                "并发派发上限必须大于0".to_string(),
            ));
        }
        if self.dispatcher.batch_tolerance_minutes <= 0 {
            return Err(PublisherError::Configuration(
                "批次查找容差必须大于0".to_string(),
            ));
        }
        if self.dispatcher.stale_task_threshold_seconds <= 0 {
            return Err(PublisherError::Configuration(
                "过期任务阈值必须大于0".to_string(),
            ));
        }
        if self.dispatcher.missed_fire_lookback_hours <= 0 {
            return Err(PublisherError::Configuration(
                "错过触发回溯上限必须大于0".to_string(),
            ));
        }
        if self.dispatcher.guard_acquire_max_attempts == 0 {
            return Err(PublisherError::Configuration(
                "隔离锁尝试次数必须大于0".to_string(),
            ));
        }
        match self.observability.log_format.as_str() {
            "json" | "pretty" => {}
            other => {
                return Err(PublisherError::Configuration(format!(
                    "不支持的日志格式: {other}"
                )));
            }
        }
        Ok(())
    }
}
