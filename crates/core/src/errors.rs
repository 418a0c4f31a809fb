use thiserror::Error;
use uuid::Uuid;

/// 发布调度器错误类型定义
#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("发布配置未找到: {id}")]
    ConfigNotFound { id: i64 },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: Uuid },

    #[error("批次未找到: {id}")]
    BatchNotFound { id: Uuid },

    #[error("在时间窗口内未找到批次: 配置 {config_id}")]
    BatchNotFoundInWindow { config_id: i64 },

    #[error("策略未找到: {id}")]
    StrategyNotFound { id: i64 },

    #[error("流水线未找到: {id}")]
    PipelineNotFound { id: String },

    #[error("账号组未找到: {id}")]
    AccountGroupNotFound { id: i64 },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的触发配置: {0}")]
    InvalidTrigger(String),

    #[error("无效的时区偏移: {value}")]
    InvalidTimezone { value: String },

    #[error("参数校验失败: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("账号组 {group_id} 无可用成员")]
    NoEligibleAccounts { group_id: i64 },

    #[error("内容去重锁被占用: {pipeline_id}/{content_id}")]
    DuplicateInFlight {
        pipeline_id: String,
        content_id: String,
    },

    #[error("隔离资源忙: {key}")]
    ResourceBusy { key: String },

    #[error("检测到过期锁: {key}")]
    StaleLock { key: String },

    #[error("执行端上报失败: {0}")]
    RunnerReportedFailure(String),

    #[error("无效的状态转换: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("任务不可重试: {id} (状态: {status})")]
    TaskNotRetryable { id: Uuid, status: String },

    #[error("发布配置 {id} 仍有 {count} 个在途任务")]
    ConfigHasActiveTasks { id: i64, count: usize },

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for PublisherError {
    fn from(err: serde_json::Error) -> Self {
        PublisherError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type PublisherResult<T> = std::result::Result<T, PublisherError>;
