use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 发布任务
///
/// # 字段说明
///
/// - `id`: 派发时生成的全局唯一标识，从不由账号或内容标识推导
/// - `isolation_key`: 宽隔离键 (账号, 流水线, 派发令牌)，保证并发任务不共享资源路径
/// - `batch_id`: 同一次触发产生的任务共享的批次标识
/// - `variant`: 策略解析出的变体标签（A/B实验用）
/// - `metrics`: 执行端完成后回填的表现指标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishTask {
    pub id: Uuid,
    pub config_id: i64,
    pub group_id: i64,
    pub account_id: String,
    pub pipeline_id: String,
    pub strategy_id: Option<i64>,
    pub parameters: Value,
    pub variant: Option<String>,
    pub status: TaskStatus,
    pub failure_reason: Option<FailureReason>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub isolation_key: String,
    pub batch_id: Uuid,
    pub slot_id: Option<i64>,
    /// 节奏计划分配的最早可执行时间
    pub earliest_start_at: Option<DateTime<Utc>>,
    pub metrics: Option<PerformanceMetrics>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PublishTask {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Running)
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "PENDING"),
            TaskStatus::Running => write!(f, "RUNNING"),
            TaskStatus::Completed => write!(f, "COMPLETED"),
            TaskStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "RUNNING" => Ok(TaskStatus::Running),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(format!("未知的任务状态: {other}")),
        }
    }
}

/// 任务失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// 参数校验失败
    Validation,
    /// 去重锁被占用
    DuplicateInFlight,
    /// 隔离资源重试耗尽
    ResourceBusy,
    /// 执行端上报失败
    RunnerFailure,
    /// 过期锁回收
    Timeout,
    /// 外部取消
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::Validation => "validation",
            FailureReason::DuplicateInFlight => "duplicate_in_flight",
            FailureReason::ResourceBusy => "resource_busy",
            FailureReason::RunnerFailure => "runner_failure",
            FailureReason::Timeout => "timeout",
            FailureReason::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FailureReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validation" => Ok(FailureReason::Validation),
            "duplicate_in_flight" => Ok(FailureReason::DuplicateInFlight),
            "resource_busy" => Ok(FailureReason::ResourceBusy),
            "runner_failure" => Ok(FailureReason::RunnerFailure),
            "timeout" => Ok(FailureReason::Timeout),
            "cancelled" => Ok(FailureReason::Cancelled),
            other => Err(format!("未知的失败原因: {other}")),
        }
    }
}

/// 任务表现指标，完成后由执行端回填
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub shares: u64,
    #[serde(default)]
    pub watch_time_seconds: f64,
    /// 平台特有指标
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, f64>,
}

impl PerformanceMetrics {
    /// 按指标名取值，供策略分析器选择评估指标
    pub fn get(&self, metric: &str) -> Option<f64> {
        match metric {
            "views" => Some(self.views as f64),
            "likes" => Some(self.likes as f64),
            "comments" => Some(self.comments as f64),
            "shares" => Some(self.shares as f64),
            "watch_time_seconds" => Some(self.watch_time_seconds),
            other => self.extra.get(other).copied(),
        }
    }

    pub fn merge_sum(&mut self, other: &PerformanceMetrics) {
        self.views += other.views;
        self.likes += other.likes;
        self.comments += other.comments;
        self.shares += other.shares;
        self.watch_time_seconds += other.watch_time_seconds;
        for (key, value) in &other.extra {
            *self.extra.entry(key.clone()).or_insert(0.0) += value;
        }
    }
}
