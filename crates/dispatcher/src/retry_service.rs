use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::dispatch::TaskDispatcher;
use crate::guard::ConcurrencyGuard;
use publisher_core::{PublisherError, PublisherResult};
use publisher_domain::entities::{PublishTask, TaskStatus};
use publisher_domain::repositories::TaskRepository;

/// 重试策略配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 单个任务谱系的最大重试次数
    pub max_retries: i32,
    /// 基础重试间隔（秒）
    pub base_interval_seconds: u64,
    /// 最大重试间隔（秒）
    pub max_interval_seconds: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_interval_seconds: 60,  // 1分钟
            max_interval_seconds: 3600, // 1小时
            backoff_multiplier: 2.0,    // 指数退避倍数
            jitter_factor: 0.1,         // 10%的随机抖动
        }
    }
}

/// 任务重试服务
///
/// 重试永远创建新任务：原任务的终态和字段原样保留，新任务携带
/// 全新的标识与隔离令牌，谱系通过批次和重试计数串联
pub struct TaskRetryService {
    task_repo: Arc<dyn TaskRepository>,
    dispatcher: Arc<TaskDispatcher>,
    retry_config: RetryConfig,
}

impl TaskRetryService {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        dispatcher: Arc<TaskDispatcher>,
        retry_config: Option<RetryConfig>,
    ) -> Self {
        Self {
            task_repo,
            dispatcher,
            retry_config: retry_config.unwrap_or_default(),
        }
    }

    /// 重试一个失败任务
    ///
    /// 返回新创建的任务；隔离资源忙时新任务以失败状态入库，
    /// 不影响原任务
    pub async fn retry(&self, task_id: Uuid) -> PublisherResult<PublishTask> {
        debug!("处理任务重试请求: {}", task_id);

        let original = self
            .task_repo
            .find_by_id(task_id)
            .await?
            .ok_or(PublisherError::TaskNotFound { id: task_id })?;

        if original.status != TaskStatus::Failed {
            return Err(PublisherError::TaskNotRetryable {
                id: task_id,
                status: original.status.to_string(),
            });
        }
        if original.retry_count >= self.retry_config.max_retries {
            debug!(
                "任务 {} 已达到最大重试次数 {}, 不再重试",
                task_id, self.retry_config.max_retries
            );
            return Err(PublisherError::TaskNotRetryable {
                id: task_id,
                status: format!("retry_count={}", original.retry_count),
            });
        }

        let retry_task = self.build_retry_task(&original);
        info!(
            "为失败任务 {} 创建重试任务 {}, 重试次数: {}, 最早执行时间: {}",
            task_id,
            retry_task.id,
            retry_task.retry_count,
            retry_task
                .earliest_start_at
                .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_default()
        );

        self.dispatcher.dispatch_single(retry_task).await
    }

    /// 构造重试任务
    ///
    /// 新任务保持在原批次内，批次汇总能看到完整的尝试历史
    fn build_retry_task(&self, original: &PublishTask) -> PublishTask {
        let id = Uuid::new_v4();
        let earliest_start_at = self.calculate_next_retry_time(original.retry_count);
        PublishTask {
            id,
            config_id: original.config_id,
            group_id: original.group_id,
            account_id: original.account_id.clone(),
            pipeline_id: original.pipeline_id.clone(),
            strategy_id: original.strategy_id,
            parameters: original.parameters.clone(),
            variant: original.variant.clone(),
            status: TaskStatus::Pending,
            failure_reason: None,
            error_message: None,
            retry_count: original.retry_count + 1,
            isolation_key: ConcurrencyGuard::isolation_key(
                &original.account_id,
                &original.pipeline_id,
                id,
            ),
            batch_id: original.batch_id,
            slot_id: None,
            earliest_start_at: Some(earliest_start_at),
            metrics: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// 计算下次重试时间
    fn calculate_next_retry_time(&self, retry_count: i32) -> DateTime<Utc> {
        let base_interval = self.retry_config.base_interval_seconds as f64;
        let multiplier = self.retry_config.backoff_multiplier;
        let max_interval = self.retry_config.max_interval_seconds as f64;
        let jitter_factor = self.retry_config.jitter_factor;

        // 计算指数退避间隔
        let exponential_interval = base_interval * multiplier.powi(retry_count);

        // 限制最大间隔
        let capped_interval = exponential_interval.min(max_interval);

        // 添加随机抖动以避免雷群效应
        let jitter = capped_interval * jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let final_interval = (capped_interval + jitter).max(base_interval);

        let now = Utc::now();
        let duration = Duration::from_secs(final_interval as u64);

        now + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::seconds(60))
    }
}
