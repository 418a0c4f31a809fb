use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use publisher_core::{PublisherError, PublisherResult};
use publisher_domain::entities::BatchSummary;
use publisher_domain::repositories::TaskRepository;

/// 批次追踪器
///
/// 批次是派生视图：汇总每次按需从成员任务重算，不独立落库，
/// 因此无状态变化时反复读取结果恒等
pub struct BatchTracker {
    task_repo: Arc<dyn TaskRepository>,
    tolerance: Duration,
}

impl BatchTracker {
    pub fn new(task_repo: Arc<dyn TaskRepository>, tolerance_minutes: i64) -> Self {
        Self {
            task_repo,
            tolerance: Duration::minutes(tolerance_minutes),
        }
    }

    /// 汇总一个批次的状态计数与表现指标
    pub async fn summarize(&self, batch_id: Uuid) -> PublisherResult<BatchSummary> {
        let tasks = self.task_repo.find_by_batch(batch_id).await?;
        BatchSummary::from_tasks(batch_id, &tasks)
            .ok_or(PublisherError::BatchNotFound { id: batch_id })
    }

    /// 按配置和大致触发时间反查批次
    ///
    /// 兼容只知道配置与粗略时间的外部调用方；容差窗口内有多个批次
    /// 时返回创建时间最接近的那个。有批次标识时应直接用summarize
    pub async fn find_batch(
        &self,
        config_id: i64,
        approximate_time: DateTime<Utc>,
    ) -> PublisherResult<Uuid> {
        let from = approximate_time - self.tolerance;
        let to = approximate_time + self.tolerance;
        let tasks = self
            .task_repo
            .find_by_config_created_between(config_id, from, to)
            .await?;

        // 每个批次取最早的任务创建时间作为批次时间
        let mut batches: HashMap<Uuid, DateTime<Utc>> = HashMap::new();
        for task in &tasks {
            let entry = batches.entry(task.batch_id).or_insert(task.created_at);
            if task.created_at < *entry {
                *entry = task.created_at;
            }
        }

        debug!(
            "批次反查: 配置={}, 窗口内批次数={}",
            config_id,
            batches.len()
        );

        batches
            .into_iter()
            .min_by_key(|(batch_id, created)| {
                let distance = (*created - approximate_time).num_milliseconds().abs();
                (distance, *batch_id)
            })
            .map(|(batch_id, _)| batch_id)
            .ok_or(PublisherError::BatchNotFoundInWindow { config_id })
    }
}
