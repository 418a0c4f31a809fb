//! 任务状态回报处理
//!
//! 执行端回报的状态变更在这里落库，终态任务顺带释放隔离锁；
//! 整个批次转入终态后再释放内容去重锁

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use publisher_core::{PublisherError, PublisherResult, QueueConfig};
use publisher_domain::entities::{FailureReason, PerformanceMetrics, PublishTask, TaskStatus};
use publisher_domain::messaging::{CancelTaskMessage, Message, MessageQueue};
use publisher_domain::repositories::TaskRepository;

use crate::guard::ConcurrencyGuard;
use crate::metrics::DispatchMetrics;

pub struct TaskStatusService {
    task_repo: Arc<dyn TaskRepository>,
    guard: Arc<ConcurrencyGuard>,
    queue: Arc<dyn MessageQueue>,
    metrics: Arc<DispatchMetrics>,
    control_queue: String,
}

impl TaskStatusService {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        guard: Arc<ConcurrencyGuard>,
        queue: Arc<dyn MessageQueue>,
        metrics: Arc<DispatchMetrics>,
        queue_settings: &QueueConfig,
    ) -> Self {
        Self {
            task_repo,
            guard,
            queue,
            metrics,
            control_queue: queue_settings.control_queue.clone(),
        }
    }

    /// 处理执行端的状态回报
    ///
    /// 重复回报当前状态视为幂等成功；不在转换表内的变更直接拒绝
    pub async fn report_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        performance: Option<PerformanceMetrics>,
        error_message: Option<String>,
    ) -> PublisherResult<PublishTask> {
        debug!("处理任务 {} 的状态回报: {}", task_id, status);

        let mut task = self
            .task_repo
            .find_by_id(task_id)
            .await?
            .ok_or(PublisherError::TaskNotFound { id: task_id })?;

        if task.status == status {
            debug!("任务 {} 已处于状态 {}, 回报视为幂等", task_id, status);
            return Ok(task);
        }
        if !is_valid_transition(task.status, status) {
            return Err(PublisherError::InvalidStateTransition {
                from: task.status.to_string(),
                to: status.to_string(),
            });
        }

        let now = Utc::now();
        match status {
            TaskStatus::Running => {
                task.status = TaskStatus::Running;
                task.started_at = Some(now);
                info!("任务 {} 开始执行", task_id);
            }
            TaskStatus::Completed => {
                task.status = TaskStatus::Completed;
                task.finished_at = Some(now);
                task.metrics = performance;
                info!("任务 {} 执行完成", task_id);
            }
            TaskStatus::Failed => {
                task.status = TaskStatus::Failed;
                task.failure_reason = Some(FailureReason::RunnerFailure);
                task.error_message = error_message;
                task.finished_at = Some(now);
                self.metrics
                    .record_task_failure(&task.pipeline_id, "runner_failure");
                warn!(
                    "任务 {} 执行失败: {}",
                    task_id,
                    task.error_message.as_deref().unwrap_or("未知错误")
                );
            }
            TaskStatus::Pending => {
                // 转换表不含回退到 Pending 的路径，同状态在上面已经幂等返回
                return Err(PublisherError::InvalidStateTransition {
                    from: task.status.to_string(),
                    to: status.to_string(),
                });
            }
        }

        let updated = self.task_repo.update(&task).await?;
        if updated.is_terminal() {
            self.release_after_terminal(&updated).await?;
        }
        Ok(updated)
    }

    /// 取消一个未终态的任务
    ///
    /// 任务立即转为失败终态并释放锁；执行端可能已经领走任务，
    /// 再补发一条取消指令让它自行停止
    pub async fn cancel(&self, task_id: Uuid, requester: &str) -> PublisherResult<PublishTask> {
        let mut task = self
            .task_repo
            .find_by_id(task_id)
            .await?
            .ok_or(PublisherError::TaskNotFound { id: task_id })?;

        if task.is_terminal() {
            return Err(PublisherError::InvalidStateTransition {
                from: task.status.to_string(),
                to: TaskStatus::Failed.to_string(),
            });
        }

        task.status = TaskStatus::Failed;
        task.failure_reason = Some(FailureReason::Cancelled);
        task.error_message = Some(format!("已被 {} 取消", requester));
        task.finished_at = Some(Utc::now());

        let updated = self.task_repo.update(&task).await?;
        self.metrics
            .record_task_failure(&updated.pipeline_id, "cancelled");
        self.release_after_terminal(&updated).await?;

        let message = Message::cancel_task(CancelTaskMessage {
            task_id,
            requester: requester.to_string(),
            timestamp: Utc::now(),
        });
        if let Err(e) = self
            .queue
            .publish_message(&self.control_queue, &message)
            .await
        {
            // 任务已终态且锁已释放，指令丢失只影响执行端自行停止
            warn!("任务 {} 的取消指令发送失败: {}", task_id, e);
        }

        info!("任务 {} 已被 {} 取消", task_id, requester);
        Ok(updated)
    }

    /// 终态任务的锁回收
    async fn release_after_terminal(&self, task: &PublishTask) -> PublisherResult<()> {
        let released = self.guard.release_for_task(task.id).await;
        if released > 0 {
            debug!("任务 {} 终态，释放 {} 个隔离锁", task.id, released);
        }

        let batch = self.task_repo.find_by_batch(task.batch_id).await?;
        if !batch.is_empty() && batch.iter().all(|t| t.is_terminal()) {
            let freed = self.guard.release_for_owner(task.batch_id).await;
            if freed > 0 {
                info!(
                    "批次 {} 全部终态，释放 {} 个内容去重锁",
                    task.batch_id, freed
                );
            }
        }

        self.metrics
            .update_locks_held(self.guard.locks_held().await as f64);
        Ok(())
    }
}

/// 执行端视角的合法状态转换
fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;

    match (from, to) {
        (Pending, Running) => true,
        (Pending, Failed) => true, // 派发途中取消或预检失败
        (Running, Completed) => true,
        (Running, Failed) => true,
        (a, b) if a == b => true,
        _ => false,
    }
}
