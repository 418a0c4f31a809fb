use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use publisher_core::{DispatcherConfig, PublisherError, PublisherResult, QueueConfig};
use publisher_domain::entities::{FailureReason, PublishTask, TaskStatus};
use publisher_domain::messaging::MessageQueue;
use publisher_domain::repositories::{ConfigRepository, TaskRepository};

use crate::guard::{ConcurrencyGuard, LockKind};
use crate::metrics::DispatchMetrics;
use crate::trigger::TriggerEngine;

/// 恢复报告
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    pub stale_tasks: Vec<PublishTask>,
    pub orphaned_locks_released: usize,
    pub pending_fires: usize,
    pub recovery_duration_ms: u64,
    pub errors: Vec<String>,
}

/// 系统健康状态
#[derive(Debug, Clone)]
pub struct SystemHealthStatus {
    pub database_healthy: bool,
    pub message_queue_healthy: bool,
    pub active_configs: u32,
    pub running_tasks: u32,
    pub locks_held: u32,
    pub last_check_time: DateTime<Utc>,
}

/// 恢复服务
///
/// 周期性对账：滞留任务强制失败、持有者已不在途的残留锁回收、
/// 停机期间漏掉的调度点盘点。漏发的调度点由下一轮派发循环补发，
/// 这里只统计不动手
pub struct SystemRecoveryService {
    config_repo: Arc<dyn ConfigRepository>,
    task_repo: Arc<dyn TaskRepository>,
    guard: Arc<ConcurrencyGuard>,
    queue: Arc<dyn MessageQueue>,
    metrics: Arc<DispatchMetrics>,
    trigger: TriggerEngine,
    stale_threshold_seconds: u64,
    task_queue: String,
}

impl SystemRecoveryService {
    pub fn new(
        config_repo: Arc<dyn ConfigRepository>,
        task_repo: Arc<dyn TaskRepository>,
        guard: Arc<ConcurrencyGuard>,
        queue: Arc<dyn MessageQueue>,
        metrics: Arc<DispatchMetrics>,
        settings: &DispatcherConfig,
        queue_settings: &QueueConfig,
    ) -> Self {
        Self {
            config_repo,
            task_repo,
            guard,
            queue,
            metrics,
            trigger: TriggerEngine::new(settings.missed_fire_lookback_hours),
            stale_threshold_seconds: settings.stale_task_threshold_seconds as u64,
            task_queue: queue_settings.task_queue.clone(),
        }
    }

    /// 执行一轮对账
    pub async fn recover_system_state(&self) -> PublisherResult<RecoveryReport> {
        debug!("开始系统状态对账");
        let start_time = std::time::Instant::now();
        let mut errors = Vec::new();

        let stale_tasks = match self.recover_stale_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                let error_msg = format!("处理滞留任务失败: {e}");
                warn!("{}", error_msg);
                errors.push(error_msg);
                Vec::new()
            }
        };

        let orphaned_locks_released = match self.sweep_orphaned_locks().await {
            Ok(count) => count,
            Err(e) => {
                let error_msg = format!("回收残留锁失败: {e}");
                warn!("{}", error_msg);
                errors.push(error_msg);
                0
            }
        };

        let pending_fires = match self.count_pending_fires().await {
            Ok(count) => count,
            Err(e) => {
                let error_msg = format!("盘点待补发调度点失败: {e}");
                warn!("{}", error_msg);
                errors.push(error_msg);
                0
            }
        };

        let report = RecoveryReport {
            stale_tasks,
            orphaned_locks_released,
            pending_fires,
            recovery_duration_ms: start_time.elapsed().as_millis() as u64,
            errors,
        };

        if !report.stale_tasks.is_empty()
            || report.orphaned_locks_released > 0
            || report.pending_fires > 0
        {
            info!(
                "状态对账完成，耗时 {}ms: 滞留任务 {} 个，回收残留锁 {} 个，待补发调度点 {} 个",
                report.recovery_duration_ms,
                report.stale_tasks.len(),
                report.orphaned_locks_released,
                report.pending_fires
            );
        }

        Ok(report)
    }

    /// 检查系统健康状态
    pub async fn check_system_health(&self) -> PublisherResult<SystemHealthStatus> {
        debug!("检查系统健康状态");

        let now = Utc::now();
        let mut status = SystemHealthStatus {
            database_healthy: false,
            message_queue_healthy: false,
            active_configs: 0,
            running_tasks: 0,
            locks_held: 0,
            last_check_time: now,
        };

        match self.config_repo.find_active().await {
            Ok(configs) => {
                status.database_healthy = true;
                status.active_configs = configs.len() as u32;
            }
            Err(e) => {
                warn!("数据库连接异常: {}", e);
            }
        }

        match self.queue.get_queue_size(&self.task_queue).await {
            Ok(_) => {
                status.message_queue_healthy = true;
            }
            Err(e) => {
                warn!("消息队列连接异常: {}", e);
            }
        }

        match self.task_repo.find_running_started_before(now).await {
            Ok(tasks) => {
                status.running_tasks = tasks.len() as u32;
            }
            Err(e) => {
                warn!("获取运行中任务数量失败: {}", e);
            }
        }

        status.locks_held = self.guard.locks_held().await as u32;
        Ok(status)
    }

    /// 滞留任务处理
    ///
    /// 开始执行后长时间没有任何状态回报的任务视为执行端失联，
    /// 强制转为失败终态并回收它持有的锁
    async fn recover_stale_tasks(&self) -> PublisherResult<Vec<PublishTask>> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.stale_threshold_seconds as i64);
        let stale = self.task_repo.find_running_started_before(cutoff).await?;
        let mut failed = Vec::new();

        for mut task in stale {
            warn!(
                "任务 {} 运行超过 {} 秒无状态回报，判定为滞留并强制失败",
                task.id, self.stale_threshold_seconds
            );

            task.status = TaskStatus::Failed;
            task.failure_reason = Some(FailureReason::Timeout);
            task.error_message = Some(
                PublisherError::StaleLock {
                    key: task.isolation_key.clone(),
                }
                .to_string(),
            );
            task.finished_at = Some(Utc::now());

            let updated = self.task_repo.update(&task).await?;
            self.guard.release_for_task(updated.id).await;
            self.metrics.record_task_failure(&updated.pipeline_id, "timeout");
            self.release_dedup_if_batch_done(updated.batch_id).await?;
            failed.push(updated);
        }

        Ok(failed)
    }

    async fn release_dedup_if_batch_done(&self, batch_id: Uuid) -> PublisherResult<()> {
        let batch = self.task_repo.find_by_batch(batch_id).await?;
        if !batch.is_empty() && batch.iter().all(|t| t.is_terminal()) {
            let freed = self.guard.release_for_owner(batch_id).await;
            if freed > 0 {
                info!("批次 {} 全部终态，释放 {} 个内容去重锁", batch_id, freed);
            }
        }
        Ok(())
    }

    /// 残留锁回收
    ///
    /// 隔离锁的持有者是任务，去重锁的持有者是批次；持有者已终态或
    /// 查无记录的锁即为残留。刚获取的锁给一个阈值宽限期，
    /// 避免扫到正在派发途中的批次
    async fn sweep_orphaned_locks(&self) -> PublisherResult<usize> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.stale_threshold_seconds as i64);
        let mut released = 0usize;

        for lock in self.guard.held_locks().await {
            if lock.acquired_at >= cutoff {
                continue;
            }

            let owner_in_flight = match lock.kind {
                LockKind::Isolation => self
                    .task_repo
                    .find_by_id(lock.owner)
                    .await?
                    .map(|task| task.is_in_flight())
                    .unwrap_or(false),
                LockKind::Dedup => self
                    .task_repo
                    .find_by_batch(lock.owner)
                    .await?
                    .iter()
                    .any(|task| task.is_in_flight()),
            };

            if !owner_in_flight {
                warn!(
                    "锁 {} 的持有者 {} 已不在途，强制释放 (持有自 {})",
                    lock.key, lock.owner, lock.acquired_at
                );
                released += match lock.kind {
                    LockKind::Isolation => self.guard.release_for_task(lock.owner).await,
                    LockKind::Dedup => self.guard.release_for_owner(lock.owner).await,
                };
            }
        }

        if released > 0 {
            self.metrics.record_stale_locks_released(released as u64);
            self.metrics
                .update_locks_held(self.guard.locks_held().await as f64);
        }
        Ok(released)
    }

    /// 盘点停机期间漏掉的调度点
    async fn count_pending_fires(&self) -> PublisherResult<usize> {
        let now = Utc::now();
        let mut due = 0usize;

        for config in self.config_repo.find_active().await? {
            match self.trigger.evaluate(&config, now) {
                Ok(decision) if decision.should_fire => {
                    info!(
                        "配置 {} 存在待补发的调度点: {:?}",
                        config.id, decision.occurrence
                    );
                    due += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("评估配置 {} 的触发器失败: {}", config.id, e);
                }
            }
        }

        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    use publisher_core::AppConfig;
    use publisher_domain::entities::TriggerConfig;
    use publisher_testing_utils::builders::{PublishConfigBuilder, TaskBuilder};
    use publisher_testing_utils::mocks::{
        MockConfigRepository, MockMessageQueue, MockTaskRepository,
    };

    fn build_service(
        config_repo: Arc<MockConfigRepository>,
        task_repo: Arc<MockTaskRepository>,
        guard: Arc<ConcurrencyGuard>,
        stale_threshold_seconds: u64,
    ) -> SystemRecoveryService {
        let app = AppConfig::default();
        let mut settings = app.dispatcher.clone();
        settings.stale_task_threshold_seconds = stale_threshold_seconds as i64;
        SystemRecoveryService::new(
            config_repo,
            task_repo,
            guard,
            Arc::new(MockMessageQueue::new()),
            Arc::new(DispatchMetrics::new().unwrap()),
            &settings,
            &app.queue,
        )
    }

    #[tokio::test]
    async fn test_stale_running_task_forced_failed() {
        let task = TaskBuilder::new()
            .with_status(TaskStatus::Running)
            .with_started_at(Utc::now() - chrono::Duration::hours(2))
            .build();
        let guard = Arc::new(ConcurrencyGuard::new());
        guard.acquire(&task.isolation_key, task.id).await.unwrap();

        let task_repo = Arc::new(MockTaskRepository::with_tasks(vec![task.clone()]));
        let service = build_service(
            Arc::new(MockConfigRepository::new()),
            task_repo.clone(),
            guard.clone(),
            1800,
        );

        let report = service.recover_system_state().await.unwrap();

        assert_eq!(report.stale_tasks.len(), 1);
        assert!(report.errors.is_empty());

        let stored = task_repo.get_all_tasks();
        let failed = stored.iter().find(|t| t.id == task.id).unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.failure_reason, Some(FailureReason::Timeout));
        assert!(failed
            .error_message
            .as_deref()
            .unwrap()
            .contains(&task.isolation_key));
        assert_eq!(guard.locks_held().await, 0);
    }

    #[tokio::test]
    async fn test_recent_running_task_untouched() {
        let task = TaskBuilder::new()
            .with_status(TaskStatus::Running)
            .with_started_at(Utc::now() - chrono::Duration::seconds(10))
            .build();
        let task_repo = Arc::new(MockTaskRepository::with_tasks(vec![task.clone()]));
        let service = build_service(
            Arc::new(MockConfigRepository::new()),
            task_repo.clone(),
            Arc::new(ConcurrencyGuard::new()),
            1800,
        );

        let report = service.recover_system_state().await.unwrap();

        assert!(report.stale_tasks.is_empty());
        let stored = task_repo.get_all_tasks();
        assert_eq!(stored[0].status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_orphaned_isolation_lock_released() {
        let guard = Arc::new(ConcurrencyGuard::new());
        let vanished_task = Uuid::new_v4();
        guard
            .acquire("acct-1:video:gone", vanished_task)
            .await
            .unwrap();

        // 在途任务的锁即便早于宽限期也要保住
        let pending = TaskBuilder::new().with_status(TaskStatus::Pending).build();
        guard
            .acquire(&pending.isolation_key, pending.id)
            .await
            .unwrap();

        let task_repo = Arc::new(MockTaskRepository::with_tasks(vec![pending.clone()]));
        let service = build_service(
            Arc::new(MockConfigRepository::new()),
            task_repo,
            guard.clone(),
            0,
        );

        let report = service.recover_system_state().await.unwrap();

        assert_eq!(report.orphaned_locks_released, 1);
        assert_eq!(guard.locks_held().await, 1);
        assert!(guard.is_held(&pending.isolation_key).await);
    }

    #[tokio::test]
    async fn test_orphaned_dedup_lock_released_when_batch_terminal() {
        let done_batch = Uuid::new_v4();
        let live_batch = Uuid::new_v4();
        let done_task = TaskBuilder::new()
            .with_status(TaskStatus::Completed)
            .with_batch(done_batch)
            .build();
        let live_task = TaskBuilder::new()
            .with_status(TaskStatus::Running)
            .with_batch(live_batch)
            .build();

        let guard = Arc::new(ConcurrencyGuard::new());
        guard
            .acquire_dedup("video", "episode-1", done_batch)
            .await
            .unwrap();
        guard
            .acquire_dedup("video", "episode-2", live_batch)
            .await
            .unwrap();

        let task_repo = Arc::new(MockTaskRepository::with_tasks(vec![done_task, live_task]));
        let service = build_service(
            Arc::new(MockConfigRepository::new()),
            task_repo,
            guard.clone(),
            0,
        );

        let report = service.recover_system_state().await.unwrap();

        assert_eq!(report.orphaned_locks_released, 1);
        assert_eq!(guard.dedup_held().await, 1);
    }

    #[tokio::test]
    async fn test_pending_fires_counted_for_due_configs() {
        let due = PublishConfigBuilder::new()
            .with_id(1)
            .with_trigger(TriggerConfig::Daily {
                at: NaiveTime::from_hms_opt(3, 0, 0).unwrap(),
            })
            .with_created_at(Utc::now() - chrono::Duration::days(2))
            .build();
        let idle = PublishConfigBuilder::new()
            .with_id(2)
            .with_trigger(TriggerConfig::Manual)
            .build();

        let config_repo = Arc::new(MockConfigRepository::with_configs(vec![due, idle]));
        let service = build_service(
            config_repo,
            Arc::new(MockTaskRepository::new()),
            Arc::new(ConcurrencyGuard::new()),
            1800,
        );

        let report = service.recover_system_state().await.unwrap();
        assert_eq!(report.pending_fires, 1);
    }

    #[tokio::test]
    async fn test_health_check_reports_counts() {
        let config = PublishConfigBuilder::new().build();
        let running = TaskBuilder::new()
            .with_status(TaskStatus::Running)
            .with_started_at(Utc::now() - chrono::Duration::seconds(5))
            .build();

        let service = build_service(
            Arc::new(MockConfigRepository::with_configs(vec![config])),
            Arc::new(MockTaskRepository::with_tasks(vec![running])),
            Arc::new(ConcurrencyGuard::new()),
            1800,
        );

        let health = service.check_system_health().await.unwrap();

        assert!(health.database_healthy);
        assert!(health.message_queue_healthy);
        assert_eq!(health.active_configs, 1);
        assert_eq!(health.running_tasks, 1);
        assert_eq!(health.locks_held, 0);
    }
}
