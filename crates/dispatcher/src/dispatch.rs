use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::guard::{ConcurrencyGuard, LockHandle};
use crate::metrics::DispatchMetrics;
use crate::slots::SlotPlanner;
use crate::strategies::{SelectedAccount, StrategyResolver};
use publisher_core::{DispatcherConfig, PublisherError, PublisherResult, QueueConfig};
use publisher_domain::entities::{
    parse_offset, BatchSummary, FailureReason, PublishConfig, PublishTask, ScheduleSlot,
    TaskStatus,
};
use publisher_domain::messaging::{Message, MessageQueue, TaskExecutionMessage};
use publisher_domain::repositories::{
    ConfigRepository, PipelineRegistry, SlotRepository, TaskRepository,
};

/// 一次触发在进入逐账号循环前就注定失败的原因
///
/// 参数、目标、去重锁、节奏窗口都是配置级属性，任一出错时批次内
/// 所有任务以同一失败原因入库留痕，保证每次触发都完整可审计
struct FiringFault {
    reason: FailureReason,
    message: String,
}

/// 任务派发器
///
/// 触发事件到任务记录的转换入口：解析账号、合并参数、申请隔离、
/// 入库并投递执行消息。单个账号的失败不影响同批次其他账号
pub struct TaskDispatcher {
    config_repo: Arc<dyn ConfigRepository>,
    task_repo: Arc<dyn TaskRepository>,
    slot_repo: Arc<dyn SlotRepository>,
    pipelines: Arc<dyn PipelineRegistry>,
    resolver: Arc<StrategyResolver>,
    guard: Arc<ConcurrencyGuard>,
    queue: Arc<dyn MessageQueue>,
    metrics: Arc<DispatchMetrics>,
    settings: DispatcherConfig,
    task_queue: String,
}

impl TaskDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config_repo: Arc<dyn ConfigRepository>,
        task_repo: Arc<dyn TaskRepository>,
        slot_repo: Arc<dyn SlotRepository>,
        pipelines: Arc<dyn PipelineRegistry>,
        resolver: Arc<StrategyResolver>,
        guard: Arc<ConcurrencyGuard>,
        queue: Arc<dyn MessageQueue>,
        metrics: Arc<DispatchMetrics>,
        settings: DispatcherConfig,
        queue_settings: &QueueConfig,
    ) -> Self {
        Self {
            config_repo,
            task_repo,
            slot_repo,
            pipelines,
            resolver,
            guard,
            queue,
            metrics,
            settings,
            task_queue: queue_settings.task_queue.clone(),
        }
    }

    /// 执行一次派发
    ///
    /// 返回 `Ok(None)` 表示账号组无可用成员，本次触发按无操作处理。
    /// 拿到批次汇总时批内所有任务已入库，读取方不会观察到半个批次
    pub async fn dispatch(
        &self,
        config: &PublishConfig,
        fired_at: DateTime<Utc>,
    ) -> PublisherResult<Option<BatchSummary>> {
        let started = Instant::now();
        self.metrics.record_firing(config.id, config.trigger.kind_name());

        let resolved = match self.resolver.resolve(config, fired_at).await {
            Ok(resolved) => resolved,
            Err(PublisherError::NoEligibleAccounts { group_id }) => {
                warn!(
                    "配置 {} 的账号组 {} 无可用成员, 本次触发跳过",
                    config.id, group_id
                );
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let pipeline = self.pipelines.get_pipeline(&config.pipeline_id).await?;
        let batch_id = Uuid::new_v4();
        info!(
            "开始派发: 配置={}, 批次={}, 账号数={}",
            config.id,
            batch_id,
            resolved.accounts.len()
        );

        // 配置级准备，按出错优先级依次短路
        let mut fault: Option<FiringFault> = None;
        let mut parameters = config.parameters.clone();

        match pipeline.schema.resolve(&config.parameters) {
            Ok(merged) => parameters = merged,
            Err(err) => {
                warn!("配置 {} 参数解析失败: {}", config.id, err);
                fault = Some(FiringFault {
                    reason: FailureReason::Validation,
                    message: err.to_string(),
                });
            }
        }

        if fault.is_none() {
            if let Some(target) = &config.target {
                if !pipeline.supports_target(target) {
                    fault = Some(FiringFault {
                        reason: FailureReason::Validation,
                        message: format!("流水线 {} 不支持发布目标 {target}", pipeline.id),
                    });
                }
            }
        }

        // 去重锁按内容维度整批申请，持有者是批次；批次全部终态后释放
        if fault.is_none() {
            if let Some(content_id) = &config.content_id {
                match self
                    .guard
                    .acquire_dedup(&config.pipeline_id, content_id, batch_id)
                    .await
                {
                    Ok(_handle) => {}
                    Err(PublisherError::DuplicateInFlight {
                        pipeline_id,
                        content_id,
                    }) => {
                        self.metrics.record_duplicate_rejection(&pipeline_id, &content_id);
                        fault = Some(FiringFault {
                            reason: FailureReason::DuplicateInFlight,
                            message: format!("内容去重锁被占用: {pipeline_id}/{content_id}"),
                        });
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        let mut slots: Vec<ScheduleSlot> = Vec::new();
        if fault.is_none() {
            if let Some(pacing) = &config.pacing {
                let offset = parse_offset(&config.timezone)?;
                let account_ids: Vec<String> = resolved
                    .accounts
                    .iter()
                    .map(|a| a.member.account_id.clone())
                    .collect();
                match SlotPlanner::plan(config.id, pacing, offset, fired_at, &account_ids) {
                    Ok(planned) => {
                        slots = self.slot_repo.create_many(&planned).await?;
                    }
                    Err(err) => {
                        warn!("配置 {} 槽位展开失败: {}", config.id, err);
                        fault = Some(FiringFault {
                            reason: FailureReason::Validation,
                            message: err.to_string(),
                        });
                    }
                }
            }
        }

        let mut tasks = Vec::with_capacity(resolved.accounts.len());
        for (index, selected) in resolved.accounts.iter().enumerate() {
            let slot = slots.get(index);
            match self
                .dispatch_account(
                    config,
                    selected,
                    resolved.strategy_id,
                    batch_id,
                    &parameters,
                    slot,
                    fault.as_ref(),
                )
                .await
            {
                Ok(task) => tasks.push(task),
                Err(err) => {
                    // 单账号入库失败不拖垮同批次其他账号
                    error!(
                        "批次 {} 账号 {} 派发失败: {}",
                        batch_id, selected.member.account_id, err
                    );
                    self.metrics
                        .record_task_failure(&config.pipeline_id, "storage");
                }
            }
        }

        // 整批在创建阶段就全部终态时，去重锁不会再有状态回报来释放
        if !tasks.is_empty() && tasks.iter().all(|t| t.is_terminal()) {
            self.guard.release_for_owner(batch_id).await;
        }

        self.metrics.update_locks_held(self.guard.locks_held().await as f64);
        if let Ok(depth) = self.queue.get_queue_size(&self.task_queue).await {
            self.metrics.update_queue_depth(f64::from(depth));
        }
        self.metrics
            .record_dispatch(tasks.len(), started.elapsed().as_secs_f64());

        match BatchSummary::from_tasks(batch_id, &tasks) {
            Some(summary) => {
                info!(
                    "派发完成: 批次={}, 任务={}, 失败={}, 耗时={}ms",
                    batch_id,
                    summary.total,
                    summary.failed,
                    started.elapsed().as_millis()
                );
                Ok(Some(summary))
            }
            None => Err(PublisherError::Internal(format!(
                "批次 {batch_id} 没有任何任务入库"
            ))),
        }
    }

    /// 手动触发
    ///
    /// 与定时派发语义完全一致，但不推进配置的上次点火时间，
    /// 定时场次照常判定
    pub async fn manual_trigger(
        &self,
        config_id: i64,
        now: DateTime<Utc>,
    ) -> PublisherResult<BatchSummary> {
        let config = self
            .config_repo
            .find_by_id(config_id)
            .await?
            .ok_or(PublisherError::ConfigNotFound { id: config_id })?;
        if !config.active {
            return Err(PublisherError::Validation {
                field: "active".to_string(),
                message: format!("配置 {config_id} 未激活, 不能手动触发"),
            });
        }

        info!("手动触发配置 {}", config_id);
        match self.dispatch(&config, now).await? {
            Some(summary) => Ok(summary),
            None => Err(PublisherError::NoEligibleAccounts {
                group_id: config.group_id,
            }),
        }
    }

    /// 派发一个已构造好的任务（重试路径）
    ///
    /// 隔离键携带新任务自己的令牌；资源忙时任务以失败状态入库而
    /// 不是丢弃，返回的任务反映最终入库状态
    pub async fn dispatch_single(&self, mut task: PublishTask) -> PublisherResult<PublishTask> {
        match self.acquire_isolation(&task.isolation_key, task.id).await {
            Ok(_handle) => {}
            Err(PublisherError::ResourceBusy { key }) => {
                warn!("重试任务 {} 隔离资源忙: {}", task.id, key);
                fail_task(&mut task, FailureReason::ResourceBusy, format!("隔离资源忙: {key}"));
                self.task_repo.create(&task).await?;
                self.metrics
                    .record_task_failure(&task.pipeline_id, "resource_busy");
                return Ok(task);
            }
            Err(err) => return Err(err),
        }

        if let Err(err) = self.task_repo.create(&task).await {
            self.guard.release_for_task(task.id).await;
            return Err(err);
        }

        if let Err(err) = self.publish_execution(&task).await {
            warn!("重试任务 {} 投递失败: {}", task.id, err);
            fail_task(&mut task, FailureReason::ResourceBusy, err.to_string());
            self.task_repo.update(&task).await?;
            self.guard.release_for_task(task.id).await;
            self.metrics
                .record_task_failure(&task.pipeline_id, "queue_publish");
            return Ok(task);
        }

        self.metrics
            .record_task_retry(&task.pipeline_id, task.retry_count);
        Ok(task)
    }

    /// 单账号派发：构造任务、申请隔离、入库、投递
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_account(
        &self,
        config: &PublishConfig,
        selected: &SelectedAccount,
        strategy_id: Option<i64>,
        batch_id: Uuid,
        parameters: &serde_json::Value,
        slot: Option<&ScheduleSlot>,
        fault: Option<&FiringFault>,
    ) -> PublisherResult<PublishTask> {
        let task_id = Uuid::new_v4();
        let mut task = PublishTask {
            id: task_id,
            config_id: config.id,
            group_id: config.group_id,
            account_id: selected.member.account_id.clone(),
            pipeline_id: config.pipeline_id.clone(),
            strategy_id,
            parameters: parameters.clone(),
            variant: selected.variant.clone(),
            status: TaskStatus::Pending,
            failure_reason: None,
            error_message: None,
            retry_count: 0,
            isolation_key: ConcurrencyGuard::isolation_key(
                &selected.member.account_id,
                &config.pipeline_id,
                task_id,
            ),
            batch_id,
            slot_id: slot.map(|s| s.id),
            earliest_start_at: slot.map(|s| s.scheduled_at),
            metrics: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };

        if let Some(fault) = fault {
            fail_task(&mut task, fault.reason, fault.message.clone());
            self.task_repo.create(&task).await?;
            if let Some(slot) = slot {
                self.slot_repo.mark_skipped(slot.id).await?;
            }
            self.metrics
                .record_task_failure(&config.pipeline_id, &fault.reason.to_string());
            return Ok(task);
        }

        match self.acquire_isolation(&task.isolation_key, task.id).await {
            Ok(_handle) => {}
            Err(PublisherError::ResourceBusy { key }) => {
                fail_task(&mut task, FailureReason::ResourceBusy, format!("隔离资源忙: {key}"));
                self.task_repo.create(&task).await?;
                if let Some(slot) = slot {
                    self.slot_repo.mark_skipped(slot.id).await?;
                }
                self.metrics
                    .record_task_failure(&config.pipeline_id, "resource_busy");
                return Ok(task);
            }
            Err(err) => return Err(err),
        }

        if let Err(err) = self.task_repo.create(&task).await {
            self.guard.release_for_task(task.id).await;
            return Err(err);
        }

        if let Some(slot) = slot {
            self.slot_repo.mark_consumed(slot.id, task.id).await?;
        }

        if let Err(err) = self.publish_execution(&task).await {
            warn!("任务 {} 投递失败: {}", task.id, err);
            fail_task(&mut task, FailureReason::ResourceBusy, err.to_string());
            self.task_repo.update(&task).await?;
            self.guard.release_for_task(task.id).await;
            self.metrics
                .record_task_failure(&config.pipeline_id, "queue_publish");
        }

        Ok(task)
    }

    /// 带退避的隔离锁获取
    ///
    /// 瞬时争用重试有限次，耗尽后返回ResourceBusy由调用方落败任务
    async fn acquire_isolation(&self, key: &str, owner: Uuid) -> PublisherResult<LockHandle> {
        let max_attempts = self.settings.guard_acquire_max_attempts.max(1);
        let base_ms = self.settings.guard_acquire_backoff_ms;
        let mut attempt = 1u32;
        loop {
            match self.guard.acquire(key, owner).await {
                Ok(handle) => return Ok(handle),
                Err(PublisherError::ResourceBusy { key }) => {
                    self.metrics.record_lock_contention(&key);
                    if attempt >= max_attempts {
                        return Err(PublisherError::ResourceBusy { key });
                    }
                    let backoff = base_ms.saturating_mul(1 << (attempt - 1).min(16));
                    let jitter = (backoff as f64 * 0.1 * rand::random::<f64>()) as u64;
                    sleep(Duration::from_millis(backoff + jitter)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn publish_execution(&self, task: &PublishTask) -> PublisherResult<()> {
        let message = Message::task_execution(TaskExecutionMessage {
            task_id: task.id,
            config_id: task.config_id,
            account_id: task.account_id.clone(),
            pipeline_id: task.pipeline_id.clone(),
            parameters: task.parameters.clone(),
            variant: task.variant.clone(),
            earliest_start_at: task.earliest_start_at,
            retry_count: task.retry_count,
        })
        .with_correlation(task.batch_id.to_string());
        self.queue.publish_message(&self.task_queue, &message).await
    }
}

fn fail_task(task: &mut PublishTask, reason: FailureReason, message: String) {
    task.status = TaskStatus::Failed;
    task.failure_reason = Some(reason);
    task.error_message = Some(message);
    task.finished_at = Some(Utc::now());
}
