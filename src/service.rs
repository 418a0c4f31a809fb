use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use publisher_core::{PublisherError, PublisherResult};
use publisher_dispatcher::analyzer::StrategyReport;
use publisher_dispatcher::{
    BatchTracker, DispatchController, StrategyAnalyzer, TaskDispatcher, TaskRetryService,
    TaskStatusService, TriggerEngine,
};
use publisher_domain::entities::{
    BatchSummary, PerformanceMetrics, PublishConfig, PublishEvent, PublishTask, Strategy,
    TaskStatus,
};
use publisher_domain::repositories::{
    AccountGroupRegistry, ConfigRepository, PipelineRegistry, StrategyRepository, TaskRepository,
};

/// 对外服务门面
///
/// 管理界面、执行端等外部协作方只经过这一层访问调度核心。
/// 配置的生命周期校验（坏触发表达式、在途任务）都在这里拦截。
pub struct PublisherService {
    config_repo: Arc<dyn ConfigRepository>,
    task_repo: Arc<dyn TaskRepository>,
    strategy_repo: Arc<dyn StrategyRepository>,
    pipelines: Arc<dyn PipelineRegistry>,
    groups: Arc<dyn AccountGroupRegistry>,
    dispatcher: Arc<TaskDispatcher>,
    controller: Arc<DispatchController>,
    batches: BatchTracker,
    analyzer: StrategyAnalyzer,
    retries: TaskRetryService,
    status: TaskStatusService,
}

impl PublisherService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config_repo: Arc<dyn ConfigRepository>,
        task_repo: Arc<dyn TaskRepository>,
        strategy_repo: Arc<dyn StrategyRepository>,
        pipelines: Arc<dyn PipelineRegistry>,
        groups: Arc<dyn AccountGroupRegistry>,
        dispatcher: Arc<TaskDispatcher>,
        controller: Arc<DispatchController>,
        batches: BatchTracker,
        analyzer: StrategyAnalyzer,
        retries: TaskRetryService,
        status: TaskStatusService,
    ) -> Self {
        Self {
            config_repo,
            task_repo,
            strategy_repo,
            pipelines,
            groups,
            dispatcher,
            controller,
            batches,
            analyzer,
            retries,
            status,
        }
    }

    // ---- 配置管理 ----

    /// 创建发布配置
    ///
    /// 触发表达式的问题在保存时暴露，坏配置不会进入调度循环。
    /// 引用的流水线、账号组、策略必须已经存在。
    pub async fn create_config(&self, config: &PublishConfig) -> PublisherResult<PublishConfig> {
        TriggerEngine::validate_config(config)?;
        self.pipelines.get_pipeline(&config.pipeline_id).await?;
        self.groups.get_group(config.group_id).await?;
        if let Some(strategy_id) = config.strategy_id {
            self.strategy_repo
                .find_by_id(strategy_id)
                .await?
                .ok_or(PublisherError::StrategyNotFound { id: strategy_id })?;
        }

        let created = self.config_repo.create(config).await?;
        info!(
            "创建发布配置: {} (id={}, 触发={})",
            created.name,
            created.id,
            created.trigger.kind_name()
        );
        Ok(created)
    }

    pub async fn get_config(&self, config_id: i64) -> PublisherResult<PublishConfig> {
        self.config_repo
            .find_by_id(config_id)
            .await?
            .ok_or(PublisherError::ConfigNotFound { id: config_id })
    }

    pub async fn list_configs(&self) -> PublisherResult<Vec<PublishConfig>> {
        self.config_repo.find_all().await
    }

    pub async fn activate_config(&self, config_id: i64) -> PublisherResult<()> {
        self.get_config(config_id).await?;
        self.config_repo.set_active(config_id, true).await
    }

    /// 停用配置，仍有在途任务时拒绝
    pub async fn deactivate_config(&self, config_id: i64) -> PublisherResult<()> {
        self.get_config(config_id).await?;
        self.ensure_no_in_flight(config_id).await?;
        self.config_repo.set_active(config_id, false).await
    }

    /// 删除配置，仍有在途任务时拒绝
    pub async fn delete_config(&self, config_id: i64) -> PublisherResult<bool> {
        self.ensure_no_in_flight(config_id).await?;
        let deleted = self.config_repo.delete(config_id).await?;
        if deleted {
            info!("删除发布配置: {}", config_id);
        }
        Ok(deleted)
    }

    async fn ensure_no_in_flight(&self, config_id: i64) -> PublisherResult<()> {
        let in_flight = self.task_repo.find_in_flight_by_config(config_id).await?;
        if !in_flight.is_empty() {
            warn!(
                "配置 {} 仍有 {} 个在途任务, 拒绝变更",
                config_id,
                in_flight.len()
            );
            return Err(PublisherError::ConfigHasActiveTasks {
                id: config_id,
                count: in_flight.len(),
            });
        }
        Ok(())
    }

    // ---- 策略管理 ----

    pub async fn create_strategy(&self, strategy: &Strategy) -> PublisherResult<Strategy> {
        strategy.validate()?;
        let created = self.strategy_repo.create(strategy).await?;
        info!(
            "创建策略: {} (id={}, 类型={})",
            created.name,
            created.id,
            created.kind_name()
        );
        Ok(created)
    }

    pub async fn get_strategy(&self, strategy_id: i64) -> PublisherResult<Strategy> {
        self.strategy_repo
            .find_by_id(strategy_id)
            .await?
            .ok_or(PublisherError::StrategyNotFound { id: strategy_id })
    }

    // ---- 触发入口 ----

    /// 手动触发一次派发，返回批次汇总
    pub async fn manual_trigger(&self, config_id: i64) -> PublisherResult<BatchSummary> {
        self.dispatcher.manual_trigger(config_id, Utc::now()).await
    }

    /// 提交外部事件，派发所有命中的事件型配置
    pub async fn submit_event(&self, event: &PublishEvent) -> PublisherResult<Vec<BatchSummary>> {
        self.controller.submit_event(event).await
    }

    // ---- 批次与报告 ----

    pub async fn get_batch(&self, batch_id: Uuid) -> PublisherResult<BatchSummary> {
        self.batches.summarize(batch_id).await
    }

    /// 按配置与大致触发时间反查批次（没有批次标识时的兼容路径）
    pub async fn find_batch(
        &self,
        config_id: i64,
        approximate_time: DateTime<Utc>,
    ) -> PublisherResult<BatchSummary> {
        let batch_id = self.batches.find_batch(config_id, approximate_time).await?;
        self.batches.summarize(batch_id).await
    }

    pub async fn get_strategy_report(&self, strategy_id: i64) -> PublisherResult<StrategyReport> {
        self.analyzer.report(strategy_id).await
    }

    // ---- 任务生命周期 ----

    pub async fn get_task(&self, task_id: Uuid) -> PublisherResult<PublishTask> {
        self.task_repo
            .find_by_id(task_id)
            .await?
            .ok_or(PublisherError::TaskNotFound { id: task_id })
    }

    /// 执行端状态回报入口
    pub async fn report_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        metrics: Option<PerformanceMetrics>,
        error_message: Option<String>,
    ) -> PublisherResult<PublishTask> {
        self.status
            .report_task_status(task_id, status, metrics, error_message)
            .await
    }

    /// 取消一个在途任务
    pub async fn cancel(&self, task_id: Uuid, requester: &str) -> PublisherResult<PublishTask> {
        self.status.cancel(task_id, requester).await
    }

    /// 重试失败任务，永远返回新任务而不复活旧的
    pub async fn retry(&self, task_id: Uuid) -> PublisherResult<PublishTask> {
        self.retries.retry(task_id).await
    }
}
