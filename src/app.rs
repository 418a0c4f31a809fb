use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{error, info, warn};

use publisher_core::AppConfig;
use publisher_dispatcher::{
    BatchTracker, ConcurrencyGuard, DispatchController, DispatchMetrics, StrategyAnalyzer,
    StrategyResolver, SystemRecoveryService, TaskDispatcher, TaskRetryService, TaskStatusService,
};
use publisher_infrastructure::{
    DatabaseManager, InMemoryMessageQueue, SqliteAccountGroupRegistry, SqliteConfigRepository,
    SqlitePipelineRegistry, SqliteSlotRepository, SqliteStrategyRepository, SqliteTaskRepository,
};

use crate::service::PublisherService;

/// 嵌入式发布调度应用
///
/// 单进程装配：SQLite存储 + 内存派发队列。所有组件通过这里
/// 接线，宿主只跟 [`PublisherService`] 门面打交道。
pub struct PublisherApp {
    config: AppConfig,
    database: DatabaseManager,
    queue: Arc<InMemoryMessageQueue>,
    pipelines: Arc<SqlitePipelineRegistry>,
    groups: Arc<SqliteAccountGroupRegistry>,
    controller: Arc<DispatchController>,
    recovery: Arc<SystemRecoveryService>,
    service: Arc<PublisherService>,
}

impl PublisherApp {
    /// 按配置建库并装配全部组件
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化发布调度应用");
        let database = DatabaseManager::new(&config.database)
            .await
            .context("初始化数据库失败")?;
        Self::assemble(config, database)
    }

    /// 单连接内存库装配，供测试与演练使用
    pub async fn in_memory(config: AppConfig) -> Result<Self> {
        let database = DatabaseManager::in_memory()
            .await
            .context("初始化内存数据库失败")?;
        Self::assemble(config, database)
    }

    fn assemble(config: AppConfig, database: DatabaseManager) -> Result<Self> {
        let pool = database.pool().clone();

        let config_repo = Arc::new(SqliteConfigRepository::new(pool.clone()));
        let task_repo = Arc::new(SqliteTaskRepository::new(pool.clone()));
        let slot_repo = Arc::new(SqliteSlotRepository::new(pool.clone()));
        let strategy_repo = Arc::new(SqliteStrategyRepository::new(pool.clone()));
        let pipelines = Arc::new(SqlitePipelineRegistry::new(pool.clone()));
        let groups = Arc::new(SqliteAccountGroupRegistry::new(pool));

        let queue = Arc::new(InMemoryMessageQueue::new(&config.queue));
        let guard = Arc::new(ConcurrencyGuard::new());
        let metrics =
            Arc::new(DispatchMetrics::new().context("初始化指标采集失败")?);

        let resolver = Arc::new(StrategyResolver::new(
            config_repo.clone(),
            strategy_repo.clone(),
            groups.clone(),
        ));

        let dispatcher = Arc::new(TaskDispatcher::new(
            config_repo.clone(),
            task_repo.clone(),
            slot_repo,
            pipelines.clone(),
            resolver,
            guard.clone(),
            queue.clone(),
            metrics.clone(),
            config.dispatcher.clone(),
            &config.queue,
        ));

        let controller = Arc::new(DispatchController::new(
            config_repo.clone(),
            dispatcher.clone(),
            &config.dispatcher,
        ));

        let recovery = Arc::new(SystemRecoveryService::new(
            config_repo.clone(),
            task_repo.clone(),
            guard.clone(),
            queue.clone(),
            metrics.clone(),
            &config.dispatcher,
            &config.queue,
        ));

        let batches = BatchTracker::new(
            task_repo.clone(),
            config.dispatcher.batch_tolerance_minutes,
        );
        let analyzer =
            StrategyAnalyzer::new(task_repo.clone(), strategy_repo.clone());
        let retries =
            TaskRetryService::new(task_repo.clone(), dispatcher.clone(), None);
        let status = TaskStatusService::new(
            task_repo.clone(),
            guard,
            queue.clone(),
            metrics,
            &config.queue,
        );

        let service = Arc::new(PublisherService::new(
            config_repo,
            task_repo,
            strategy_repo,
            pipelines.clone(),
            groups.clone(),
            dispatcher,
            controller.clone(),
            batches,
            analyzer,
            retries,
            status,
        ));

        Ok(Self {
            config,
            database,
            queue,
            pipelines,
            groups,
            controller,
            recovery,
            service,
        })
    }

    /// 对外服务门面
    pub fn service(&self) -> Arc<PublisherService> {
        self.service.clone()
    }

    /// 派发队列句柄，执行端宿主从这里消费执行消息
    pub fn queue(&self) -> Arc<InMemoryMessageQueue> {
        self.queue.clone()
    }

    /// 流水线注册表（种子数据入口，运行期只读）
    pub fn pipeline_registry(&self) -> Arc<SqlitePipelineRegistry> {
        self.pipelines.clone()
    }

    /// 账号组注册表（种子数据入口，运行期只读）
    pub fn group_registry(&self) -> Arc<SqliteAccountGroupRegistry> {
        self.groups.clone()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 执行一轮触发扫描，返回本轮派发的批次数
    pub async fn tick(&self) -> Result<usize> {
        let summaries = self.controller.scan_and_dispatch().await?;
        Ok(summaries.len())
    }

    /// 执行一轮状态对账（过期锁清理 + 错过场次盘点）
    pub async fn recover(&self) -> Result<()> {
        let report = self.recovery.recover_system_state().await?;
        if !report.stale_tasks.is_empty() || report.pending_fires > 0 {
            info!(
                "状态对账: 过期任务={}, 残留锁={}, 待补发场次={}",
                report.stale_tasks.len(),
                report.orphaned_locks_released,
                report.pending_fires
            );
        }
        Ok(())
    }

    /// 主循环：触发扫描 + 周期对账，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        if !self.config.dispatcher.enabled {
            warn!("调度器在配置中被禁用, 主循环仅等待关闭信号");
            let _ = shutdown_rx.recv().await;
            return Ok(());
        }

        // 启动先对账一次，崩溃遗留的锁和错过的场次在首轮扫描前清理
        if let Err(e) = self.recover().await {
            error!("启动对账失败: {e}");
        }

        let mut tick = interval(Duration::from_secs(
            self.config.dispatcher.tick_interval_seconds,
        ));
        let mut recovery_tick = interval(Duration::from_secs(
            self.config.dispatcher.recovery_interval_seconds,
        ));
        // 两个interval的首次完成都是立即的，先消费掉避免启动双扫
        tick.tick().await;
        recovery_tick.tick().await;

        info!(
            "调度主循环启动: 扫描间隔={}s, 对账间隔={}s",
            self.config.dispatcher.tick_interval_seconds,
            self.config.dispatcher.recovery_interval_seconds
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("触发扫描失败: {e}");
                    }
                }
                _ = recovery_tick.tick() => {
                    if let Err(e) = self.recover().await {
                        error!("周期对账失败: {e}");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号, 调度主循环退出");
                    break;
                }
            }
        }

        Ok(())
    }

    /// 关闭数据库连接池
    pub async fn close(&self) {
        self.database.close().await;
    }
}
