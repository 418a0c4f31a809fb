//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，遵循依赖倒置原则

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entities::{
    AccountGroup, GroupMember, Pipeline, PublishConfig, PublishTask, ScheduleSlot, Strategy,
};
use publisher_core::PublisherResult;

/// 发布配置仓储抽象
///
/// # 说明
///
/// 除常规CRUD外，承载两类调度簿记：
/// - `record_fired` 推进触发水位 `last_fired_at`，错过补发判定依赖它
/// - `load_cursor`/`save_cursor` 持久化轮询游标，仅策略解析器调用
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn create(&self, config: &PublishConfig) -> PublisherResult<PublishConfig>;
    async fn find_by_id(&self, id: i64) -> PublisherResult<Option<PublishConfig>>;
    async fn find_all(&self) -> PublisherResult<Vec<PublishConfig>>;
    async fn find_active(&self) -> PublisherResult<Vec<PublishConfig>>;
    async fn update(&self, config: &PublishConfig) -> PublisherResult<PublishConfig>;
    async fn set_active(&self, id: i64, active: bool) -> PublisherResult<()>;
    async fn delete(&self, id: i64) -> PublisherResult<bool>;
    /// 记录一次成功触发，推进last_fired_at
    async fn record_fired(&self, id: i64, fired_at: DateTime<Utc>) -> PublisherResult<()>;
    /// 读取轮询游标，未初始化时返回0
    async fn load_cursor(&self, id: i64) -> PublisherResult<i64>;
    async fn save_cursor(&self, id: i64, cursor: i64) -> PublisherResult<()>;
}

/// 任务仓储抽象
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &PublishTask) -> PublisherResult<PublishTask>;
    async fn find_by_id(&self, id: Uuid) -> PublisherResult<Option<PublishTask>>;
    async fn update(&self, task: &PublishTask) -> PublisherResult<PublishTask>;
    async fn find_by_batch(&self, batch_id: Uuid) -> PublisherResult<Vec<PublishTask>>;
    async fn find_by_config(&self, config_id: i64) -> PublisherResult<Vec<PublishTask>>;
    /// 在途任务：PENDING 或 RUNNING
    async fn find_in_flight_by_config(&self, config_id: i64) -> PublisherResult<Vec<PublishTask>>;
    /// 过期扫描：RUNNING 且启动时间早于界限
    async fn find_running_started_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> PublisherResult<Vec<PublishTask>>;
    /// 策略分析：指定策略下已完成的任务
    async fn find_completed_by_strategy(
        &self,
        strategy_id: i64,
    ) -> PublisherResult<Vec<PublishTask>>;
    /// 批次时间窗口回退查找用
    async fn find_by_config_created_between(
        &self,
        config_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PublisherResult<Vec<PublishTask>>;
}

/// 排期槽位仓储抽象
#[async_trait]
pub trait SlotRepository: Send + Sync {
    async fn create_many(&self, slots: &[ScheduleSlot]) -> PublisherResult<Vec<ScheduleSlot>>;
    async fn find_by_config(&self, config_id: i64) -> PublisherResult<Vec<ScheduleSlot>>;
    async fn mark_consumed(&self, slot_id: i64, task_id: Uuid) -> PublisherResult<()>;
    async fn mark_skipped(&self, slot_id: i64) -> PublisherResult<()>;
}

/// 策略仓储抽象
#[async_trait]
pub trait StrategyRepository: Send + Sync {
    async fn create(&self, strategy: &Strategy) -> PublisherResult<Strategy>;
    async fn find_by_id(&self, id: i64) -> PublisherResult<Option<Strategy>>;
    async fn update(&self, strategy: &Strategy) -> PublisherResult<Strategy>;
}

/// 流水线注册表（外部系统维护，调度核心只读）
#[async_trait]
pub trait PipelineRegistry: Send + Sync {
    async fn get_pipeline(&self, pipeline_id: &str) -> PublisherResult<Pipeline>;
}

/// 账号组注册表（外部系统维护，调度核心只读）
#[async_trait]
pub trait AccountGroupRegistry: Send + Sync {
    async fn get_group(&self, group_id: i64) -> PublisherResult<AccountGroup>;
    async fn get_active_members(&self, group_id: i64) -> PublisherResult<Vec<GroupMember>>;
}
