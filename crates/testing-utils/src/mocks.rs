//! Mock implementations for all repository and service traits
//!
//! This module provides in-memory mock implementations that can be used
//! for unit testing without requiring actual database connections or
//! external services.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use publisher_core::{PublisherError, PublisherResult};
use publisher_domain::entities::{
    AccountGroup, GroupMember, Pipeline, PublishConfig, PublishTask, ScheduleSlot, SlotStatus,
    Strategy, TaskStatus,
};
use publisher_domain::messaging::{Message, MessageQueue};
use publisher_domain::repositories::{
    AccountGroupRegistry, ConfigRepository, PipelineRegistry, SlotRepository, StrategyRepository,
    TaskRepository,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Mock implementation of ConfigRepository for testing
#[derive(Debug, Clone)]
pub struct MockConfigRepository {
    configs: Arc<Mutex<HashMap<i64, PublishConfig>>>,
    cursors: Arc<Mutex<HashMap<i64, i64>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockConfigRepository {
    pub fn new() -> Self {
        Self {
            configs: Arc::new(Mutex::new(HashMap::new())),
            cursors: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn with_configs(configs: Vec<PublishConfig>) -> Self {
        let mut config_map = HashMap::new();
        let mut max_id = 0;

        for config in configs {
            if config.id > max_id {
                max_id = config.id;
            }
            config_map.insert(config.id, config);
        }

        Self {
            configs: Arc::new(Mutex::new(config_map)),
            cursors: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(max_id + 1)),
        }
    }

    pub fn count(&self) -> usize {
        self.configs.lock().unwrap().len()
    }
}

impl Default for MockConfigRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigRepository for MockConfigRepository {
    async fn create(&self, config: &PublishConfig) -> PublisherResult<PublishConfig> {
        let mut configs = self.configs.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut new_config = config.clone();
        new_config.id = *next_id;
        *next_id += 1;

        configs.insert(new_config.id, new_config.clone());
        Ok(new_config)
    }

    async fn find_by_id(&self, id: i64) -> PublisherResult<Option<PublishConfig>> {
        let configs = self.configs.lock().unwrap();
        Ok(configs.get(&id).cloned())
    }

    async fn find_all(&self) -> PublisherResult<Vec<PublishConfig>> {
        let configs = self.configs.lock().unwrap();
        let mut all: Vec<PublishConfig> = configs.values().cloned().collect();
        all.sort_by_key(|c| c.id);
        Ok(all)
    }

    async fn find_active(&self) -> PublisherResult<Vec<PublishConfig>> {
        let configs = self.configs.lock().unwrap();
        let mut active: Vec<PublishConfig> =
            configs.values().filter(|c| c.active).cloned().collect();
        active.sort_by_key(|c| c.id);
        Ok(active)
    }

    async fn update(&self, config: &PublishConfig) -> PublisherResult<PublishConfig> {
        let mut configs = self.configs.lock().unwrap();
        if !configs.contains_key(&config.id) {
            return Err(PublisherError::ConfigNotFound { id: config.id });
        }
        configs.insert(config.id, config.clone());
        Ok(config.clone())
    }

    async fn set_active(&self, id: i64, active: bool) -> PublisherResult<()> {
        let mut configs = self.configs.lock().unwrap();
        let config = configs
            .get_mut(&id)
            .ok_or(PublisherError::ConfigNotFound { id })?;
        config.active = active;
        config.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: i64) -> PublisherResult<bool> {
        let mut configs = self.configs.lock().unwrap();
        Ok(configs.remove(&id).is_some())
    }

    async fn record_fired(&self, id: i64, fired_at: DateTime<Utc>) -> PublisherResult<()> {
        let mut configs = self.configs.lock().unwrap();
        let config = configs
            .get_mut(&id)
            .ok_or(PublisherError::ConfigNotFound { id })?;
        config.last_fired_at = Some(fired_at);
        config.updated_at = Utc::now();
        Ok(())
    }

    async fn load_cursor(&self, id: i64) -> PublisherResult<i64> {
        let cursors = self.cursors.lock().unwrap();
        Ok(cursors.get(&id).copied().unwrap_or(0))
    }

    async fn save_cursor(&self, id: i64, cursor: i64) -> PublisherResult<()> {
        let mut cursors = self.cursors.lock().unwrap();
        cursors.insert(id, cursor);
        Ok(())
    }
}

/// Mock implementation of TaskRepository for testing
#[derive(Debug, Clone)]
pub struct MockTaskRepository {
    tasks: Arc<Mutex<HashMap<Uuid, PublishTask>>>,
}

impl MockTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_tasks(tasks: Vec<PublishTask>) -> Self {
        let task_map = tasks.into_iter().map(|t| (t.id, t)).collect();
        Self {
            tasks: Arc::new(Mutex::new(task_map)),
        }
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn get_all_tasks(&self) -> Vec<PublishTask> {
        let tasks = self.tasks.lock().unwrap();
        let mut all: Vec<PublishTask> = tasks.values().cloned().collect();
        all.sort_by_key(|t| (t.created_at, t.id));
        all
    }
}

impl Default for MockTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for MockTaskRepository {
    async fn create(&self, task: &PublishTask) -> PublisherResult<PublishTask> {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.insert(task.id, task.clone());
        Ok(task.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> PublisherResult<Option<PublishTask>> {
        let tasks = self.tasks.lock().unwrap();
        Ok(tasks.get(&id).cloned())
    }

    async fn update(&self, task: &PublishTask) -> PublisherResult<PublishTask> {
        let mut tasks = self.tasks.lock().unwrap();
        if !tasks.contains_key(&task.id) {
            return Err(PublisherError::TaskNotFound { id: task.id });
        }
        tasks.insert(task.id, task.clone());
        Ok(task.clone())
    }

    async fn find_by_batch(&self, batch_id: Uuid) -> PublisherResult<Vec<PublishTask>> {
        let tasks = self.tasks.lock().unwrap();
        let mut matched: Vec<PublishTask> = tasks
            .values()
            .filter(|t| t.batch_id == batch_id)
            .cloned()
            .collect();
        matched.sort_by_key(|t| (t.created_at, t.id));
        Ok(matched)
    }

    async fn find_by_config(&self, config_id: i64) -> PublisherResult<Vec<PublishTask>> {
        let tasks = self.tasks.lock().unwrap();
        let mut matched: Vec<PublishTask> = tasks
            .values()
            .filter(|t| t.config_id == config_id)
            .cloned()
            .collect();
        matched.sort_by_key(|t| (t.created_at, t.id));
        Ok(matched)
    }

    async fn find_in_flight_by_config(&self, config_id: i64) -> PublisherResult<Vec<PublishTask>> {
        let tasks = self.tasks.lock().unwrap();
        let mut matched: Vec<PublishTask> = tasks
            .values()
            .filter(|t| t.config_id == config_id && t.is_in_flight())
            .cloned()
            .collect();
        matched.sort_by_key(|t| (t.created_at, t.id));
        Ok(matched)
    }

    async fn find_running_started_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> PublisherResult<Vec<PublishTask>> {
        let tasks = self.tasks.lock().unwrap();
        let mut matched: Vec<PublishTask> = tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Running
                    && t.started_at.map(|s| s < deadline).unwrap_or(false)
            })
            .cloned()
            .collect();
        matched.sort_by_key(|t| (t.created_at, t.id));
        Ok(matched)
    }

    async fn find_completed_by_strategy(
        &self,
        strategy_id: i64,
    ) -> PublisherResult<Vec<PublishTask>> {
        let tasks = self.tasks.lock().unwrap();
        let mut matched: Vec<PublishTask> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Completed && t.strategy_id == Some(strategy_id))
            .cloned()
            .collect();
        matched.sort_by_key(|t| (t.created_at, t.id));
        Ok(matched)
    }

    async fn find_by_config_created_between(
        &self,
        config_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PublisherResult<Vec<PublishTask>> {
        let tasks = self.tasks.lock().unwrap();
        let mut matched: Vec<PublishTask> = tasks
            .values()
            .filter(|t| t.config_id == config_id && t.created_at >= from && t.created_at <= to)
            .cloned()
            .collect();
        matched.sort_by_key(|t| (t.created_at, t.id));
        Ok(matched)
    }
}

/// Mock implementation of SlotRepository for testing
#[derive(Debug, Clone)]
pub struct MockSlotRepository {
    slots: Arc<Mutex<HashMap<i64, ScheduleSlot>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockSlotRepository {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn count(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn get_all_slots(&self) -> Vec<ScheduleSlot> {
        let slots = self.slots.lock().unwrap();
        let mut all: Vec<ScheduleSlot> = slots.values().cloned().collect();
        all.sort_by_key(|s| s.id);
        all
    }
}

impl Default for MockSlotRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SlotRepository for MockSlotRepository {
    async fn create_many(&self, slots: &[ScheduleSlot]) -> PublisherResult<Vec<ScheduleSlot>> {
        let mut stored = self.slots.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();
        let mut created = Vec::with_capacity(slots.len());

        for slot in slots {
            let mut new_slot = slot.clone();
            new_slot.id = *next_id;
            *next_id += 1;
            stored.insert(new_slot.id, new_slot.clone());
            created.push(new_slot);
        }

        Ok(created)
    }

    async fn find_by_config(&self, config_id: i64) -> PublisherResult<Vec<ScheduleSlot>> {
        let slots = self.slots.lock().unwrap();
        let mut matched: Vec<ScheduleSlot> = slots
            .values()
            .filter(|s| s.config_id == config_id)
            .cloned()
            .collect();
        matched.sort_by_key(|s| s.id);
        Ok(matched)
    }

    async fn mark_consumed(&self, slot_id: i64, task_id: Uuid) -> PublisherResult<()> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.get_mut(&slot_id).ok_or_else(|| {
            PublisherError::DatabaseOperation(format!("槽位不存在: {slot_id}"))
        })?;
        slot.status = SlotStatus::Consumed;
        slot.task_id = Some(task_id);
        Ok(())
    }

    async fn mark_skipped(&self, slot_id: i64) -> PublisherResult<()> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.get_mut(&slot_id).ok_or_else(|| {
            PublisherError::DatabaseOperation(format!("槽位不存在: {slot_id}"))
        })?;
        slot.status = SlotStatus::Skipped;
        Ok(())
    }
}

/// Mock implementation of StrategyRepository for testing
#[derive(Debug, Clone)]
pub struct MockStrategyRepository {
    strategies: Arc<Mutex<HashMap<i64, Strategy>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockStrategyRepository {
    pub fn new() -> Self {
        Self {
            strategies: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn with_strategies(strategies: Vec<Strategy>) -> Self {
        let mut strategy_map = HashMap::new();
        let mut max_id = 0;

        for strategy in strategies {
            if strategy.id > max_id {
                max_id = strategy.id;
            }
            strategy_map.insert(strategy.id, strategy);
        }

        Self {
            strategies: Arc::new(Mutex::new(strategy_map)),
            next_id: Arc::new(Mutex::new(max_id + 1)),
        }
    }
}

impl Default for MockStrategyRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StrategyRepository for MockStrategyRepository {
    async fn create(&self, strategy: &Strategy) -> PublisherResult<Strategy> {
        let mut strategies = self.strategies.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut new_strategy = strategy.clone();
        new_strategy.id = *next_id;
        *next_id += 1;

        strategies.insert(new_strategy.id, new_strategy.clone());
        Ok(new_strategy)
    }

    async fn find_by_id(&self, id: i64) -> PublisherResult<Option<Strategy>> {
        let strategies = self.strategies.lock().unwrap();
        Ok(strategies.get(&id).cloned())
    }

    async fn update(&self, strategy: &Strategy) -> PublisherResult<Strategy> {
        let mut strategies = self.strategies.lock().unwrap();
        if !strategies.contains_key(&strategy.id) {
            return Err(PublisherError::StrategyNotFound { id: strategy.id });
        }
        strategies.insert(strategy.id, strategy.clone());
        Ok(strategy.clone())
    }
}

/// Mock implementation of PipelineRegistry for testing
#[derive(Debug, Clone)]
pub struct MockPipelineRegistry {
    pipelines: Arc<Mutex<HashMap<String, Pipeline>>>,
}

impl MockPipelineRegistry {
    pub fn new() -> Self {
        Self {
            pipelines: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_pipelines(pipelines: Vec<Pipeline>) -> Self {
        let pipeline_map = pipelines.into_iter().map(|p| (p.id.clone(), p)).collect();
        Self {
            pipelines: Arc::new(Mutex::new(pipeline_map)),
        }
    }

    pub fn add_pipeline(&self, pipeline: Pipeline) {
        self.pipelines
            .lock()
            .unwrap()
            .insert(pipeline.id.clone(), pipeline);
    }
}

impl Default for MockPipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PipelineRegistry for MockPipelineRegistry {
    async fn get_pipeline(&self, pipeline_id: &str) -> PublisherResult<Pipeline> {
        let pipelines = self.pipelines.lock().unwrap();
        pipelines
            .get(pipeline_id)
            .cloned()
            .ok_or_else(|| PublisherError::PipelineNotFound {
                id: pipeline_id.to_string(),
            })
    }
}

/// Mock implementation of AccountGroupRegistry for testing
#[derive(Debug, Clone)]
pub struct MockAccountGroupRegistry {
    groups: Arc<Mutex<HashMap<i64, AccountGroup>>>,
}

impl MockAccountGroupRegistry {
    pub fn new() -> Self {
        Self {
            groups: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_groups(groups: Vec<AccountGroup>) -> Self {
        let group_map = groups.into_iter().map(|g| (g.id, g)).collect();
        Self {
            groups: Arc::new(Mutex::new(group_map)),
        }
    }

    pub fn add_group(&self, group: AccountGroup) {
        self.groups.lock().unwrap().insert(group.id, group);
    }
}

impl Default for MockAccountGroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountGroupRegistry for MockAccountGroupRegistry {
    async fn get_group(&self, group_id: i64) -> PublisherResult<AccountGroup> {
        let groups = self.groups.lock().unwrap();
        groups
            .get(&group_id)
            .cloned()
            .ok_or(PublisherError::AccountGroupNotFound { id: group_id })
    }

    async fn get_active_members(&self, group_id: i64) -> PublisherResult<Vec<GroupMember>> {
        let groups = self.groups.lock().unwrap();
        let group = groups
            .get(&group_id)
            .ok_or(PublisherError::AccountGroupNotFound { id: group_id })?;
        Ok(group.active_members())
    }
}

/// Mock implementation of MessageQueue for testing
///
/// Messages published to a queue stay buffered until consumed. Publish
/// failures can be injected with `set_fail_publish` for error path tests.
#[derive(Debug, Clone)]
pub struct MockMessageQueue {
    queues: Arc<Mutex<HashMap<String, Vec<Message>>>>,
    fail_publish: Arc<AtomicBool>,
}

impl MockMessageQueue {
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            fail_publish: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn published_count(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub fn published_messages(&self, queue: &str) -> Vec<Message> {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for MockMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for MockMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> PublisherResult<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(PublisherError::MessageQueue(
                "injected publish failure".to_string(),
            ));
        }
        let mut queues = self.queues.lock().unwrap();
        queues
            .entry(queue.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn consume_messages(&self, queue: &str) -> PublisherResult<Vec<Message>> {
        let mut queues = self.queues.lock().unwrap();
        Ok(queues.get_mut(queue).map(std::mem::take).unwrap_or_default())
    }

    async fn ack_message(&self, _message_id: &str) -> PublisherResult<()> {
        Ok(())
    }

    async fn nack_message(&self, _message_id: &str, _requeue: bool) -> PublisherResult<()> {
        Ok(())
    }

    async fn create_queue(&self, queue: &str, _durable: bool) -> PublisherResult<()> {
        let mut queues = self.queues.lock().unwrap();
        queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> PublisherResult<u32> {
        let queues = self.queues.lock().unwrap();
        Ok(queues.get(queue).map(|m| m.len() as u32).unwrap_or(0))
    }

    async fn purge_queue(&self, queue: &str) -> PublisherResult<()> {
        let mut queues = self.queues.lock().unwrap();
        if let Some(messages) = queues.get_mut(queue) {
            messages.clear();
        }
        Ok(())
    }
}
