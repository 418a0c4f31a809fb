use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use publisher_core::PublisherResult;

/// 派发队列消息信封
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub retry_count: i32,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageType {
    TaskExecution(TaskExecutionMessage),
    CancelTask(CancelTaskMessage),
}

/// 任务执行消息，外部执行端从任务队列消费
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionMessage {
    pub task_id: Uuid,
    pub config_id: i64,
    pub account_id: String,
    pub pipeline_id: String,
    pub parameters: Value,
    pub variant: Option<String>,
    /// 节奏计划要求的最早执行时间，执行端须等待到该时刻
    pub earliest_start_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
}

/// 任务取消通知，发布到控制队列
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelTaskMessage {
    pub task_id: Uuid,
    pub requester: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn task_execution(message: TaskExecutionMessage) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: MessageType::TaskExecution(message),
            timestamp: Utc::now(),
            retry_count: 0,
            correlation_id: None,
        }
    }

    pub fn cancel_task(message: CancelTaskMessage) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: MessageType::CancelTask(message),
            timestamp: Utc::now(),
            retry_count: 0,
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// 消息队列抽象接口
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish_message(&self, queue: &str, message: &Message) -> PublisherResult<()>;
    async fn consume_messages(&self, queue: &str) -> PublisherResult<Vec<Message>>;
    async fn ack_message(&self, message_id: &str) -> PublisherResult<()>;
    async fn nack_message(&self, message_id: &str, requeue: bool) -> PublisherResult<()>;
    async fn create_queue(&self, queue: &str, durable: bool) -> PublisherResult<()>;
    async fn get_queue_size(&self, queue: &str) -> PublisherResult<u32>;
    async fn purge_queue(&self, queue: &str) -> PublisherResult<()>;
}
