use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use publisher_core::{PublisherError, PublisherResult, QueueConfig};
use publisher_domain::messaging::{Message, MessageQueue};

/// 内存消息队列实现
///
/// 使用 Tokio channels 实现的进程内队列，适用于单进程部署。
/// 任务队列与控制队列在构造时声明，其余队列按需创建。
/// 容量上限通过信号量实现背压：队列滞留达到容量后发布端等待，
/// 超时未等到消费即报错。
#[derive(Debug)]
pub struct InMemoryMessageQueue {
    /// 队列存储：队列名 -> 通道
    queues: Arc<RwLock<HashMap<String, QueueChannels>>>,
    capacity: usize,
    publish_timeout: Duration,
}

#[derive(Debug)]
struct QueueChannels {
    sender: mpsc::UnboundedSender<Message>,
    /// 接收端用互斥锁包装，支持多个消费者
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
    /// 队列滞留消息数
    size: Arc<AtomicU32>,
    /// 背压控制信号量，许可数等于容量
    backpressure: Arc<Semaphore>,
    _durable: bool,
}

impl QueueChannels {
    fn new(capacity: usize, durable: bool) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            size: Arc::new(AtomicU32::new(0)),
            backpressure: Arc::new(Semaphore::new(capacity)),
            _durable: durable,
        }
    }
}

impl InMemoryMessageQueue {
    /// 创建内存队列并预声明任务队列与控制队列
    pub fn new(settings: &QueueConfig) -> Self {
        info!(
            "创建内存消息队列: task={} control={} capacity={}",
            settings.task_queue, settings.control_queue, settings.capacity
        );

        let mut queues = HashMap::new();
        queues.insert(
            settings.task_queue.clone(),
            QueueChannels::new(settings.capacity, true),
        );
        queues.insert(
            settings.control_queue.clone(),
            QueueChannels::new(settings.capacity, true),
        );

        Self {
            queues: Arc::new(RwLock::new(queues)),
            capacity: settings.capacity,
            publish_timeout: Duration::from_secs(settings.publish_timeout_seconds),
        }
    }

    async fn get_or_create_queue(&self, queue_name: &str, durable: bool) -> PublisherResult<()> {
        let mut queues = self.queues.write().await;
        if !queues.contains_key(queue_name) {
            debug!("创建队列: {}", queue_name);
            queues.insert(
                queue_name.to_string(),
                QueueChannels::new(self.capacity, durable),
            );
        }
        Ok(())
    }

    async fn get_sender(&self, queue_name: &str) -> PublisherResult<mpsc::UnboundedSender<Message>> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|channels| channels.sender.clone())
            .ok_or_else(|| PublisherError::MessageQueue(format!("队列不存在: {queue_name}")))
    }

    async fn get_receiver(
        &self,
        queue_name: &str,
    ) -> PublisherResult<Arc<Mutex<mpsc::UnboundedReceiver<Message>>>> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|channels| channels.receiver.clone())
            .ok_or_else(|| PublisherError::MessageQueue(format!("队列不存在: {queue_name}")))
    }

    async fn get_backpressure(&self, queue_name: &str) -> PublisherResult<Arc<Semaphore>> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|channels| channels.backpressure.clone())
            .ok_or_else(|| PublisherError::MessageQueue(format!("队列不存在: {queue_name}")))
    }

    async fn get_size_counter(&self, queue_name: &str) -> Option<Arc<AtomicU32>> {
        self.queues
            .read()
            .await
            .get(queue_name)
            .map(|channels| channels.size.clone())
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> PublisherResult<()> {
        self.get_or_create_queue(queue, false).await?;

        // 背压控制：拿到许可才能入队，许可在消费侧归还
        let semaphore = self.get_backpressure(queue).await?;
        let permit = tokio::time::timeout(self.publish_timeout, semaphore.acquire())
            .await
            .map_err(|_| {
                warn!("队列 {} 背压等待超时，消息被拒绝", queue);
                PublisherError::MessageQueue(format!("队列背压等待超时: {queue}"))
            })?
            .map_err(|e| PublisherError::MessageQueue(format!("获取背压许可失败: {e}")))?;

        let sender = self.get_sender(queue).await?;
        sender.send(message.clone()).map_err(|e| {
            error!("向队列 {} 发送消息失败: {}", queue, e);
            PublisherError::MessageQueue(format!("发送消息失败: {e}"))
        })?;

        if let Some(size) = self.get_size_counter(queue).await {
            size.fetch_add(1, Ordering::Relaxed);
        }
        permit.forget();

        debug!("消息 {} 已发布到队列 {}", message.id, queue);
        Ok(())
    }

    async fn consume_messages(&self, queue: &str) -> PublisherResult<Vec<Message>> {
        self.get_or_create_queue(queue, false).await?;

        let receiver = self.get_receiver(queue).await?;
        let semaphore = self.get_backpressure(queue).await?;

        // 非阻塞地取走当前所有可用消息
        let mut messages = Vec::new();
        {
            let mut rx = receiver.lock().await;
            while let Ok(message) = rx.try_recv() {
                messages.push(message);
            }
        }

        if !messages.is_empty() {
            if let Some(size) = self.get_size_counter(queue).await {
                size.fetch_sub(messages.len() as u32, Ordering::Relaxed);
            }
            semaphore.add_permits(messages.len());
            debug!("从队列 {} 消费 {} 条消息", queue, messages.len());
        }

        Ok(messages)
    }

    async fn ack_message(&self, message_id: &str) -> PublisherResult<()> {
        // 内存队列消费即确认，仅记录日志
        debug!("确认消息: {}", message_id);
        Ok(())
    }

    async fn nack_message(&self, message_id: &str, requeue: bool) -> PublisherResult<()> {
        if requeue {
            warn!("消息 {} 请求重新入队，内存队列不支持，将被丢弃", message_id);
        } else {
            debug!("拒绝消息: {}", message_id);
        }
        Ok(())
    }

    async fn create_queue(&self, queue: &str, durable: bool) -> PublisherResult<()> {
        self.get_or_create_queue(queue, durable).await
    }

    async fn get_queue_size(&self, queue: &str) -> PublisherResult<u32> {
        let queues = self.queues.read().await;
        queues
            .get(queue)
            .map(|channels| channels.size.load(Ordering::Relaxed))
            .ok_or_else(|| PublisherError::MessageQueue(format!("队列不存在: {queue}")))
    }

    async fn purge_queue(&self, queue: &str) -> PublisherResult<()> {
        let receiver = self.get_receiver(queue).await?;
        let semaphore = self.get_backpressure(queue).await?;

        let mut purged = 0usize;
        {
            let mut rx = receiver.lock().await;
            while rx.try_recv().is_ok() {
                purged += 1;
            }
        }

        if let Some(size) = self.get_size_counter(queue).await {
            size.store(0, Ordering::Relaxed);
        }
        // 清空的消息占用的许可一并归还，否则容量会永久缩水
        semaphore.add_permits(purged);

        info!("清空队列 {}: 丢弃 {} 条消息", queue, purged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use publisher_domain::messaging::{CancelTaskMessage, TaskExecutionMessage};
    use uuid::Uuid;

    fn test_settings() -> QueueConfig {
        QueueConfig {
            task_queue: "publish_tasks".to_string(),
            control_queue: "publish_control".to_string(),
            capacity: 100,
            publish_timeout_seconds: 1,
        }
    }

    fn execution_message() -> Message {
        Message::task_execution(TaskExecutionMessage {
            task_id: Uuid::new_v4(),
            config_id: 1,
            account_id: "acct_1".to_string(),
            pipeline_id: "video_publish".to_string(),
            parameters: serde_json::json!({}),
            variant: None,
            earliest_start_at: None,
            retry_count: 0,
        })
    }

    #[tokio::test]
    async fn test_declared_queues_exist_from_start() {
        let queue = InMemoryMessageQueue::new(&test_settings());

        assert_eq!(queue.get_queue_size("publish_tasks").await.unwrap(), 0);
        assert_eq!(queue.get_queue_size("publish_control").await.unwrap(), 0);
        assert!(queue.get_queue_size("unknown").await.is_err());
    }

    #[tokio::test]
    async fn test_publish_and_consume_round_trip() {
        let queue = InMemoryMessageQueue::new(&test_settings());
        let message = execution_message();

        queue.publish_message("publish_tasks", &message).await.unwrap();
        assert_eq!(queue.get_queue_size("publish_tasks").await.unwrap(), 1);

        let consumed = queue.consume_messages("publish_tasks").await.unwrap();
        assert_eq!(consumed.len(), 1);
        assert_eq!(consumed[0].id, message.id);
        assert_eq!(queue.get_queue_size("publish_tasks").await.unwrap(), 0);

        // 再次消费返回空
        assert!(queue.consume_messages("publish_tasks").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queues_are_isolated() {
        let queue = InMemoryMessageQueue::new(&test_settings());

        queue
            .publish_message("publish_tasks", &execution_message())
            .await
            .unwrap();
        let cancel = Message::cancel_task(CancelTaskMessage {
            task_id: Uuid::new_v4(),
            requester: "operator".to_string(),
            timestamp: Utc::now(),
        });
        queue.publish_message("publish_control", &cancel).await.unwrap();

        assert_eq!(queue.get_queue_size("publish_tasks").await.unwrap(), 1);
        assert_eq!(queue.get_queue_size("publish_control").await.unwrap(), 1);

        let control_messages = queue.consume_messages("publish_control").await.unwrap();
        assert_eq!(control_messages.len(), 1);
        assert_eq!(control_messages[0].id, cancel.id);
        assert_eq!(queue.get_queue_size("publish_tasks").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_backpressure_rejects_when_full() {
        let settings = QueueConfig {
            capacity: 2,
            publish_timeout_seconds: 1,
            ..test_settings()
        };
        let queue = InMemoryMessageQueue::new(&settings);

        queue
            .publish_message("publish_tasks", &execution_message())
            .await
            .unwrap();
        queue
            .publish_message("publish_tasks", &execution_message())
            .await
            .unwrap();

        let rejected = queue
            .publish_message("publish_tasks", &execution_message())
            .await;
        assert!(matches!(rejected, Err(PublisherError::MessageQueue(_))));

        // 消费释放容量后恢复可发布
        queue.consume_messages("publish_tasks").await.unwrap();
        queue
            .publish_message("publish_tasks", &execution_message())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_purge_restores_capacity() {
        let settings = QueueConfig {
            capacity: 2,
            publish_timeout_seconds: 1,
            ..test_settings()
        };
        let queue = InMemoryMessageQueue::new(&settings);

        for _ in 0..2 {
            queue
                .publish_message("publish_tasks", &execution_message())
                .await
                .unwrap();
        }
        queue.purge_queue("publish_tasks").await.unwrap();
        assert_eq!(queue.get_queue_size("publish_tasks").await.unwrap(), 0);

        // 被清空的消息不再占用容量
        for _ in 0..2 {
            queue
                .publish_message("publish_tasks", &execution_message())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_ad_hoc_queue_created_on_publish() {
        let queue = InMemoryMessageQueue::new(&test_settings());

        queue
            .publish_message("replay_queue", &execution_message())
            .await
            .unwrap();
        assert_eq!(queue.get_queue_size("replay_queue").await.unwrap(), 1);
    }
}
