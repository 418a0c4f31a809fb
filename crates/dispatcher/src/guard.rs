use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use publisher_core::{PublisherError, PublisherResult};

/// 锁类型：宽隔离锁或内容去重锁
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Isolation,
    Dedup,
}

/// 持锁凭证，释放时传回
#[derive(Debug, Clone)]
pub struct LockHandle {
    pub key: String,
    pub owner: Uuid,
    pub kind: LockKind,
}

/// 在持锁快照中返回的单条锁记录
#[derive(Debug, Clone)]
pub struct HeldLock {
    pub key: String,
    pub owner: Uuid,
    pub kind: LockKind,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct LockEntry {
    owner: Uuid,
    acquired_at: DateTime<Utc>,
}

/// 并发守卫
///
/// 维护两张锁表：
/// - 隔离锁，键为 (账号, 流水线, 派发令牌)，令牌取任务ID，保证同账号同流水线的
///   并发任务不会共享资源路径
/// - 去重锁，键为 (流水线, 内容)，获取失败立即拒绝而不是排队，
///   用于"同一内容不允许并发在途"的场景
///
/// 锁在任务进入终态时释放；残留锁由恢复扫描按持有者在途状态回收
pub struct ConcurrencyGuard {
    locks: Arc<RwLock<HashMap<String, LockEntry>>>,
    dedup_locks: Arc<RwLock<HashMap<String, LockEntry>>>,
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(RwLock::new(HashMap::new())),
            dedup_locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 隔离键：账号、流水线加派发令牌三元组
    pub fn isolation_key(account_id: &str, pipeline_id: &str, token: Uuid) -> String {
        format!("{account_id}:{pipeline_id}:{token}")
    }

    /// 去重键：流水线加内容标识
    pub fn dedup_key(pipeline_id: &str, content_id: &str) -> String {
        format!("{pipeline_id}:{content_id}")
    }

    /// 获取隔离锁，已被占用时立即返回ResourceBusy
    pub async fn acquire(&self, key: &str, owner: Uuid) -> PublisherResult<LockHandle> {
        let mut locks = self.locks.write().await;
        if locks.contains_key(key) {
            return Err(PublisherError::ResourceBusy {
                key: key.to_string(),
            });
        }

        locks.insert(
            key.to_string(),
            LockEntry {
                owner,
                acquired_at: Utc::now(),
            },
        );
        debug!("获取隔离锁: {} (持有者 {})", key, owner);

        Ok(LockHandle {
            key: key.to_string(),
            owner,
            kind: LockKind::Isolation,
        })
    }

    /// 获取去重锁，已被占用时立即返回DuplicateInFlight
    pub async fn acquire_dedup(
        &self,
        pipeline_id: &str,
        content_id: &str,
        owner: Uuid,
    ) -> PublisherResult<LockHandle> {
        let key = Self::dedup_key(pipeline_id, content_id);
        let mut locks = self.dedup_locks.write().await;
        if locks.contains_key(&key) {
            return Err(PublisherError::DuplicateInFlight {
                pipeline_id: pipeline_id.to_string(),
                content_id: content_id.to_string(),
            });
        }

        locks.insert(
            key.clone(),
            LockEntry {
                owner,
                acquired_at: Utc::now(),
            },
        );
        debug!("获取去重锁: {} (持有者 {})", key, owner);

        Ok(LockHandle {
            key,
            owner,
            kind: LockKind::Dedup,
        })
    }

    /// 按凭证释放，持有者不匹配时保持不动
    pub async fn release(&self, handle: &LockHandle) {
        let table = match handle.kind {
            LockKind::Isolation => &self.locks,
            LockKind::Dedup => &self.dedup_locks,
        };
        let mut locks = table.write().await;
        if let Some(entry) = locks.get(&handle.key) {
            if entry.owner == handle.owner {
                locks.remove(&handle.key);
                debug!("释放锁: {}", handle.key);
            } else {
                warn!(
                    "释放锁 {} 时持有者不匹配: 期望 {}, 实际 {}",
                    handle.key, handle.owner, entry.owner
                );
            }
        }
    }

    /// 释放指定任务持有的全部隔离锁，返回释放数量
    pub async fn release_for_task(&self, task_id: Uuid) -> usize {
        let mut locks = self.locks.write().await;
        let before = locks.len();
        locks.retain(|_, entry| entry.owner != task_id);
        before - locks.len()
    }

    /// 释放指定持有者（批次）的全部去重锁，返回释放数量
    pub async fn release_for_owner(&self, owner: Uuid) -> usize {
        let mut locks = self.dedup_locks.write().await;
        let before = locks.len();
        locks.retain(|_, entry| entry.owner != owner);
        before - locks.len()
    }

    /// 当前持有的全部锁快照，恢复扫描用
    ///
    /// 快照不加长锁，调用方按持有者在途状态决定是否强制释放
    pub async fn held_locks(&self) -> Vec<HeldLock> {
        let mut snapshot = Vec::new();

        {
            let locks = self.locks.read().await;
            snapshot.extend(locks.iter().map(|(key, entry)| HeldLock {
                key: key.clone(),
                owner: entry.owner,
                kind: LockKind::Isolation,
                acquired_at: entry.acquired_at,
            }));
        }
        {
            let locks = self.dedup_locks.read().await;
            snapshot.extend(locks.iter().map(|(key, entry)| HeldLock {
                key: key.clone(),
                owner: entry.owner,
                kind: LockKind::Dedup,
                acquired_at: entry.acquired_at,
            }));
        }

        snapshot
    }

    pub async fn locks_held(&self) -> usize {
        self.locks.read().await.len()
    }

    pub async fn dedup_held(&self) -> usize {
        self.dedup_locks.read().await.len()
    }

    #[doc(hidden)]
    pub async fn is_held(&self, key: &str) -> bool {
        self.locks.read().await.contains_key(key)
    }
}

impl Default for ConcurrencyGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let guard = ConcurrencyGuard::new();
        let owner = Uuid::new_v4();
        let key = ConcurrencyGuard::isolation_key("acct_1", "video_publish", owner);

        let handle = guard.acquire(&key, owner).await.unwrap();
        assert_eq!(guard.locks_held().await, 1);

        let conflict = guard.acquire(&key, Uuid::new_v4()).await;
        assert!(matches!(
            conflict,
            Err(PublisherError::ResourceBusy { .. })
        ));

        guard.release(&handle).await;
        assert_eq!(guard.locks_held().await, 0);
        assert!(guard.acquire(&key, owner).await.is_ok());
    }

    #[tokio::test]
    async fn test_dedup_lock_fails_fast() {
        let guard = ConcurrencyGuard::new();
        let first_owner = Uuid::new_v4();

        guard
            .acquire_dedup("video_publish", "episode_42", first_owner)
            .await
            .unwrap();

        let rejected = guard
            .acquire_dedup("video_publish", "episode_42", Uuid::new_v4())
            .await;
        assert!(matches!(
            rejected,
            Err(PublisherError::DuplicateInFlight { .. })
        ));

        // 不同内容互不影响
        assert!(guard
            .acquire_dedup("video_publish", "episode_43", Uuid::new_v4())
            .await
            .is_ok());

        assert_eq!(guard.release_for_owner(first_owner).await, 1);
        assert!(guard
            .acquire_dedup("video_publish", "episode_42", Uuid::new_v4())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_release_for_task_only_touches_owner() {
        let guard = ConcurrencyGuard::new();
        let task_a = Uuid::new_v4();
        let task_b = Uuid::new_v4();

        let key_a = ConcurrencyGuard::isolation_key("acct_1", "video_publish", task_a);
        let key_b = ConcurrencyGuard::isolation_key("acct_2", "video_publish", task_b);
        guard.acquire(&key_a, task_a).await.unwrap();
        guard.acquire(&key_b, task_b).await.unwrap();

        assert_eq!(guard.release_for_task(task_a).await, 1);
        assert_eq!(guard.locks_held().await, 1);
        assert!(guard.is_held(&key_b).await);
    }

    #[tokio::test]
    async fn test_held_locks_snapshot_covers_both_tables() {
        let guard = ConcurrencyGuard::new();
        let task_id = Uuid::new_v4();
        let batch_id = Uuid::new_v4();
        let key = ConcurrencyGuard::isolation_key("acct_1", "video_publish", task_id);

        guard.acquire(&key, task_id).await.unwrap();
        guard
            .acquire_dedup("video_publish", "episode_42", batch_id)
            .await
            .unwrap();

        let snapshot = guard.held_locks().await;
        assert_eq!(snapshot.len(), 2);

        let isolation = snapshot
            .iter()
            .find(|lock| lock.kind == LockKind::Isolation)
            .unwrap();
        assert_eq!(isolation.key, key);
        assert_eq!(isolation.owner, task_id);
        assert!(isolation.acquired_at <= Utc::now());

        let dedup = snapshot
            .iter()
            .find(|lock| lock.kind == LockKind::Dedup)
            .unwrap();
        assert_eq!(dedup.owner, batch_id);
    }

    #[tokio::test]
    async fn test_release_requires_matching_owner() {
        let guard = ConcurrencyGuard::new();
        let owner = Uuid::new_v4();
        let key = ConcurrencyGuard::isolation_key("acct_1", "video_publish", owner);
        guard.acquire(&key, owner).await.unwrap();

        let forged = LockHandle {
            key: key.clone(),
            owner: Uuid::new_v4(),
            kind: LockKind::Isolation,
        };
        guard.release(&forged).await;
        assert!(guard.is_held(&key).await);
    }
}
