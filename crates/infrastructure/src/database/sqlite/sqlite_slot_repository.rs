use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use publisher_core::{PublisherError, PublisherResult};
use publisher_domain::entities::ScheduleSlot;
use publisher_domain::repositories::SlotRepository;

use super::parse_uuid;

/// 排期槽位的SQLite仓储
///
/// 槽位只允许从 planned 单向流转到 consumed 或 skipped，
/// 对已流转槽位的二次标记按数据错误拒绝。
pub struct SqliteSlotRepository {
    pool: SqlitePool,
}

impl SqliteSlotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_slot(row: &SqliteRow) -> PublisherResult<ScheduleSlot> {
        let status_text: String = row.try_get("status")?;
        let task_id: Option<String> = row.try_get("task_id")?;

        Ok(ScheduleSlot {
            id: row.try_get("id")?,
            config_id: row.try_get("config_id")?,
            account_id: row.try_get("account_id")?,
            scheduled_at: row.try_get("scheduled_at")?,
            status: status_text
                .parse()
                .map_err(PublisherError::DatabaseOperation)?,
            task_id: task_id.as_deref().map(parse_uuid).transpose()?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl SlotRepository for SqliteSlotRepository {
    async fn create_many(&self, slots: &[ScheduleSlot]) -> PublisherResult<Vec<ScheduleSlot>> {
        if slots.is_empty() {
            return Ok(Vec::new());
        }

        // 整批落库，部分失败时回滚，避免残缺的节奏计划
        let mut tx = self.pool.begin().await.map_err(PublisherError::Database)?;
        let mut created = Vec::with_capacity(slots.len());

        for slot in slots {
            let row = sqlx::query(
                r#"
                INSERT INTO schedule_slots (
                    config_id, account_id, scheduled_at, status, task_id, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING *
                "#,
            )
            .bind(slot.config_id)
            .bind(&slot.account_id)
            .bind(slot.scheduled_at)
            .bind(slot.status.to_string())
            .bind(slot.task_id.map(|id| id.to_string()))
            .bind(slot.created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(PublisherError::Database)?;

            created.push(Self::row_to_slot(&row)?);
        }

        tx.commit().await.map_err(PublisherError::Database)?;
        debug!("批量创建排期槽位: {} 条", created.len());
        Ok(created)
    }

    async fn find_by_config(&self, config_id: i64) -> PublisherResult<Vec<ScheduleSlot>> {
        let rows = sqlx::query(
            "SELECT * FROM schedule_slots WHERE config_id = $1 ORDER BY scheduled_at, id",
        )
        .bind(config_id)
        .fetch_all(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        rows.iter().map(Self::row_to_slot).collect()
    }

    async fn mark_consumed(&self, slot_id: i64, task_id: Uuid) -> PublisherResult<()> {
        let result = sqlx::query(
            "UPDATE schedule_slots SET status = 'consumed', task_id = $1 WHERE id = $2 AND status = 'planned'",
        )
        .bind(task_id.to_string())
        .bind(slot_id)
        .execute(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        if result.rows_affected() == 0 {
            return Err(PublisherError::DatabaseOperation(format!(
                "排期槽位不存在或已流转: {slot_id}"
            )));
        }
        Ok(())
    }

    async fn mark_skipped(&self, slot_id: i64) -> PublisherResult<()> {
        let result = sqlx::query(
            "UPDATE schedule_slots SET status = 'skipped' WHERE id = $1 AND status = 'planned'",
        )
        .bind(slot_id)
        .execute(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        if result.rows_affected() == 0 {
            return Err(PublisherError::DatabaseOperation(format!(
                "排期槽位不存在或已流转: {slot_id}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::DatabaseManager;
    use chrono::{Duration, Utc};
    use publisher_domain::entities::SlotStatus;

    async fn repo() -> SqliteSlotRepository {
        let manager = DatabaseManager::in_memory().await.unwrap();
        SqliteSlotRepository::new(manager.pool().clone())
    }

    fn planned_slot(account: &str, offset_seconds: i64) -> ScheduleSlot {
        ScheduleSlot {
            id: 0,
            config_id: 1,
            account_id: account.to_string(),
            scheduled_at: Utc::now() + Duration::seconds(offset_seconds),
            status: SlotStatus::Planned,
            task_id: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_many_assigns_ids_in_order() {
        let repo = repo().await;
        let created = repo
            .create_many(&[
                planned_slot("acct_1", 0),
                planned_slot("acct_2", 300),
                planned_slot("acct_3", 600),
            ])
            .await
            .unwrap();

        assert_eq!(created.len(), 3);
        assert!(created.windows(2).all(|w| w[0].id < w[1].id));
        assert!(created.iter().all(|s| s.status == SlotStatus::Planned));

        assert!(repo.create_many(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_by_config_orders_by_time() {
        let repo = repo().await;
        repo.create_many(&[
            planned_slot("late", 600),
            planned_slot("early", 0),
            planned_slot("middle", 300),
        ])
        .await
        .unwrap();

        let slots = repo.find_by_config(1).await.unwrap();
        let accounts: Vec<&str> = slots.iter().map(|s| s.account_id.as_str()).collect();
        assert_eq!(accounts, vec!["early", "middle", "late"]);
    }

    #[tokio::test]
    async fn test_mark_consumed_is_single_shot() {
        let repo = repo().await;
        let created = repo
            .create_many(&[planned_slot("acct_1", 0)])
            .await
            .unwrap();
        let slot_id = created[0].id;
        let task_id = Uuid::new_v4();

        repo.mark_consumed(slot_id, task_id).await.unwrap();

        let slots = repo.find_by_config(1).await.unwrap();
        assert_eq!(slots[0].status, SlotStatus::Consumed);
        assert_eq!(slots[0].task_id, Some(task_id));

        // 已消费的槽位不允许二次流转
        assert!(repo.mark_consumed(slot_id, Uuid::new_v4()).await.is_err());
        assert!(repo.mark_skipped(slot_id).await.is_err());
    }

    #[tokio::test]
    async fn test_mark_skipped() {
        let repo = repo().await;
        let created = repo
            .create_many(&[planned_slot("acct_1", 0)])
            .await
            .unwrap();

        repo.mark_skipped(created[0].id).await.unwrap();
        let slots = repo.find_by_config(1).await.unwrap();
        assert_eq!(slots[0].status, SlotStatus::Skipped);
        assert!(slots[0].task_id.is_none());

        assert!(repo.mark_skipped(777).await.is_err());
    }
}
