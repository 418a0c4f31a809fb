use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use publisher_core::{PublisherError, PublisherResult};
use publisher_domain::entities::PublishTask;
use publisher_domain::repositories::TaskRepository;

use super::parse_uuid;

/// 发布任务的SQLite仓储
///
/// 任务ID与批次ID以UUID文本存储，状态与失败原因以枚举文本存储，
/// 表现指标与参数以JSON文本存储。
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> PublisherResult<PublishTask> {
        let id: String = row.try_get("id")?;
        let batch_id: String = row.try_get("batch_id")?;
        let status_text: String = row.try_get("status")?;
        let failure_text: Option<String> = row.try_get("failure_reason")?;
        let parameters_text: String = row.try_get("parameters")?;
        let metrics_text: Option<String> = row.try_get("metrics")?;

        Ok(PublishTask {
            id: parse_uuid(&id)?,
            config_id: row.try_get("config_id")?,
            group_id: row.try_get("group_id")?,
            account_id: row.try_get("account_id")?,
            pipeline_id: row.try_get("pipeline_id")?,
            strategy_id: row.try_get("strategy_id")?,
            parameters: serde_json::from_str(&parameters_text)?,
            variant: row.try_get("variant")?,
            status: status_text
                .parse()
                .map_err(PublisherError::DatabaseOperation)?,
            failure_reason: failure_text
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(PublisherError::DatabaseOperation)?,
            error_message: row.try_get("error_message")?,
            retry_count: row.try_get("retry_count")?,
            isolation_key: row.try_get("isolation_key")?,
            batch_id: parse_uuid(&batch_id)?,
            slot_id: row.try_get("slot_id")?,
            earliest_start_at: row.try_get("earliest_start_at")?,
            metrics: metrics_text
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn collect(rows: &[SqliteRow]) -> PublisherResult<Vec<PublishTask>> {
        rows.iter().map(Self::row_to_task).collect()
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: &PublishTask) -> PublisherResult<PublishTask> {
        let parameters_text = serde_json::to_string(&task.parameters)?;
        let metrics_text = task
            .metrics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let row = sqlx::query(
            r#"
            INSERT INTO publish_tasks (
                id, config_id, group_id, account_id, pipeline_id, strategy_id,
                parameters, variant, status, failure_reason, error_message,
                retry_count, isolation_key, batch_id, slot_id, earliest_start_at,
                metrics, created_at, started_at, finished_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20
            )
            RETURNING *
            "#,
        )
        .bind(task.id.to_string())
        .bind(task.config_id)
        .bind(task.group_id)
        .bind(&task.account_id)
        .bind(&task.pipeline_id)
        .bind(task.strategy_id)
        .bind(&parameters_text)
        .bind(&task.variant)
        .bind(task.status.to_string())
        .bind(task.failure_reason.map(|r| r.to_string()))
        .bind(&task.error_message)
        .bind(task.retry_count)
        .bind(&task.isolation_key)
        .bind(task.batch_id.to_string())
        .bind(task.slot_id)
        .bind(task.earliest_start_at)
        .bind(&metrics_text)
        .bind(task.created_at)
        .bind(task.started_at)
        .bind(task.finished_at)
        .fetch_one(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        let created = Self::row_to_task(&row)?;
        debug!(
            "创建发布任务: id={} account={} batch={}",
            created.id, created.account_id, created.batch_id
        );
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> PublisherResult<Option<PublishTask>> {
        let row = sqlx::query("SELECT * FROM publish_tasks WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(PublisherError::Database)?;

        row.map(|r| Self::row_to_task(&r)).transpose()
    }

    async fn update(&self, task: &PublishTask) -> PublisherResult<PublishTask> {
        let parameters_text = serde_json::to_string(&task.parameters)?;
        let metrics_text = task
            .metrics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE publish_tasks SET
                parameters = $1, variant = $2, status = $3, failure_reason = $4,
                error_message = $5, retry_count = $6, slot_id = $7,
                earliest_start_at = $8, metrics = $9, started_at = $10, finished_at = $11
            WHERE id = $12
            "#,
        )
        .bind(&parameters_text)
        .bind(&task.variant)
        .bind(task.status.to_string())
        .bind(task.failure_reason.map(|r| r.to_string()))
        .bind(&task.error_message)
        .bind(task.retry_count)
        .bind(task.slot_id)
        .bind(task.earliest_start_at)
        .bind(&metrics_text)
        .bind(task.started_at)
        .bind(task.finished_at)
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        if result.rows_affected() == 0 {
            return Err(PublisherError::TaskNotFound { id: task.id });
        }

        debug!("更新发布任务: id={} status={}", task.id, task.status);
        self.find_by_id(task.id)
            .await?
            .ok_or(PublisherError::TaskNotFound { id: task.id })
    }

    async fn find_by_batch(&self, batch_id: Uuid) -> PublisherResult<Vec<PublishTask>> {
        let rows =
            sqlx::query("SELECT * FROM publish_tasks WHERE batch_id = $1 ORDER BY created_at, id")
                .bind(batch_id.to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(PublisherError::Database)?;

        Self::collect(&rows)
    }

    async fn find_by_config(&self, config_id: i64) -> PublisherResult<Vec<PublishTask>> {
        let rows = sqlx::query(
            "SELECT * FROM publish_tasks WHERE config_id = $1 ORDER BY created_at DESC, id",
        )
        .bind(config_id)
        .fetch_all(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        Self::collect(&rows)
    }

    async fn find_in_flight_by_config(&self, config_id: i64) -> PublisherResult<Vec<PublishTask>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM publish_tasks
            WHERE config_id = $1 AND status IN ('PENDING', 'RUNNING')
            ORDER BY created_at, id
            "#,
        )
        .bind(config_id)
        .fetch_all(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        Self::collect(&rows)
    }

    async fn find_running_started_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> PublisherResult<Vec<PublishTask>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM publish_tasks
            WHERE status = 'RUNNING' AND started_at IS NOT NULL AND started_at < $1
            ORDER BY started_at, id
            "#,
        )
        .bind(deadline)
        .fetch_all(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        Self::collect(&rows)
    }

    async fn find_completed_by_strategy(
        &self,
        strategy_id: i64,
    ) -> PublisherResult<Vec<PublishTask>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM publish_tasks
            WHERE strategy_id = $1 AND status = 'COMPLETED'
            ORDER BY finished_at, id
            "#,
        )
        .bind(strategy_id)
        .fetch_all(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        Self::collect(&rows)
    }

    async fn find_by_config_created_between(
        &self,
        config_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PublisherResult<Vec<PublishTask>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM publish_tasks
            WHERE config_id = $1 AND created_at >= $2 AND created_at <= $3
            ORDER BY created_at, id
            "#,
        )
        .bind(config_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        Self::collect(&rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::DatabaseManager;
    use chrono::Duration;
    use publisher_domain::entities::{FailureReason, PerformanceMetrics, TaskStatus};
    use publisher_testing_utils::builders::TaskBuilder;

    async fn repo() -> SqliteTaskRepository {
        let manager = DatabaseManager::in_memory().await.unwrap();
        SqliteTaskRepository::new(manager.pool().clone())
    }

    #[tokio::test]
    async fn test_create_and_find_round_trip() {
        let repo = repo().await;
        let mut metrics = PerformanceMetrics {
            views: 1200,
            likes: 80,
            ..Default::default()
        };
        metrics.extra.insert("saves".to_string(), 14.0);

        let task = TaskBuilder::new()
            .with_account("acct_7")
            .with_variant("experiment")
            .with_strategy(3)
            .with_parameters(serde_json::json!({"title": "第一集"}))
            .with_status(TaskStatus::Completed)
            .with_metrics(metrics.clone())
            .build();

        let created = repo.create(&task).await.unwrap();
        assert_eq!(created.id, task.id);

        let found = repo.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(found.account_id, "acct_7");
        assert_eq!(found.variant.as_deref(), Some("experiment"));
        assert_eq!(found.status, TaskStatus::Completed);
        assert_eq!(found.metrics, Some(metrics));
        assert_eq!(found.batch_id, task.batch_id);
        assert_eq!(found.isolation_key, task.isolation_key);
        assert_eq!(found.parameters, task.parameters);

        assert!(repo.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_transitions_status() {
        let repo = repo().await;
        let task = repo.create(&TaskBuilder::new().build()).await.unwrap();

        let mut running = task.clone();
        running.status = TaskStatus::Running;
        running.started_at = Some(Utc::now());
        let updated = repo.update(&running).await.unwrap();
        assert_eq!(updated.status, TaskStatus::Running);
        assert!(updated.started_at.is_some());

        let mut failed = updated.clone();
        failed.status = TaskStatus::Failed;
        failed.failure_reason = Some(FailureReason::RunnerFailure);
        failed.error_message = Some("渲染超时".to_string());
        failed.finished_at = Some(Utc::now());
        let updated = repo.update(&failed).await.unwrap();
        assert_eq!(updated.failure_reason, Some(FailureReason::RunnerFailure));
        assert_eq!(updated.error_message.as_deref(), Some("渲染超时"));

        let ghost = TaskBuilder::new().build();
        assert!(matches!(
            repo.update(&ghost).await,
            Err(PublisherError::TaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_find_in_flight_excludes_terminal() {
        let repo = repo().await;
        repo.create(&TaskBuilder::new().with_config(5).build())
            .await
            .unwrap();
        repo.create(
            &TaskBuilder::new()
                .with_config(5)
                .with_status(TaskStatus::Running)
                .build(),
        )
        .await
        .unwrap();
        repo.create(
            &TaskBuilder::new()
                .with_config(5)
                .with_status(TaskStatus::Completed)
                .build(),
        )
        .await
        .unwrap();
        repo.create(&TaskBuilder::new().with_config(6).build())
            .await
            .unwrap();

        let in_flight = repo.find_in_flight_by_config(5).await.unwrap();
        assert_eq!(in_flight.len(), 2);
        assert!(in_flight.iter().all(|t| t.is_in_flight()));
    }

    #[tokio::test]
    async fn test_find_running_started_before_deadline() {
        let repo = repo().await;
        let now = Utc::now();

        repo.create(
            &TaskBuilder::new()
                .with_status(TaskStatus::Running)
                .with_started_at(now - Duration::hours(2))
                .build(),
        )
        .await
        .unwrap();
        repo.create(
            &TaskBuilder::new()
                .with_status(TaskStatus::Running)
                .with_started_at(now - Duration::seconds(10))
                .build(),
        )
        .await
        .unwrap();
        // RUNNING但未记录启动时间的不参与过期判定
        repo.create(
            &TaskBuilder::new()
                .with_status(TaskStatus::Running)
                .build(),
        )
        .await
        .unwrap();

        let stale = repo
            .find_running_started_before(now - Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
    }

    #[tokio::test]
    async fn test_find_completed_by_strategy() {
        let repo = repo().await;
        repo.create(
            &TaskBuilder::new()
                .with_strategy(9)
                .completed_with_metric("views", 100.0)
                .build(),
        )
        .await
        .unwrap();
        repo.create(
            &TaskBuilder::new()
                .with_strategy(9)
                .with_status(TaskStatus::Failed)
                .build(),
        )
        .await
        .unwrap();
        repo.create(
            &TaskBuilder::new()
                .with_strategy(8)
                .completed_with_metric("views", 50.0)
                .build(),
        )
        .await
        .unwrap();

        let completed = repo.find_completed_by_strategy(9).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].strategy_id, Some(9));
    }

    #[tokio::test]
    async fn test_batch_and_time_window_lookups() {
        let repo = repo().await;
        let batch_id = Uuid::new_v4();
        let base = Utc::now() - Duration::hours(1);

        for offset in [0, 600] {
            repo.create(
                &TaskBuilder::new()
                    .with_config(3)
                    .with_batch(batch_id)
                    .with_created_at(base + Duration::seconds(offset))
                    .build(),
            )
            .await
            .unwrap();
        }
        repo.create(
            &TaskBuilder::new()
                .with_config(3)
                .with_created_at(base - Duration::hours(5))
                .build(),
        )
        .await
        .unwrap();

        let by_batch = repo.find_by_batch(batch_id).await.unwrap();
        assert_eq!(by_batch.len(), 2);
        assert!(by_batch.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        let windowed = repo
            .find_by_config_created_between(
                3,
                base - Duration::minutes(5),
                base + Duration::minutes(5),
            )
            .await
            .unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].created_at, base);
    }
}
