use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use publisher_core::{PublisherError, PublisherResult};
use publisher_domain::entities::PublishConfig;
use publisher_domain::repositories::ConfigRepository;

/// 发布配置的SQLite仓储
///
/// 触发配置、参数与节奏计划以JSON文本列存储，
/// 轮询游标落在独立的 `rotation_cursors` 表，随配置删除一并清理。
pub struct SqliteConfigRepository {
    pool: SqlitePool,
}

impl SqliteConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_config(row: &SqliteRow) -> PublisherResult<PublishConfig> {
        let trigger_text: String = row.try_get("trigger_config")?;
        let parameters_text: String = row.try_get("parameters")?;
        let pacing_text: Option<String> = row.try_get("pacing")?;

        Ok(PublishConfig {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            pipeline_id: row.try_get("pipeline_id")?,
            group_id: row.try_get("group_id")?,
            strategy_id: row.try_get("strategy_id")?,
            trigger: serde_json::from_str(&trigger_text)?,
            parameters: serde_json::from_str(&parameters_text)?,
            target: row.try_get("target")?,
            content_id: row.try_get("content_id")?,
            pacing: pacing_text
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            priority: row.try_get("priority")?,
            active: row.try_get("active")?,
            timezone: row.try_get("timezone")?,
            last_fired_at: row.try_get("last_fired_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ConfigRepository for SqliteConfigRepository {
    async fn create(&self, config: &PublishConfig) -> PublisherResult<PublishConfig> {
        let trigger_text = serde_json::to_string(&config.trigger)?;
        let parameters_text = serde_json::to_string(&config.parameters)?;
        let pacing_text = config
            .pacing
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let row = sqlx::query(
            r#"
            INSERT INTO publish_configs (
                name, pipeline_id, group_id, strategy_id, trigger_config, parameters,
                target, content_id, pacing, priority, active, timezone,
                last_fired_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING *
            "#,
        )
        .bind(&config.name)
        .bind(&config.pipeline_id)
        .bind(config.group_id)
        .bind(config.strategy_id)
        .bind(&trigger_text)
        .bind(&parameters_text)
        .bind(&config.target)
        .bind(&config.content_id)
        .bind(&pacing_text)
        .bind(config.priority)
        .bind(config.active)
        .bind(&config.timezone)
        .bind(config.last_fired_at)
        .bind(config.created_at)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        let created = Self::row_to_config(&row)?;
        debug!("创建发布配置: {} (id={})", created.name, created.id);
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> PublisherResult<Option<PublishConfig>> {
        let row = sqlx::query("SELECT * FROM publish_configs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PublisherError::Database)?;

        row.map(|r| Self::row_to_config(&r)).transpose()
    }

    async fn find_all(&self) -> PublisherResult<Vec<PublishConfig>> {
        let rows = sqlx::query("SELECT * FROM publish_configs ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(PublisherError::Database)?;

        rows.iter().map(Self::row_to_config).collect()
    }

    async fn find_active(&self) -> PublisherResult<Vec<PublishConfig>> {
        let rows = sqlx::query("SELECT * FROM publish_configs WHERE active = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(PublisherError::Database)?;

        rows.iter().map(Self::row_to_config).collect()
    }

    async fn update(&self, config: &PublishConfig) -> PublisherResult<PublishConfig> {
        let trigger_text = serde_json::to_string(&config.trigger)?;
        let parameters_text = serde_json::to_string(&config.parameters)?;
        let pacing_text = config
            .pacing
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE publish_configs SET
                name = $1, pipeline_id = $2, group_id = $3, strategy_id = $4,
                trigger_config = $5, parameters = $6, target = $7, content_id = $8,
                pacing = $9, priority = $10, active = $11, timezone = $12,
                last_fired_at = $13, updated_at = $14
            WHERE id = $15
            "#,
        )
        .bind(&config.name)
        .bind(&config.pipeline_id)
        .bind(config.group_id)
        .bind(config.strategy_id)
        .bind(&trigger_text)
        .bind(&parameters_text)
        .bind(&config.target)
        .bind(&config.content_id)
        .bind(&pacing_text)
        .bind(config.priority)
        .bind(config.active)
        .bind(&config.timezone)
        .bind(config.last_fired_at)
        .bind(Utc::now())
        .bind(config.id)
        .execute(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        if result.rows_affected() == 0 {
            return Err(PublisherError::ConfigNotFound { id: config.id });
        }

        debug!("更新发布配置: id={}", config.id);
        self.find_by_id(config.id)
            .await?
            .ok_or(PublisherError::ConfigNotFound { id: config.id })
    }

    async fn set_active(&self, id: i64, active: bool) -> PublisherResult<()> {
        let result =
            sqlx::query("UPDATE publish_configs SET active = $1, updated_at = $2 WHERE id = $3")
                .bind(active)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(PublisherError::Database)?;

        if result.rows_affected() == 0 {
            return Err(PublisherError::ConfigNotFound { id });
        }

        debug!("切换配置启用状态: id={} active={}", id, active);
        Ok(())
    }

    async fn delete(&self, id: i64) -> PublisherResult<bool> {
        let result = sqlx::query("DELETE FROM publish_configs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(PublisherError::Database)?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        // 游标随配置一并清理
        sqlx::query("DELETE FROM rotation_cursors WHERE config_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(PublisherError::Database)?;

        debug!("删除发布配置: id={}", id);
        Ok(true)
    }

    async fn record_fired(&self, id: i64, fired_at: DateTime<Utc>) -> PublisherResult<()> {
        let result = sqlx::query(
            "UPDATE publish_configs SET last_fired_at = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(fired_at)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        if result.rows_affected() == 0 {
            return Err(PublisherError::ConfigNotFound { id });
        }
        Ok(())
    }

    async fn load_cursor(&self, id: i64) -> PublisherResult<i64> {
        let row = sqlx::query("SELECT cursor FROM rotation_cursors WHERE config_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PublisherError::Database)?;

        match row {
            Some(row) => Ok(row.try_get("cursor")?),
            None => Ok(0),
        }
    }

    async fn save_cursor(&self, id: i64, cursor: i64) -> PublisherResult<()> {
        sqlx::query(
            r#"
            INSERT INTO rotation_cursors (config_id, cursor, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT(config_id) DO UPDATE SET
                cursor = excluded.cursor,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(cursor)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        Ok(())
    }
}
