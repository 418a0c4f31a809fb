use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use publisher_core::{PublisherError, PublisherResult};
use publisher_domain::entities::{AccountGroup, GroupMember, Pipeline};
use publisher_domain::repositories::{AccountGroupRegistry, PipelineRegistry};

/// 流水线注册表的SQLite实现
///
/// 表由外部注册流程维护，调度侧只读。
/// `register` 仅用于种子数据和演练环境。
pub struct SqlitePipelineRegistry {
    pool: SqlitePool,
}

impl SqlitePipelineRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 写入或覆盖一条流水线定义
    pub async fn register(&self, pipeline: &Pipeline) -> PublisherResult<()> {
        let schema_text = serde_json::to_string(&pipeline.schema)?;
        let targets_text = serde_json::to_string(&pipeline.supported_targets)?;

        sqlx::query(
            r#"
            INSERT INTO pipelines (id, name, param_schema, supported_targets, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                param_schema = excluded.param_schema,
                supported_targets = excluded.supported_targets,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&pipeline.id)
        .bind(&pipeline.name)
        .bind(&schema_text)
        .bind(&targets_text)
        .bind(pipeline.created_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        debug!("注册流水线: {}", pipeline.id);
        Ok(())
    }

    fn row_to_pipeline(row: &SqliteRow) -> PublisherResult<Pipeline> {
        let schema_text: String = row.try_get("param_schema")?;
        let targets_text: String = row.try_get("supported_targets")?;

        Ok(Pipeline {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            schema: serde_json::from_str(&schema_text)?,
            supported_targets: serde_json::from_str(&targets_text)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl PipelineRegistry for SqlitePipelineRegistry {
    async fn get_pipeline(&self, pipeline_id: &str) -> PublisherResult<Pipeline> {
        let row = sqlx::query("SELECT * FROM pipelines WHERE id = $1")
            .bind(pipeline_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PublisherError::Database)?;

        let row = row.ok_or_else(|| PublisherError::PipelineNotFound {
            id: pipeline_id.to_string(),
        })?;
        Self::row_to_pipeline(&row)
    }
}

/// 账号组注册表的SQLite实现，成员列表整体作为JSON文本存储
pub struct SqliteAccountGroupRegistry {
    pool: SqlitePool,
}

impl SqliteAccountGroupRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 写入一个账号组，返回带ID的实体
    pub async fn register(&self, group: &AccountGroup) -> PublisherResult<AccountGroup> {
        let members_text = serde_json::to_string(&group.members)?;

        let row = sqlx::query(
            r#"
            INSERT INTO account_groups (name, members, created_at, updated_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&group.name)
        .bind(&members_text)
        .bind(group.created_at)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        let created = Self::row_to_group(&row)?;
        debug!(
            "注册账号组: {} (id={}, members={})",
            created.name,
            created.id,
            created.members.len()
        );
        Ok(created)
    }

    fn row_to_group(row: &SqliteRow) -> PublisherResult<AccountGroup> {
        let members_text: String = row.try_get("members")?;

        Ok(AccountGroup {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            members: serde_json::from_str(&members_text)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl AccountGroupRegistry for SqliteAccountGroupRegistry {
    async fn get_group(&self, group_id: i64) -> PublisherResult<AccountGroup> {
        let row = sqlx::query("SELECT * FROM account_groups WHERE id = $1")
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PublisherError::Database)?;

        let row = row.ok_or(PublisherError::AccountGroupNotFound { id: group_id })?;
        Self::row_to_group(&row)
    }

    async fn get_active_members(&self, group_id: i64) -> PublisherResult<Vec<GroupMember>> {
        let group = self.get_group(group_id).await?;
        Ok(group.active_members())
    }
}
