use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use publisher_core::{PublisherError, PublisherResult};
use publisher_domain::entities::Strategy;
use publisher_domain::repositories::StrategyRepository;

/// 账号选择策略的SQLite仓储，策略规格整体作为JSON文本存储
pub struct SqliteStrategyRepository {
    pool: SqlitePool,
}

impl SqliteStrategyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_strategy(row: &SqliteRow) -> PublisherResult<Strategy> {
        let spec_text: String = row.try_get("spec")?;

        Ok(Strategy {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            spec: serde_json::from_str(&spec_text)?,
            valid_from: row.try_get("valid_from")?,
            valid_until: row.try_get("valid_until")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl StrategyRepository for SqliteStrategyRepository {
    async fn create(&self, strategy: &Strategy) -> PublisherResult<Strategy> {
        let spec_text = serde_json::to_string(&strategy.spec)?;

        let row = sqlx::query(
            r#"
            INSERT INTO strategies (name, spec, valid_from, valid_until, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&strategy.name)
        .bind(&spec_text)
        .bind(strategy.valid_from)
        .bind(strategy.valid_until)
        .bind(strategy.created_at)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        let created = Self::row_to_strategy(&row)?;
        debug!("创建策略: {} (id={})", created.name, created.id);
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> PublisherResult<Option<Strategy>> {
        let row = sqlx::query("SELECT * FROM strategies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PublisherError::Database)?;

        row.map(|r| Self::row_to_strategy(&r)).transpose()
    }

    async fn update(&self, strategy: &Strategy) -> PublisherResult<Strategy> {
        let spec_text = serde_json::to_string(&strategy.spec)?;

        let result = sqlx::query(
            r#"
            UPDATE strategies SET
                name = $1, spec = $2, valid_from = $3, valid_until = $4, updated_at = $5
            WHERE id = $6
            "#,
        )
        .bind(&strategy.name)
        .bind(&spec_text)
        .bind(strategy.valid_from)
        .bind(strategy.valid_until)
        .bind(Utc::now())
        .bind(strategy.id)
        .execute(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        if result.rows_affected() == 0 {
            return Err(PublisherError::StrategyNotFound { id: strategy.id });
        }

        debug!("更新策略: id={}", strategy.id);
        self.find_by_id(strategy.id)
            .await?
            .ok_or(PublisherError::StrategyNotFound { id: strategy.id })
    }
}
