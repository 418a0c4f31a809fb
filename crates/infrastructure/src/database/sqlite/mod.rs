//! SQLite 持久化实现
//!
//! 所有仓储共享同一个连接池，建表语句内嵌在管理器中，
//! 首次连接时自动初始化，重复执行是幂等的。

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use publisher_core::{DatabaseConfig, PublisherError, PublisherResult};

mod sqlite_config_repository;
mod sqlite_registry_repository;
mod sqlite_slot_repository;
mod sqlite_strategy_repository;
mod sqlite_task_repository;

pub use sqlite_config_repository::SqliteConfigRepository;
pub use sqlite_registry_repository::{SqliteAccountGroupRegistry, SqlitePipelineRegistry};
pub use sqlite_slot_repository::SqliteSlotRepository;
pub use sqlite_strategy_repository::SqliteStrategyRepository;
pub use sqlite_task_repository::SqliteTaskRepository;

pub type DbPool = Pool<Sqlite>;

/// 数据库连接管理器
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// 按配置建立连接池并初始化表结构
    pub async fn new(config: &DatabaseConfig) -> PublisherResult<Self> {
        info!("初始化数据库连接池: {}", config.url);

        let connect_options = SqliteConnectOptions::from_str(&config.url)
            .map_err(PublisherError::Database)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(1800))
            .connect_with(connect_options)
            .await
            .map_err(PublisherError::Database)?;

        let manager = Self { pool };
        manager.migrate().await?;
        Ok(manager)
    }

    /// 单连接内存库，进程退出即消失，用于测试和演练
    pub async fn in_memory() -> PublisherResult<Self> {
        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(PublisherError::Database)?
            .foreign_keys(true);

        // 内存库按连接隔离，池必须收敛到单连接
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .connect_with(connect_options)
            .await
            .map_err(PublisherError::Database)?;

        let manager = Self { pool };
        manager.migrate().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 初始化表结构，可重复执行
    pub async fn migrate(&self) -> PublisherResult<()> {
        debug!("执行SQLite表结构初始化");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS publish_configs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                pipeline_id TEXT NOT NULL,
                group_id INTEGER NOT NULL,
                strategy_id INTEGER,
                trigger_config TEXT NOT NULL,
                parameters TEXT NOT NULL DEFAULT '{}',
                target TEXT,
                content_id TEXT,
                pacing TEXT,
                priority INTEGER NOT NULL DEFAULT 50,
                active INTEGER NOT NULL DEFAULT 1,
                timezone TEXT NOT NULL DEFAULT '+00:00',
                last_fired_at DATETIME,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS publish_tasks (
                id TEXT PRIMARY KEY,
                config_id INTEGER NOT NULL,
                group_id INTEGER NOT NULL,
                account_id TEXT NOT NULL,
                pipeline_id TEXT NOT NULL,
                strategy_id INTEGER,
                parameters TEXT NOT NULL DEFAULT '{}',
                variant TEXT,
                status TEXT NOT NULL DEFAULT 'PENDING',
                failure_reason TEXT,
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                isolation_key TEXT NOT NULL,
                batch_id TEXT NOT NULL,
                slot_id INTEGER,
                earliest_start_at DATETIME,
                metrics TEXT,
                created_at DATETIME NOT NULL,
                started_at DATETIME,
                finished_at DATETIME
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schedule_slots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                config_id INTEGER NOT NULL,
                account_id TEXT NOT NULL,
                scheduled_at DATETIME NOT NULL,
                status TEXT NOT NULL DEFAULT 'planned',
                task_id TEXT,
                created_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                spec TEXT NOT NULL,
                valid_from DATETIME,
                valid_until DATETIME,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rotation_cursors (
                config_id INTEGER PRIMARY KEY,
                cursor INTEGER NOT NULL DEFAULT 0,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipelines (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                param_schema TEXT NOT NULL DEFAULT '{"fields":{}}',
                supported_targets TEXT NOT NULL DEFAULT '[]',
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                members TEXT NOT NULL DEFAULT '[]',
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(PublisherError::Database)?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_publish_configs_active ON publish_configs(active)",
            "CREATE INDEX IF NOT EXISTS idx_publish_tasks_config_id ON publish_tasks(config_id)",
            "CREATE INDEX IF NOT EXISTS idx_publish_tasks_batch_id ON publish_tasks(batch_id)",
            "CREATE INDEX IF NOT EXISTS idx_publish_tasks_status ON publish_tasks(status)",
            "CREATE INDEX IF NOT EXISTS idx_publish_tasks_strategy_id ON publish_tasks(strategy_id)",
            "CREATE INDEX IF NOT EXISTS idx_schedule_slots_config_id ON schedule_slots(config_id)",
        ];
        for index_sql in indexes {
            sqlx::query(index_sql)
                .execute(&self.pool)
                .await
                .map_err(PublisherError::Database)?;
        }

        debug!("SQLite表结构初始化完成");
        Ok(())
    }

    /// 数据库健康检查
    pub async fn health_check(&self) -> PublisherResult<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(PublisherError::Database)?;
        Ok(())
    }

    pub async fn close(&self) {
        info!("关闭数据库连接池");
        self.pool.close().await;
    }
}

/// 解析TEXT列中的UUID，损坏数据按数据库操作错误上报
pub(crate) fn parse_uuid(value: &str) -> PublisherResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| PublisherError::DatabaseOperation(format!("无效的UUID: {value} - {e}")))
}
