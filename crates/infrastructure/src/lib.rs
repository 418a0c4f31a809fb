//! 基础设施层
//!
//! 领域仓储接口的SQLite实现与消息队列的内存实现，
//! 装配层在这里选型后注入领域与派发层。

pub mod database;
pub mod in_memory_queue;

pub use database::sqlite::{
    DatabaseManager, DbPool, SqliteAccountGroupRegistry, SqliteConfigRepository,
    SqlitePipelineRegistry, SqliteSlotRepository, SqliteStrategyRepository, SqliteTaskRepository,
};
pub use in_memory_queue::InMemoryMessageQueue;
