pub mod account;
pub mod batch;
pub mod event;
pub mod pipeline;
pub mod publish_config;
pub mod slot;
pub mod strategy;
pub mod task;

pub use account::{AccountGroup, AccountRole, GroupMember};
pub use batch::BatchSummary;
pub use event::PublishEvent;
pub use pipeline::{ParamSchema, ParamSpec, ParamType, Pipeline};
pub use publish_config::{parse_offset, PacingPlan, PublishConfig, TriggerConfig};
pub use slot::{ScheduleSlot, SlotStatus};
pub use strategy::{Strategy, StrategySpec};
pub use task::{FailureReason, PerformanceMetrics, PublishTask, TaskStatus};
