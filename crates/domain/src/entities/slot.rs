use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 排期槽位状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Planned,
    Consumed,
    Skipped,
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotStatus::Planned => write!(f, "planned"),
            SlotStatus::Consumed => write!(f, "consumed"),
            SlotStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for SlotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(SlotStatus::Planned),
            "consumed" => Ok(SlotStatus::Consumed),
            "skipped" => Ok(SlotStatus::Skipped),
            other => Err(format!("未知的槽位状态: {other}")),
        }
    }
}

/// 排期槽位：预分配的 时间+账号 配对，用于铺开派发节奏
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub id: i64,
    pub config_id: i64,
    pub account_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: SlotStatus,
    pub task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
