use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use publisher_core::{PublisherError, PublisherResult};

/// 发布配置
///
/// 声明式地描述"哪条流水线、哪组账号、何时触发、如何选号"。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    pub id: i64,
    pub name: String,
    pub pipeline_id: String,
    pub group_id: i64,
    pub strategy_id: Option<i64>,
    pub trigger: TriggerConfig,
    /// 配置保存的参数值，派发时与流水线模式默认值合并
    pub parameters: Value,
    /// 发布目标，须在流水线声明的supported_targets内
    pub target: Option<String>,
    /// 内容标识，设置后启用(流水线,内容)去重锁
    pub content_id: Option<String>,
    /// 节奏计划，设置后派发按槽位铺开
    pub pacing: Option<PacingPlan>,
    /// 优先级 0-100，争用时高者先派发
    pub priority: u8,
    pub active: bool,
    /// UTC偏移，如 "+08:00"
    pub timezone: String,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 触发配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// 每天固定时刻
    Daily { at: NaiveTime },
    /// 每周指定星期的固定时刻
    Weekly { days: Vec<Weekday>, at: NaiveTime },
    /// 每月指定日期的固定时刻
    Monthly { days: Vec<u8>, at: NaiveTime },
    /// 固定周期，锚点为配置创建时间
    Interval { every_seconds: u64 },
    /// 五段式CRON表达式
    Cron { expr: String },
    /// 外部事件驱动
    Event {
        event_type: String,
        /// 对事件负载的精确匹配条件
        filter: Option<Value>,
    },
    /// 仅手动触发
    Manual,
}

impl TriggerConfig {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TriggerConfig::Daily { .. } => "daily",
            TriggerConfig::Weekly { .. } => "weekly",
            TriggerConfig::Monthly { .. } => "monthly",
            TriggerConfig::Interval { .. } => "interval",
            TriggerConfig::Cron { .. } => "cron",
            TriggerConfig::Event { .. } => "event",
            TriggerConfig::Manual => "manual",
        }
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(
            self,
            TriggerConfig::Daily { .. }
                | TriggerConfig::Weekly { .. }
                | TriggerConfig::Monthly { .. }
                | TriggerConfig::Interval { .. }
                | TriggerConfig::Cron { .. }
        )
    }
}

/// 节奏计划：把一次触发的任务在时间窗口内按固定间隔铺开
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacingPlan {
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    pub gap_seconds: u32,
}

impl PublishConfig {
    /// 结构校验（CRON表达式的解析校验在派发层完成）
    pub fn validate(&self) -> PublisherResult<()> {
        if self.name.is_empty() {
            return Err(PublisherError::InvalidTrigger(
                "配置名称不能为空".to_string(),
            ));
        }
        if self.priority > 100 {
            return Err(PublisherError::InvalidTrigger(format!(
                "优先级必须在0-100之间: {}",
                self.priority
            )));
        }
        parse_offset(&self.timezone)?;

        match &self.trigger {
            TriggerConfig::Weekly { days, .. } => {
                if days.is_empty() {
                    return Err(PublisherError::InvalidTrigger(
                        "weekly触发必须至少指定一个星期".to_string(),
                    ));
                }
            }
            TriggerConfig::Monthly { days, .. } => {
                if days.is_empty() {
                    return Err(PublisherError::InvalidTrigger(
                        "monthly触发必须至少指定一个日期".to_string(),
                    ));
                }
                if let Some(bad) = days.iter().find(|d| **d < 1 || **d > 31) {
                    return Err(PublisherError::InvalidTrigger(format!(
                        "monthly日期越界: {bad}"
                    )));
                }
            }
            TriggerConfig::Interval { every_seconds } => {
                if *every_seconds == 0 {
                    return Err(PublisherError::InvalidTrigger(
                        "interval周期必须大于0".to_string(),
                    ));
                }
            }
            TriggerConfig::Event { event_type, filter } => {
                if event_type.is_empty() {
                    return Err(PublisherError::InvalidTrigger(
                        "事件类型不能为空".to_string(),
                    ));
                }
                if let Some(f) = filter {
                    if !f.is_object() {
                        return Err(PublisherError::InvalidTrigger(
                            "事件过滤条件必须是对象".to_string(),
                        ));
                    }
                }
            }
            TriggerConfig::Daily { .. } | TriggerConfig::Cron { .. } | TriggerConfig::Manual => {}
        }

        if let Some(pacing) = &self.pacing {
            if pacing.gap_seconds == 0 {
                return Err(PublisherError::InvalidTrigger(
                    "节奏间隔必须大于0".to_string(),
                ));
            }
            if pacing.window_end <= pacing.window_start {
                return Err(PublisherError::InvalidTrigger(
                    "节奏窗口结束必须晚于开始".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// 解析配置声明的UTC偏移（如 "+08:00"、"-05:30"）
pub fn parse_offset(value: &str) -> PublisherResult<chrono::FixedOffset> {
    value
        .parse::<chrono::FixedOffset>()
        .map_err(|_| PublisherError::InvalidTimezone {
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_config(trigger: TriggerConfig) -> PublishConfig {
        PublishConfig {
            id: 1,
            name: "daily-video".to_string(),
            pipeline_id: "video-gen".to_string(),
            group_id: 1,
            strategy_id: None,
            trigger,
            parameters: json!({}),
            target: None,
            content_id: None,
            pacing: None,
            priority: 50,
            active: true,
            timezone: "+00:00".to_string(),
            last_fired_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_valid_daily_config() {
        let config = base_config(TriggerConfig::Daily {
            at: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_priority_out_of_range_rejected() {
        let mut config = base_config(TriggerConfig::Manual);
        config.priority = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_timezone_rejected() {
        let mut config = base_config(TriggerConfig::Manual);
        config.timezone = "Asia/Shanghai".to_string();
        assert!(matches!(
            config.validate(),
            Err(PublisherError::InvalidTimezone { .. })
        ));
    }

    #[test]
    fn test_empty_weekly_days_rejected() {
        let config = base_config(TriggerConfig::Weekly {
            days: vec![],
            at: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_monthly_day_bounds_checked() {
        let config = base_config(TriggerConfig::Monthly {
            days: vec![15, 32],
            at: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = base_config(TriggerConfig::Interval { every_seconds: 0 });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_trigger_serde_round_trip() {
        let trigger = TriggerConfig::Weekly {
            days: vec![Weekday::Mon, Weekday::Thu],
            at: NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
        };
        let encoded = serde_json::to_string(&trigger).unwrap();
        assert!(encoded.contains("\"kind\":\"weekly\""));
        let decoded: TriggerConfig = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, trigger);
    }

    #[test]
    fn test_pacing_window_validated() {
        let mut config = base_config(TriggerConfig::Manual);
        config.pacing = Some(PacingPlan {
            window_start: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            window_end: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            gap_seconds: 300,
        });
        assert!(config.validate().is_err());
    }
}
