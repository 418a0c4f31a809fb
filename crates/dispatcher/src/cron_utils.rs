use chrono::{DateTime, TimeZone};
use cron::Schedule;
use std::str::FromStr;
use tracing::{debug, warn};

use publisher_core::{PublisherError, PublisherResult};

/// 逆向扫描的迭代上限，防止稀疏表达式导致的长循环
const OCCURRENCE_SCAN_CAP: usize = 100_000;

/// CRON表达式解析和调度工具
///
/// 配置侧使用5字段表达式（分 时 日 月 周），内部补秒后交给解析器；
/// 带秒的6/7字段表达式原样接受
pub struct CronScheduler {
    schedule: Schedule,
}

impl CronScheduler {
    /// 创建新的CRON调度器
    pub fn new(cron_expr: &str) -> PublisherResult<Self> {
        let normalized = Self::normalize(cron_expr);
        let schedule =
            Schedule::from_str(&normalized).map_err(|e| PublisherError::InvalidCron {
                expr: cron_expr.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self { schedule })
    }

    fn normalize(cron_expr: &str) -> String {
        let field_count = cron_expr.split_whitespace().count();
        if field_count == 5 {
            format!("0 {cron_expr}")
        } else {
            cron_expr.to_string()
        }
    }

    /// 获取from之后的下一次执行时间
    pub fn next_after<Tz: TimeZone>(&self, from: DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.schedule.after(&from).next()
    }

    /// 查找 (from, to] 区间内最近的一次执行时间
    ///
    /// 错过补发只关心最近一次，更早的错过项被有意丢弃
    pub fn last_occurrence_between<Tz: TimeZone>(
        &self,
        from: DateTime<Tz>,
        to: DateTime<Tz>,
    ) -> Option<DateTime<Tz>> {
        if to <= from {
            return None;
        }

        let mut last = None;
        for (index, occurrence) in self.schedule.after(&from).enumerate() {
            if occurrence > to {
                break;
            }
            last = Some(occurrence);
            if index + 1 >= OCCURRENCE_SCAN_CAP {
                warn!("执行点扫描达到上限 {}，放弃更晚的执行点", OCCURRENCE_SCAN_CAP);
                break;
            }
        }

        if let Some(ref at) = last {
            debug!("区间内最近执行点: {:?}", at);
        }
        last
    }

    /// 验证CRON表达式是否有效
    pub fn validate_expression(cron_expr: &str) -> PublisherResult<()> {
        let normalized = Self::normalize(cron_expr);
        Schedule::from_str(&normalized).map_err(|e| PublisherError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone, Timelike, Utc};

    #[test]
    fn test_five_field_expression_accepted() {
        assert!(CronScheduler::new("0 20 * * *").is_ok());
        assert!(CronScheduler::new("*/5 * * * *").is_ok());
        // 带秒的6字段同样有效
        assert!(CronScheduler::new("0 0 20 * * *").is_ok());
        assert!(CronScheduler::new("invalid").is_err());
        assert!(CronScheduler::new("").is_err());
    }

    #[test]
    fn test_next_after_daily_expression() {
        let scheduler = CronScheduler::new("0 20 * * *").unwrap();

        let before = Utc.with_ymd_and_hms(2024, 1, 15, 19, 59, 0).unwrap();
        let next = scheduler.next_after(before).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 15, 20, 0, 0).unwrap());

        let just_after = Utc.with_ymd_and_hms(2024, 1, 15, 20, 0, 1).unwrap();
        let next = scheduler.next_after(just_after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 16, 20, 0, 0).unwrap());
    }

    #[test]
    fn test_next_after_respects_timezone() {
        let scheduler = CronScheduler::new("0 20 * * *").unwrap();
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();

        let local = offset.with_ymd_and_hms(2024, 1, 15, 19, 0, 0).unwrap();
        let next = scheduler.next_after(local).unwrap();
        assert_eq!(next.hour(), 20);
        // 本地20:00等于UTC 12:00
        assert_eq!(next.with_timezone(&Utc).hour(), 12);
    }

    #[test]
    fn test_last_occurrence_between() {
        let scheduler = CronScheduler::new("0 * * * *").unwrap();

        let from = Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 1, 13, 10, 0).unwrap();
        let last = scheduler.last_occurrence_between(from, to).unwrap();
        assert_eq!(last, Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap());

        // 区间内没有执行点
        let narrow_to = Utc.with_ymd_and_hms(2024, 1, 1, 10, 45, 0).unwrap();
        assert!(scheduler.last_occurrence_between(from, narrow_to).is_none());

        // 区间为空
        assert!(scheduler.last_occurrence_between(to, from).is_none());
    }

    #[test]
    fn test_validate_expression() {
        assert!(CronScheduler::validate_expression("0 20 * * *").is_ok());
        assert!(CronScheduler::validate_expression("30 9-17 * * 1-5").is_ok());
        assert!(CronScheduler::validate_expression("0 0 32 * *").is_err());
        assert!(CronScheduler::validate_expression("not a cron").is_err());
    }
}
