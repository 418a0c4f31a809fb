use chrono::{DateTime, Duration, FixedOffset, Utc};
use tracing::debug;

use publisher_core::{PublisherError, PublisherResult};
use publisher_domain::entities::{PacingPlan, ScheduleSlot, SlotStatus};

/// 排期槽位生成器
///
/// 把投放窗口按固定间隔展开成互不重叠的执行槽位，突发的多账号
/// 扇出被摊开到真实时间上，避免一次触发压垮下游渲染服务
pub struct SlotPlanner;

impl SlotPlanner {
    /// 窗口能容纳的槽位数，窗口两端都可用
    pub fn capacity(pacing: &PacingPlan) -> usize {
        let span = (pacing.window_end - pacing.window_start).num_seconds();
        (span / i64::from(pacing.gap_seconds) + 1) as usize
    }

    /// 为一次触发展开槽位
    ///
    /// 槽位时刻在配置时区的触发当日内计算，再归一化到UTC持久化。
    /// 账号数超出窗口容量时整次触发拒绝，调用方应提示操作者调整窗口
    pub fn plan(
        config_id: i64,
        pacing: &PacingPlan,
        offset: FixedOffset,
        fired_at: DateTime<Utc>,
        account_ids: &[String],
    ) -> PublisherResult<Vec<ScheduleSlot>> {
        let capacity = Self::capacity(pacing);
        if account_ids.len() > capacity {
            return Err(PublisherError::Validation {
                field: "pacing".to_string(),
                message: format!(
                    "投放窗口容量 {} 不足以容纳 {} 个账号",
                    capacity,
                    account_ids.len()
                ),
            });
        }

        let fire_date = fired_at.with_timezone(&offset).date_naive();
        let window_open = fire_date.and_time(pacing.window_start);

        let mut slots = Vec::with_capacity(account_ids.len());
        for (index, account_id) in account_ids.iter().enumerate() {
            let naive = window_open + Duration::seconds(i64::from(pacing.gap_seconds) * index as i64);
            let local = naive.and_local_timezone(offset).single().ok_or_else(|| {
                PublisherError::Internal(format!("槽位时刻无法定位到时区: {naive}"))
            })?;

            slots.push(ScheduleSlot {
                id: 0,
                config_id,
                account_id: account_id.clone(),
                scheduled_at: local.with_timezone(&Utc),
                status: SlotStatus::Planned,
                task_id: None,
                created_at: Utc::now(),
            });
        }

        debug!(
            "配置 {} 展开 {} 个槽位 (窗口容量 {})",
            config_id,
            slots.len(),
            capacity
        );
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone, Timelike};

    fn pacing(start: (u32, u32), end: (u32, u32), gap_seconds: u32) -> PacingPlan {
        PacingPlan {
            window_start: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            window_end: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            gap_seconds,
        }
    }

    #[test]
    fn test_capacity_counts_both_window_edges() {
        assert_eq!(SlotPlanner::capacity(&pacing((10, 0), (11, 0), 1800)), 3);
        assert_eq!(SlotPlanner::capacity(&pacing((10, 0), (10, 0), 600)), 1);
        assert_eq!(SlotPlanner::capacity(&pacing((9, 0), (17, 0), 3600)), 9);
    }

    #[test]
    fn test_plan_spreads_accounts_over_window() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let fired_at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 55, 0).unwrap();
        let accounts = vec!["acct_1".to_string(), "acct_2".to_string(), "acct_3".to_string()];

        let slots =
            SlotPlanner::plan(7, &pacing((10, 0), (11, 0), 1800), offset, fired_at, &accounts)
                .unwrap();

        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0].scheduled_at.time().hour(), 10);
        assert_eq!(slots[1].scheduled_at.time().minute(), 30);
        assert_eq!(slots[2].scheduled_at.time().hour(), 11);
        assert!(slots.iter().all(|s| s.status == SlotStatus::Planned));
        assert!(slots.iter().all(|s| s.config_id == 7));
        assert_eq!(slots[1].account_id, "acct_2");
    }

    #[test]
    fn test_plan_normalizes_local_window_to_utc() {
        // 东八区10:00等于UTC 02:00
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        let fired_at = Utc.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).unwrap();
        let accounts = vec!["acct_1".to_string()];

        let slots =
            SlotPlanner::plan(1, &pacing((10, 0), (11, 0), 1800), offset, fired_at, &accounts)
                .unwrap();

        assert_eq!(slots[0].scheduled_at.hour(), 2);
        assert_eq!(slots[0].scheduled_at.minute(), 0);
    }

    #[test]
    fn test_plan_rejects_overflowing_accounts() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let fired_at = Utc::now();
        let accounts: Vec<String> = (1..=4).map(|i| format!("acct_{i}")).collect();

        let result = SlotPlanner::plan(1, &pacing((10, 0), (11, 0), 1800), offset, fired_at, &accounts);
        assert!(matches!(
            result,
            Err(PublisherError::Validation { field, .. }) if field == "pacing"
        ));
    }
}
