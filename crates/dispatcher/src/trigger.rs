use chrono::{DateTime, Datelike, Days, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use tracing::{debug, warn};

use crate::cron_utils::CronScheduler;
use publisher_core::{PublisherError, PublisherResult};
use publisher_domain::entities::{parse_offset, PublishConfig, PublishEvent, TriggerConfig};

/// 月度日期匹配的最大回溯/前瞻天数，覆盖连续两个短月
const MONTHLY_SCAN_DAYS: u64 = 62;

/// 一次触发评估的结论
#[derive(Debug, Clone)]
pub struct FireDecision {
    pub should_fire: bool,
    /// 本次点火对应的执行点，错过补发时是被错过的那个时刻
    pub occurrence: Option<DateTime<Utc>>,
    /// 下一个候选点火时间，事件型和手动型没有
    pub next_fire_at: Option<DateTime<Utc>>,
}

impl FireDecision {
    fn idle(next_fire_at: Option<DateTime<Utc>>) -> Self {
        Self {
            should_fire: false,
            occurrence: None,
            next_fire_at,
        }
    }
}

/// 触发引擎
///
/// 评估配置的触发条件并决定是否点火。所有时刻计算在配置声明的
/// 时区内进行，再归一化到UTC比较。
///
/// 错过补发策略：进程停机期间错过的执行点，恢复后只对最近一次
/// 补发，更早的错过项不回灌。判定依据是 (上次点火时间, 当前时间]
/// 区间内是否存在执行点，回看范围受lookback限制
pub struct TriggerEngine {
    lookback: Duration,
}

impl TriggerEngine {
    pub fn new(missed_fire_lookback_hours: i64) -> Self {
        Self {
            lookback: Duration::hours(missed_fire_lookback_hours),
        }
    }

    /// 评估配置是否应该在now点火
    ///
    /// 纯时间计算，不触达存储；事件型和手动型永远不会自主点火
    pub fn evaluate(
        &self,
        config: &PublishConfig,
        now: DateTime<Utc>,
    ) -> PublisherResult<FireDecision> {
        if !config.active {
            return Ok(FireDecision::idle(None));
        }
        if !config.trigger.is_scheduled() {
            return Ok(FireDecision::idle(None));
        }

        let offset = parse_offset(&config.timezone)?;
        let base = config.last_fired_at.unwrap_or(config.created_at);
        let effective_from = base.max(now - self.lookback);

        let occurrence = self.most_recent_occurrence(config, offset, effective_from, now)?;
        let next_fire_at = self.next_occurrence(config, offset, now)?;

        if let Some(at) = occurrence {
            debug!(
                "配置 {} 到达触发时间: 执行点={}, 当前={}",
                config.id,
                at.format("%Y-%m-%d %H:%M:%S UTC"),
                now.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }

        Ok(FireDecision {
            should_fire: occurrence.is_some(),
            occurrence,
            next_fire_at,
        })
    }

    /// 计算from之后的下一个候选点火时间
    pub fn next_fire_time(
        &self,
        config: &PublishConfig,
        from: DateTime<Utc>,
    ) -> PublisherResult<Option<DateTime<Utc>>> {
        if !config.trigger.is_scheduled() {
            return Ok(None);
        }
        let offset = parse_offset(&config.timezone)?;
        self.next_occurrence(config, offset, from)
    }

    /// 事件是否命中该配置的事件触发器
    pub fn matches_event(config: &PublishConfig, event: &PublishEvent) -> bool {
        match &config.trigger {
            TriggerConfig::Event { event_type, filter } => {
                config.active && event.matches(event_type, filter.as_ref())
            }
            _ => false,
        }
    }

    /// 配置级校验
    ///
    /// 触发表达式的问题在这里暴露给操作者，坏配置不能进入调度循环
    /// 之后才失败
    pub fn validate_config(config: &PublishConfig) -> PublisherResult<()> {
        config.validate()?;
        if let TriggerConfig::Cron { expr } = &config.trigger {
            CronScheduler::validate_expression(expr)?;
        }
        Ok(())
    }

    /// (effective_from, now] 内最近的执行点
    fn most_recent_occurrence(
        &self,
        config: &PublishConfig,
        offset: FixedOffset,
        effective_from: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> PublisherResult<Option<DateTime<Utc>>> {
        if now <= effective_from {
            return Ok(None);
        }

        let found = match &config.trigger {
            TriggerConfig::Daily { at } => scan_backward(now, offset, 1, |_| true, *at),
            TriggerConfig::Weekly { days, at } => {
                scan_backward(now, offset, 7, |date| days.contains(&date.weekday()), *at)
            }
            TriggerConfig::Monthly { days, at } => scan_backward(
                now,
                offset,
                MONTHLY_SCAN_DAYS,
                |date| days.contains(&(date.day() as u8)),
                *at,
            ),
            TriggerConfig::Interval { every_seconds } => {
                interval_occurrence(config.created_at, *every_seconds, now)
            }
            TriggerConfig::Cron { expr } => {
                let scheduler = CronScheduler::new(expr)?;
                scheduler
                    .last_occurrence_between(
                        effective_from.with_timezone(&offset),
                        now.with_timezone(&offset),
                    )
                    .map(|at| at.with_timezone(&Utc))
            }
            TriggerConfig::Event { .. } | TriggerConfig::Manual => None,
        };

        Ok(found.filter(|at| *at > effective_from))
    }

    /// from之后（不含from）的下一个执行点
    fn next_occurrence(
        &self,
        config: &PublishConfig,
        offset: FixedOffset,
        from: DateTime<Utc>,
    ) -> PublisherResult<Option<DateTime<Utc>>> {
        let next = match &config.trigger {
            TriggerConfig::Daily { at } => {
                scan_forward(from, offset, 1, |_| true, *at)
            }
            TriggerConfig::Weekly { days, at } => {
                scan_forward(from, offset, 7, |date| days.contains(&date.weekday()), *at)
            }
            TriggerConfig::Monthly { days, at } => scan_forward(
                from,
                offset,
                MONTHLY_SCAN_DAYS,
                |date| days.contains(&(date.day() as u8)),
                *at,
            ),
            TriggerConfig::Interval { every_seconds } => {
                interval_next(config.created_at, *every_seconds, from)
            }
            TriggerConfig::Cron { expr } => {
                let scheduler = CronScheduler::new(expr)?;
                scheduler
                    .next_after(from.with_timezone(&offset))
                    .map(|at| at.with_timezone(&Utc))
            }
            TriggerConfig::Event { .. } | TriggerConfig::Manual => None,
        };

        if next.is_none() && config.trigger.is_scheduled() {
            warn!("配置 {} 无法计算下一次执行时间", config.id);
        }
        Ok(next)
    }
}

/// 从now所在的本地日期向过去扫描，返回最近的 匹配日+时刻 且不晚于now的执行点
fn scan_backward(
    now: DateTime<Utc>,
    offset: FixedOffset,
    max_days: u64,
    day_matches: impl Fn(NaiveDate) -> bool,
    at: NaiveTime,
) -> Option<DateTime<Utc>> {
    let local_date = now.with_timezone(&offset).date_naive();
    for back in 0..=max_days {
        let date = local_date.checked_sub_days(Days::new(back))?;
        if !day_matches(date) {
            continue;
        }
        if let Some(candidate) = local_candidate(date, at, offset) {
            if candidate <= now {
                return Some(candidate);
            }
        }
    }
    None
}

/// 从from所在的本地日期向未来扫描，返回最近的严格晚于from的执行点
fn scan_forward(
    from: DateTime<Utc>,
    offset: FixedOffset,
    max_days: u64,
    day_matches: impl Fn(NaiveDate) -> bool,
    at: NaiveTime,
) -> Option<DateTime<Utc>> {
    let local_date = from.with_timezone(&offset).date_naive();
    for ahead in 0..=max_days {
        let date = local_date.checked_add_days(Days::new(ahead))?;
        if !day_matches(date) {
            continue;
        }
        if let Some(candidate) = local_candidate(date, at, offset) {
            if candidate > from {
                return Some(candidate);
            }
        }
    }
    None
}

fn local_candidate(date: NaiveDate, at: NaiveTime, offset: FixedOffset) -> Option<DateTime<Utc>> {
    date.and_time(at)
        .and_local_timezone(offset)
        .single()
        .map(|local| local.with_timezone(&Utc))
}

/// 定时间隔：以配置创建时间为锚点的等距序列中，不晚于now的最后一项
fn interval_occurrence(
    anchor: DateTime<Utc>,
    every_seconds: u64,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if now < anchor || every_seconds == 0 {
        return None;
    }
    let elapsed = (now - anchor).num_seconds();
    let step = every_seconds as i64;
    Some(anchor + Duration::seconds((elapsed / step) * step))
}

fn interval_next(
    anchor: DateTime<Utc>,
    every_seconds: u64,
    from: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if every_seconds == 0 {
        return None;
    }
    if from < anchor {
        return Some(anchor);
    }
    let elapsed = (from - anchor).num_seconds();
    let step = every_seconds as i64;
    Some(anchor + Duration::seconds((elapsed / step + 1) * step))
}
