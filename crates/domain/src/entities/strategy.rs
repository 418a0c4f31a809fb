use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use publisher_core::{PublisherError, PublisherResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,
    pub name: String,
    pub spec: StrategySpec,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategySpec {
    AbTest {
        variants: Vec<String>,
        /// 评估指标名，见 PerformanceMetrics::get
        metric: String,
    },
    RoundRobin {
        /// 每次触发选取的账号数
        batch_size: u32,
    },
    Weighted {
        /// 账号ID到权重的映射
        weights: BTreeMap<String, f64>,
        sample_size: u32,
    },
    Random {
        sample_size: u32,
    },
}

impl Strategy {
    pub fn kind_name(&self) -> &'static str {
        match self.spec {
            StrategySpec::AbTest { .. } => "ab_test",
            StrategySpec::RoundRobin { .. } => "round_robin",
            StrategySpec::Weighted { .. } => "weighted",
            StrategySpec::Random { .. } => "random",
        }
    }

    pub fn validate(&self) -> PublisherResult<()> {
        if self.name.is_empty() {
            return Err(PublisherError::InvalidTrigger(
                "策略名称不能为空".to_string(),
            ));
        }
        if let (Some(from), Some(until)) = (self.valid_from, self.valid_until) {
            if until <= from {
                return Err(PublisherError::InvalidTrigger(
                    "策略有效期结束必须晚于开始".to_string(),
                ));
            }
        }
        match &self.spec {
            StrategySpec::AbTest { variants, metric } => {
                if variants.len() < 2 {
                    return Err(PublisherError::InvalidTrigger(
                        "ab_test至少需要两个变体".to_string(),
                    ));
                }
                if metric.is_empty() {
                    return Err(PublisherError::InvalidTrigger(
                        "ab_test必须指定评估指标".to_string(),
                    ));
                }
            }
            StrategySpec::RoundRobin { batch_size } => {
                if *batch_size == 0 {
                    return Err(PublisherError::InvalidTrigger(
                        "round_robin批量必须大于0".to_string(),
                    ));
                }
            }
            StrategySpec::Weighted {
                weights,
                sample_size,
            } => {
                if *sample_size == 0 {
                    return Err(PublisherError::InvalidTrigger(
                        "weighted抽样数必须大于0".to_string(),
                    ));
                }
                if let Some((account, w)) = weights.iter().find(|(_, w)| **w < 0.0) {
                    return Err(PublisherError::InvalidTrigger(format!(
                        "账号 {account} 的权重不能为负: {w}"
                    )));
                }
            }
            StrategySpec::Random { sample_size } => {
                if *sample_size == 0 {
                    return Err(PublisherError::InvalidTrigger(
                        "random抽样数必须大于0".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// 是否在有效期窗口内
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        if let Some(from) = self.valid_from {
            if at < from {
                return false;
            }
        }
        if let Some(until) = self.valid_until {
            if at >= until {
                return false;
            }
        }
        true
    }
}
