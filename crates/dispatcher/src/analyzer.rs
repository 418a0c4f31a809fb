use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use publisher_core::{PublisherError, PublisherResult};
use publisher_domain::entities::StrategySpec;
use publisher_domain::repositories::{StrategyRepository, TaskRepository};

/// 显著性阈值
const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// 无变体标签任务在报告中的分组名
const UNASSIGNED_VARIANT: &str = "unassigned";

/// 单个变体的统计摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantStats {
    pub variant: String,
    pub count: usize,
    pub mean: f64,
    /// 样本标准差，样本数不足2时为0
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
}

/// 两变体显著性检验结论
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignificanceResult {
    pub variant_a: String,
    pub variant_b: String,
    pub t_statistic: f64,
    pub degrees_of_freedom: f64,
    pub p_value: f64,
    pub significant: bool,
}

/// 策略报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyReport {
    pub strategy_id: i64,
    /// 评估指标名
    pub metric: String,
    /// 按均值降序排列的变体统计
    pub variants: Vec<VariantStats>,
    /// 均值最高的两个变体之间的检验，不足两个变体时为空
    pub comparison: Option<SignificanceResult>,
    /// 只有显著时才宣告赢家
    pub winner: Option<String>,
    pub recommendation: String,
    pub generated_at: DateTime<Utc>,
}

/// 策略分析器
///
/// 从已完成任务的表现指标推导变体统计与显著性结论。纯读取，
/// 不写任何任务或策略记录，可以与派发并发反复执行
pub struct StrategyAnalyzer {
    task_repo: Arc<dyn TaskRepository>,
    strategy_repo: Arc<dyn StrategyRepository>,
}

impl StrategyAnalyzer {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        strategy_repo: Arc<dyn StrategyRepository>,
    ) -> Self {
        Self {
            task_repo,
            strategy_repo,
        }
    }

    /// 生成策略报告
    pub async fn report(&self, strategy_id: i64) -> PublisherResult<StrategyReport> {
        let strategy = self
            .strategy_repo
            .find_by_id(strategy_id)
            .await?
            .ok_or(PublisherError::StrategyNotFound { id: strategy_id })?;

        let metric = match &strategy.spec {
            StrategySpec::AbTest { metric, .. } => metric.clone(),
            _ => "views".to_string(),
        };

        let tasks = self.task_repo.find_completed_by_strategy(strategy_id).await?;

        let mut observations: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for task in &tasks {
            if let Some(metrics) = &task.metrics {
                if let Some(value) = metrics.get(&metric) {
                    let variant = task
                        .variant
                        .clone()
                        .unwrap_or_else(|| UNASSIGNED_VARIANT.to_string());
                    observations.entry(variant).or_default().push(value);
                }
            }
        }

        let mut variants: Vec<VariantStats> = observations
            .iter()
            .map(|(name, values)| variant_stats(name, values))
            .collect();
        variants.sort_by(|a, b| {
            b.mean
                .total_cmp(&a.mean)
                .then_with(|| a.variant.cmp(&b.variant))
        });

        let comparison = if variants.len() >= 2 {
            let a = &variants[0];
            let b = &variants[1];
            welch_t_test(&observations[&a.variant], &observations[&b.variant]).map(
                |(t_statistic, degrees_of_freedom, p_value)| SignificanceResult {
                    variant_a: a.variant.clone(),
                    variant_b: b.variant.clone(),
                    t_statistic,
                    degrees_of_freedom,
                    p_value,
                    significant: p_value < SIGNIFICANCE_LEVEL,
                },
            )
        } else {
            None
        };

        let winner = comparison
            .as_ref()
            .filter(|c| c.significant)
            .map(|_| variants[0].variant.clone());

        let recommendation = match &comparison {
            Some(c) if c.significant => format!(
                "变体 {} 在指标 {} 上显著优于 {} (p={:.4}), 建议采用",
                c.variant_a, metric, c.variant_b, c.p_value
            ),
            Some(c) => format!(
                "变体 {} 与 {} 在指标 {} 上无显著差异 (p={:.4}), 建议继续观察",
                c.variant_a, c.variant_b, metric, c.p_value
            ),
            None if variants.len() >= 2 => "样本量不足, 无法进行显著性检验".to_string(),
            None => "变体数不足, 无法比较".to_string(),
        };

        info!(
            "策略 {} 报告生成: 变体数={}, 样本数={}, 赢家={:?}",
            strategy_id,
            variants.len(),
            tasks.len(),
            winner
        );

        Ok(StrategyReport {
            strategy_id,
            metric,
            variants,
            comparison,
            winner,
            recommendation,
            generated_at: Utc::now(),
        })
    }
}

fn variant_stats(name: &str, values: &[f64]) -> VariantStats {
    let count = values.len();
    let (mean, variance) = mean_and_variance(values);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    VariantStats {
        variant: name.to_string(),
        count,
        mean,
        stddev: variance.sqrt(),
        min,
        max,
    }
}

/// 均值与样本方差（n-1分母）
fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (mean, 0.0);
    }
    let variance = values
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / (n - 1) as f64;
    (mean, variance)
}

/// Welch双样本t检验
///
/// 返回 (t统计量, 自由度, 双侧p值)；任一组样本数不足2时无法检验。
/// 两组方差都为0时退化为确定性判断：均值相同p=1，不同p=0
fn welch_t_test(a: &[f64], b: &[f64]) -> Option<(f64, f64, f64)> {
    if a.len() < 2 || b.len() < 2 {
        return None;
    }
    let (mean_a, var_a) = mean_and_variance(a);
    let (mean_b, var_b) = mean_and_variance(b);
    let na = a.len() as f64;
    let nb = b.len() as f64;

    let se_a = var_a / na;
    let se_b = var_b / nb;
    let se_sq = se_a + se_b;
    if se_sq <= f64::EPSILON {
        let equal = (mean_a - mean_b).abs() <= f64::EPSILON;
        let p = if equal { 1.0 } else { 0.0 };
        return Some((0.0, na + nb - 2.0, p));
    }

    let t = (mean_a - mean_b) / se_sq.sqrt();
    let df = se_sq * se_sq / (se_a * se_a / (na - 1.0) + se_b * se_b / (nb - 1.0));
    let p = incomplete_beta(df / 2.0, 0.5, df / (df + t * t));
    Some((t, df, p))
}

/// 正则化不完全Beta函数 I_x(a, b)
fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front =
        ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    // 连分式在对称点两侧各自收敛更快
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

/// Lentz法求Beta连分式
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITERATIONS: usize = 200;
    const EPSILON: f64 = 1.0e-12;
    const TINY: f64 = 1.0e-30;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        let numerator = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + numerator * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + numerator / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let numerator = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + numerator * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + numerator / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPSILON {
            break;
        }
    }
    h
}

/// Lanczos近似求ln Γ(x)
fn ln_gamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        1.208_650_973_866_179e-3,
        -5.395_239_384_953e-6,
    ];

    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut series = 1.000_000_000_190_015;
    let mut y = x;
    for coefficient in COEFFICIENTS {
        y += 1.0;
        series += coefficient / y;
    }
    -tmp + (2.506_628_274_631_000_5 * series / x).ln()
}
