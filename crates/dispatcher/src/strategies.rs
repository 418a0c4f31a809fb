use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use publisher_core::{PublisherError, PublisherResult};
use publisher_domain::entities::{GroupMember, PublishConfig, Strategy, StrategySpec};
use publisher_domain::repositories::{AccountGroupRegistry, ConfigRepository, StrategyRepository};

/// 一次触发中被选中的账号及其变体标签
#[derive(Debug, Clone)]
pub struct SelectedAccount {
    pub member: GroupMember,
    pub variant: Option<String>,
}

/// 账号解析结果
///
/// `strategy_id` 是实际生效的策略：配置引用的策略不在有效期内时
/// 退化为无策略投放，任务不再携带策略和变体标记
#[derive(Debug, Clone)]
pub struct ResolvedAccounts {
    pub accounts: Vec<SelectedAccount>,
    pub strategy_id: Option<i64>,
}

/// 策略解析器
///
/// 给定账号组和可选策略，为一次触发产出有序的目标账号列表。
/// 轮询游标按配置隔离并持久化，同一配置的游标推进串行执行
pub struct StrategyResolver {
    config_repo: Arc<dyn ConfigRepository>,
    strategy_repo: Arc<dyn StrategyRepository>,
    group_registry: Arc<dyn AccountGroupRegistry>,
    cursor_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    seed: Option<u64>,
}

impl StrategyResolver {
    pub fn new(
        config_repo: Arc<dyn ConfigRepository>,
        strategy_repo: Arc<dyn StrategyRepository>,
        group_registry: Arc<dyn AccountGroupRegistry>,
    ) -> Self {
        Self {
            config_repo,
            strategy_repo,
            group_registry,
            cursor_locks: Mutex::new(HashMap::new()),
            seed: None,
        }
    }

    /// 固定随机种子，加权与随机策略变为可复现
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// 解析一次触发的目标账号
    pub async fn resolve(
        &self,
        config: &PublishConfig,
        now: DateTime<Utc>,
    ) -> PublisherResult<ResolvedAccounts> {
        let members = self.group_registry.get_active_members(config.group_id).await?;
        if members.is_empty() {
            return Err(PublisherError::NoEligibleAccounts {
                group_id: config.group_id,
            });
        }

        let strategy = match config.strategy_id {
            Some(strategy_id) => {
                let strategy = self
                    .strategy_repo
                    .find_by_id(strategy_id)
                    .await?
                    .ok_or(PublisherError::StrategyNotFound { id: strategy_id })?;
                if strategy.is_valid_at(now) {
                    Some(strategy)
                } else {
                    warn!(
                        "策略 {} 不在有效期内，配置 {} 退化为无策略投放",
                        strategy_id, config.id
                    );
                    None
                }
            }
            None => None,
        };

        let resolved = match &strategy {
            None => ResolvedAccounts {
                accounts: members
                    .into_iter()
                    .map(|member| SelectedAccount {
                        member,
                        variant: None,
                    })
                    .collect(),
                strategy_id: None,
            },
            Some(strategy) => {
                let accounts = self.apply_strategy(config, strategy, members).await?;
                ResolvedAccounts {
                    accounts,
                    strategy_id: Some(strategy.id),
                }
            }
        };

        if resolved.accounts.is_empty() {
            return Err(PublisherError::NoEligibleAccounts {
                group_id: config.group_id,
            });
        }

        debug!(
            "配置 {} 解析出 {} 个目标账号 (策略: {:?})",
            config.id,
            resolved.accounts.len(),
            resolved.strategy_id
        );
        Ok(resolved)
    }

    async fn apply_strategy(
        &self,
        config: &PublishConfig,
        strategy: &Strategy,
        members: Vec<GroupMember>,
    ) -> PublisherResult<Vec<SelectedAccount>> {
        match &strategy.spec {
            StrategySpec::AbTest { variants, .. } => {
                Ok(Self::assign_variants(strategy.id, variants, members))
            }
            StrategySpec::RoundRobin { batch_size } => {
                self.rotate(config.id, *batch_size as usize, members).await
            }
            StrategySpec::Weighted {
                weights,
                sample_size,
            } => Ok(self.sample_weighted(weights, *sample_size as usize, members)),
            StrategySpec::Random { sample_size } => {
                Ok(self.sample_uniform(*sample_size as usize, members))
            }
        }
    }

    /// AB实验变体分配
    ///
    /// 变体取 (账号ID, 策略ID) 哈希对变体数取模，同一账号在策略不变时
    /// 的分组跨触发、跨进程稳定
    fn assign_variants(
        strategy_id: i64,
        variants: &[String],
        members: Vec<GroupMember>,
    ) -> Vec<SelectedAccount> {
        members
            .into_iter()
            .map(|member| {
                let digest = fnv1a64(&format!("{}:{}", member.account_id, strategy_id));
                let variant = variants[(digest % variants.len() as u64) as usize].clone();
                SelectedAccount {
                    member,
                    variant: Some(variant),
                }
            })
            .collect()
    }

    /// 轮询选择
    ///
    /// 游标持久化在配置上，每次触发前移batch_size；环上每个账号
    /// 在游标绕回前恰好被访问一次
    async fn rotate(
        &self,
        config_id: i64,
        batch_size: usize,
        members: Vec<GroupMember>,
    ) -> PublisherResult<Vec<SelectedAccount>> {
        let serial = {
            let mut locks = self.cursor_locks.lock().await;
            locks.entry(config_id).or_default().clone()
        };
        let _guard = serial.lock().await;

        let ring_len = members.len();
        let take = batch_size.min(ring_len);
        let cursor = self.config_repo.load_cursor(config_id).await?;
        let start = (cursor.rem_euclid(ring_len as i64)) as usize;

        let selected = (0..take)
            .map(|offset| {
                let member = members[(start + offset) % ring_len].clone();
                SelectedAccount {
                    member,
                    variant: None,
                }
            })
            .collect();

        self.config_repo
            .save_cursor(config_id, cursor + take as i64)
            .await?;

        Ok(selected)
    }

    /// 按权重无放回抽样
    ///
    /// 候选先按账号ID排序，同一种子下结果可复现；缺失权重按1.0处理，
    /// 权重和为0时退化为均匀抽样
    fn sample_weighted(
        &self,
        weights: &std::collections::BTreeMap<String, f64>,
        sample_size: usize,
        members: Vec<GroupMember>,
    ) -> Vec<SelectedAccount> {
        let mut rng = self.make_rng();
        let mut pool: Vec<GroupMember> = members;
        pool.sort_by(|a, b| a.account_id.cmp(&b.account_id));

        let take = sample_size.min(pool.len());
        let mut selected = Vec::with_capacity(take);

        for _ in 0..take {
            let pool_weights: Vec<f64> = pool
                .iter()
                .map(|m| weights.get(&m.account_id).copied().unwrap_or(1.0))
                .collect();
            let total: f64 = pool_weights.iter().sum();

            let index = if total <= 0.0 {
                rng.random_range(0..pool.len())
            } else {
                let mut draw = rng.random_range(0.0..total);
                let mut chosen = pool.len() - 1;
                for (i, weight) in pool_weights.iter().enumerate() {
                    if draw < *weight {
                        chosen = i;
                        break;
                    }
                    draw -= weight;
                }
                chosen
            };

            let member = pool.remove(index);
            selected.push(SelectedAccount {
                member,
                variant: None,
            });
        }

        selected
    }

    /// 组内均匀无放回抽样
    fn sample_uniform(&self, sample_size: usize, members: Vec<GroupMember>) -> Vec<SelectedAccount> {
        let mut rng = self.make_rng();
        let mut pool = members;
        pool.shuffle(&mut rng);

        pool.into_iter()
            .take(sample_size)
            .map(|member| SelectedAccount {
                member,
                variant: None,
            })
            .collect()
    }

    fn make_rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}

/// FNV-1a 64位哈希，变体分配要求跨进程稳定，不能依赖std的随机化哈希
fn fnv1a64(data: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for byte in data.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use publisher_testing_utils::builders::{
        GroupBuilder, PublishConfigBuilder, StrategyBuilder,
    };
    use publisher_testing_utils::mocks::{
        MockAccountGroupRegistry, MockConfigRepository, MockStrategyRepository,
    };
    use std::collections::BTreeMap;

    fn resolver_with(
        configs: Vec<publisher_domain::entities::PublishConfig>,
        strategies: Vec<Strategy>,
        groups: Vec<publisher_domain::entities::AccountGroup>,
    ) -> StrategyResolver {
        StrategyResolver::new(
            Arc::new(MockConfigRepository::with_configs(configs)),
            Arc::new(MockStrategyRepository::with_strategies(strategies)),
            Arc::new(MockAccountGroupRegistry::with_groups(groups)),
        )
    }

    #[tokio::test]
    async fn test_no_strategy_returns_all_active_members() {
        let group = GroupBuilder::new().with_plain_members(3).build();
        let config = PublishConfigBuilder::new().build();
        let resolver = resolver_with(vec![config.clone()], vec![], vec![group]);

        let resolved = resolver.resolve(&config, Utc::now()).await.unwrap();
        assert_eq!(resolved.accounts.len(), 3);
        assert!(resolved.strategy_id.is_none());
        assert!(resolved.accounts.iter().all(|a| a.variant.is_none()));
    }

    #[tokio::test]
    async fn test_empty_group_signals_no_eligible_accounts() {
        let group = GroupBuilder::new().build();
        let config = PublishConfigBuilder::new().build();
        let resolver = resolver_with(vec![config.clone()], vec![], vec![group]);

        let result = resolver.resolve(&config, Utc::now()).await;
        assert!(matches!(
            result,
            Err(PublisherError::NoEligibleAccounts { group_id: 1 })
        ));
    }

    #[tokio::test]
    async fn test_inactive_members_are_excluded() {
        let group = GroupBuilder::new()
            .with_member("acct_1", publisher_domain::entities::AccountRole::Member, true)
            .with_member("acct_2", publisher_domain::entities::AccountRole::Member, false)
            .build();
        let config = PublishConfigBuilder::new().build();
        let resolver = resolver_with(vec![config.clone()], vec![], vec![group]);

        let resolved = resolver.resolve(&config, Utc::now()).await.unwrap();
        assert_eq!(resolved.accounts.len(), 1);
        assert_eq!(resolved.accounts[0].member.account_id, "acct_1");
    }

    #[tokio::test]
    async fn test_round_robin_visits_every_account_before_repeat() {
        let group = GroupBuilder::new().with_plain_members(5).build();
        let strategy = StrategyBuilder::new()
            .with_spec(StrategySpec::RoundRobin { batch_size: 1 })
            .build();
        let config = PublishConfigBuilder::new().with_strategy(1).build();
        let resolver = resolver_with(vec![config.clone()], vec![strategy], vec![group]);

        let mut seen = Vec::new();
        for _ in 0..5 {
            let resolved = resolver.resolve(&config, Utc::now()).await.unwrap();
            assert_eq!(resolved.accounts.len(), 1);
            seen.push(resolved.accounts[0].member.account_id.clone());
        }

        let mut unique = seen.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 5, "游标绕回前每个账号出现一次: {seen:?}");

        // 第六次触发绕回起点
        let resolved = resolver.resolve(&config, Utc::now()).await.unwrap();
        assert_eq!(resolved.accounts[0].member.account_id, seen[0]);
    }

    #[tokio::test]
    async fn test_round_robin_cursors_are_config_scoped() {
        let group = GroupBuilder::new().with_plain_members(3).build();
        let strategy = StrategyBuilder::new()
            .with_spec(StrategySpec::RoundRobin { batch_size: 1 })
            .build();
        let config_a = PublishConfigBuilder::new().with_id(1).with_strategy(1).build();
        let config_b = PublishConfigBuilder::new().with_id(2).with_strategy(1).build();
        let resolver = resolver_with(
            vec![config_a.clone(), config_b.clone()],
            vec![strategy],
            vec![group],
        );

        let first_a = resolver.resolve(&config_a, Utc::now()).await.unwrap();
        let second_a = resolver.resolve(&config_a, Utc::now()).await.unwrap();
        // B的游标独立，仍从环起点开始
        let first_b = resolver.resolve(&config_b, Utc::now()).await.unwrap();

        assert_ne!(
            first_a.accounts[0].member.account_id,
            second_a.accounts[0].member.account_id
        );
        assert_eq!(
            first_a.accounts[0].member.account_id,
            first_b.accounts[0].member.account_id
        );
    }

    #[tokio::test]
    async fn test_ab_test_assignment_is_stable() {
        let group = GroupBuilder::new().with_plain_members(8).build();
        let strategy = StrategyBuilder::new().ab_test("views").build();
        let config = PublishConfigBuilder::new().with_strategy(1).build();
        let resolver = resolver_with(vec![config.clone()], vec![strategy], vec![group]);

        let first = resolver.resolve(&config, Utc::now()).await.unwrap();
        let second = resolver.resolve(&config, Utc::now()).await.unwrap();

        assert_eq!(first.accounts.len(), 8);
        for (a, b) in first.accounts.iter().zip(second.accounts.iter()) {
            assert_eq!(a.member.account_id, b.member.account_id);
            assert_eq!(a.variant, b.variant);
            assert!(a.variant.is_some());
        }
    }

    #[tokio::test]
    async fn test_weighted_sampling_is_reproducible_with_seed() {
        let group = GroupBuilder::new().with_plain_members(6).build();
        let mut weights = BTreeMap::new();
        weights.insert("acct_1".to_string(), 10.0);
        weights.insert("acct_2".to_string(), 0.1);
        let strategy = StrategyBuilder::new()
            .with_spec(StrategySpec::Weighted {
                weights,
                sample_size: 3,
            })
            .build();
        let config = PublishConfigBuilder::new().with_strategy(1).build();

        let pick = |seed: u64| {
            let group = group.clone();
            let strategy = strategy.clone();
            let config = config.clone();
            async move {
                let resolver = resolver_with(vec![config.clone()], vec![strategy], vec![group])
                    .with_seed(seed);
                let resolved = resolver.resolve(&config, Utc::now()).await.unwrap();
                resolved
                    .accounts
                    .iter()
                    .map(|a| a.member.account_id.clone())
                    .collect::<Vec<_>>()
            }
        };

        let first = pick(42).await;
        let second = pick(42).await;

        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        // 无放回：没有重复账号
        let mut unique = first.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test]
    async fn test_random_sampling_without_replacement() {
        let group = GroupBuilder::new().with_plain_members(4).build();
        let strategy = StrategyBuilder::new()
            .with_spec(StrategySpec::Random { sample_size: 4 })
            .build();
        let config = PublishConfigBuilder::new().with_strategy(1).build();
        let resolver =
            resolver_with(vec![config.clone()], vec![strategy], vec![group]).with_seed(13);

        let resolved = resolver.resolve(&config, Utc::now()).await.unwrap();
        let mut ids: Vec<String> = resolved
            .accounts
            .iter()
            .map(|a| a.member.account_id.clone())
            .collect();
        assert_eq!(ids.len(), 4);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[tokio::test]
    async fn test_expired_strategy_degrades_to_no_strategy() {
        let now = Utc::now();
        let group = GroupBuilder::new().with_plain_members(2).build();
        let strategy = StrategyBuilder::new()
            .ab_test("views")
            .with_validity(None, Some(now - chrono::Duration::hours(1)))
            .build();
        let config = PublishConfigBuilder::new().with_strategy(1).build();
        let resolver = resolver_with(vec![config.clone()], vec![strategy], vec![group]);

        let resolved = resolver.resolve(&config, now).await.unwrap();
        assert!(resolved.strategy_id.is_none());
        assert_eq!(resolved.accounts.len(), 2);
        assert!(resolved.accounts.iter().all(|a| a.variant.is_none()));
    }

    #[tokio::test]
    async fn test_missing_strategy_is_an_error() {
        let group = GroupBuilder::new().with_plain_members(2).build();
        let config = PublishConfigBuilder::new().with_strategy(99).build();
        let resolver = resolver_with(vec![config.clone()], vec![], vec![group]);

        let result = resolver.resolve(&config, Utc::now()).await;
        assert!(matches!(
            result,
            Err(PublisherError::StrategyNotFound { id: 99 })
        ));
    }

    #[test]
    fn test_fnv1a64_known_values() {
        // 参考向量：空串与单字符"a"
        assert_eq!(fnv1a64(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a64("a"), 0xaf63_dc4c_8601_ec8c);
        assert_ne!(fnv1a64("acct_1:1"), fnv1a64("acct_2:1"));
    }
}
