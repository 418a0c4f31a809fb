//! Test data builders for creating test entities
//!
//! This module provides builder patterns for creating test data with
//! sensible defaults and easy customization.

use chrono::{DateTime, NaiveTime, Utc};
use publisher_domain::entities::{
    AccountGroup, AccountRole, GroupMember, PacingPlan, ParamSchema, PerformanceMetrics, Pipeline,
    PublishConfig, PublishTask, Strategy, StrategySpec, TaskStatus, TriggerConfig,
};
use uuid::Uuid;

/// Builder for creating test Pipeline entities
pub struct PipelineBuilder {
    pipeline: Pipeline,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            pipeline: Pipeline {
                id: "video_publish".to_string(),
                name: "test_pipeline".to_string(),
                schema: ParamSchema::default(),
                supported_targets: vec!["feed".to_string()],
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.pipeline.id = id.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.pipeline.name = name.to_string();
        self
    }

    pub fn with_schema(mut self, schema: ParamSchema) -> Self {
        self.pipeline.schema = schema;
        self
    }

    pub fn with_targets(mut self, targets: Vec<&str>) -> Self {
        self.pipeline.supported_targets = targets.into_iter().map(String::from).collect();
        self
    }

    pub fn build(self) -> Pipeline {
        self.pipeline
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test PublishConfig entities
pub struct PublishConfigBuilder {
    config: PublishConfig,
}

impl PublishConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PublishConfig {
                id: 1,
                name: "test_config".to_string(),
                pipeline_id: "video_publish".to_string(),
                group_id: 1,
                strategy_id: None,
                trigger: TriggerConfig::Daily {
                    at: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                },
                parameters: serde_json::json!({}),
                target: None,
                content_id: None,
                pacing: None,
                priority: 50,
                active: true,
                timezone: "+00:00".to_string(),
                last_fired_at: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.config.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.config.name = name.to_string();
        self
    }

    pub fn with_pipeline(mut self, pipeline_id: &str) -> Self {
        self.config.pipeline_id = pipeline_id.to_string();
        self
    }

    pub fn with_group(mut self, group_id: i64) -> Self {
        self.config.group_id = group_id;
        self
    }

    pub fn with_strategy(mut self, strategy_id: i64) -> Self {
        self.config.strategy_id = Some(strategy_id);
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerConfig) -> Self {
        self.config.trigger = trigger;
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.config.parameters = parameters;
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.config.target = Some(target.to_string());
        self
    }

    pub fn with_content(mut self, content_id: &str) -> Self {
        self.config.content_id = Some(content_id.to_string());
        self
    }

    pub fn with_pacing(mut self, pacing: PacingPlan) -> Self {
        self.config.pacing = Some(pacing);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.config.priority = priority;
        self
    }

    pub fn with_timezone(mut self, timezone: &str) -> Self {
        self.config.timezone = timezone.to_string();
        self
    }

    pub fn with_last_fired(mut self, fired_at: DateTime<Utc>) -> Self {
        self.config.last_fired_at = Some(fired_at);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.config.created_at = created_at;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.config.active = false;
        self
    }

    pub fn build(self) -> PublishConfig {
        self.config
    }
}

impl Default for PublishConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test PublishTask entities
///
/// The isolation key defaults to `account:pipeline:task_id` matching the
/// dispatcher's derivation, but can be overridden for lock contention tests.
pub struct TaskBuilder {
    task: PublishTask,
    isolation_key: Option<String>,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: PublishTask {
                id: Uuid::new_v4(),
                config_id: 1,
                group_id: 1,
                account_id: "acct_1".to_string(),
                pipeline_id: "video_publish".to_string(),
                strategy_id: None,
                parameters: serde_json::json!({}),
                variant: None,
                status: TaskStatus::Pending,
                failure_reason: None,
                error_message: None,
                retry_count: 0,
                isolation_key: String::new(),
                batch_id: Uuid::new_v4(),
                slot_id: None,
                earliest_start_at: None,
                metrics: None,
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
            },
            isolation_key: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_config(mut self, config_id: i64) -> Self {
        self.task.config_id = config_id;
        self
    }

    pub fn with_account(mut self, account_id: &str) -> Self {
        self.task.account_id = account_id.to_string();
        self
    }

    pub fn with_pipeline(mut self, pipeline_id: &str) -> Self {
        self.task.pipeline_id = pipeline_id.to_string();
        self
    }

    pub fn with_strategy(mut self, strategy_id: i64) -> Self {
        self.task.strategy_id = Some(strategy_id);
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.task.parameters = parameters;
        self
    }

    pub fn with_variant(mut self, variant: &str) -> Self {
        self.task.variant = Some(variant.to_string());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_retry_count(mut self, retry_count: i32) -> Self {
        self.task.retry_count = retry_count;
        self
    }

    pub fn with_isolation_key(mut self, key: &str) -> Self {
        self.isolation_key = Some(key.to_string());
        self
    }

    pub fn with_batch(mut self, batch_id: Uuid) -> Self {
        self.task.batch_id = batch_id;
        self
    }

    pub fn with_metrics(mut self, metrics: PerformanceMetrics) -> Self {
        self.task.metrics = Some(metrics);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.task.created_at = created_at;
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.task.started_at = Some(started_at);
        self
    }

    /// Shortcut for a completed task carrying a single observed metric value.
    pub fn completed_with_metric(mut self, metric: &str, value: f64) -> Self {
        let mut metrics = PerformanceMetrics::default();
        match metric {
            "views" => metrics.views = value as u64,
            "likes" => metrics.likes = value as u64,
            "comments" => metrics.comments = value as u64,
            "shares" => metrics.shares = value as u64,
            "watch_time_seconds" => metrics.watch_time_seconds = value,
            other => {
                metrics.extra.insert(other.to_string(), value);
            }
        }
        self.task.status = TaskStatus::Completed;
        self.task.metrics = Some(metrics);
        self.task.finished_at = Some(Utc::now());
        self
    }

    pub fn build(self) -> PublishTask {
        let mut task = self.task;
        task.isolation_key = self.isolation_key.unwrap_or_else(|| {
            format!("{}:{}:{}", task.account_id, task.pipeline_id, task.id)
        });
        task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Strategy entities
pub struct StrategyBuilder {
    strategy: Strategy,
}

impl StrategyBuilder {
    pub fn new() -> Self {
        Self {
            strategy: Strategy {
                id: 1,
                name: "test_strategy".to_string(),
                spec: StrategySpec::RoundRobin { batch_size: 1 },
                valid_from: None,
                valid_until: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.strategy.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.strategy.name = name.to_string();
        self
    }

    pub fn with_spec(mut self, spec: StrategySpec) -> Self {
        self.strategy.spec = spec;
        self
    }

    pub fn with_validity(
        mut self,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.strategy.valid_from = from;
        self.strategy.valid_until = until;
        self
    }

    /// Shortcut for a two-variant A/B strategy evaluated on the given metric.
    pub fn ab_test(mut self, metric: &str) -> Self {
        self.strategy.spec = StrategySpec::AbTest {
            variants: vec!["control".to_string(), "experiment".to_string()],
            metric: metric.to_string(),
        };
        self
    }

    pub fn build(self) -> Strategy {
        self.strategy
    }
}

impl Default for StrategyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test AccountGroup entities
pub struct GroupBuilder {
    group: AccountGroup,
}

impl GroupBuilder {
    pub fn new() -> Self {
        Self {
            group: AccountGroup {
                id: 1,
                name: "test_group".to_string(),
                members: vec![],
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.group.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.group.name = name.to_string();
        self
    }

    pub fn with_member(mut self, account_id: &str, role: AccountRole, active: bool) -> Self {
        self.group.members.push(GroupMember {
            account_id: account_id.to_string(),
            role,
            active,
        });
        self
    }

    /// Adds `count` active plain members named `acct_1` .. `acct_count`.
    pub fn with_plain_members(mut self, count: usize) -> Self {
        for i in 1..=count {
            self.group.members.push(GroupMember {
                account_id: format!("acct_{i}"),
                role: AccountRole::Member,
                active: true,
            });
        }
        self
    }

    pub fn build(self) -> AccountGroup {
        self.group
    }
}

impl Default for GroupBuilder {
    fn default() -> Self {
        Self::new()
    }
}
