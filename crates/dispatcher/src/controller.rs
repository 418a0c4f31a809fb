use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use publisher_core::{DispatcherConfig, PublisherResult};
use publisher_domain::entities::{BatchSummary, PublishConfig, PublishEvent};
use publisher_domain::repositories::ConfigRepository;

use crate::dispatch::TaskDispatcher;
use crate::trigger::TriggerEngine;

/// 派发控制器
///
/// 每轮扫描评估全部活跃配置，到点的按优先级排队派发。
/// 触发时间先落库再派发，进程在两步之间崩溃时宁可漏发一次，
/// 也不会在重启后重复派发同一调度点
pub struct DispatchController {
    config_repo: Arc<dyn ConfigRepository>,
    dispatcher: Arc<TaskDispatcher>,
    trigger: TriggerEngine,
    max_concurrent_dispatches: usize,
}

impl DispatchController {
    pub fn new(
        config_repo: Arc<dyn ConfigRepository>,
        dispatcher: Arc<TaskDispatcher>,
        settings: &DispatcherConfig,
    ) -> Self {
        Self {
            config_repo,
            dispatcher,
            trigger: TriggerEngine::new(settings.missed_fire_lookback_hours),
            max_concurrent_dispatches: settings.max_concurrent_dispatches.max(1),
        }
    }

    /// 扫描活跃配置并派发到点的调度
    pub async fn scan_and_dispatch(&self) -> PublisherResult<Vec<BatchSummary>> {
        let now = Utc::now();
        let active = self.config_repo.find_active().await?;
        debug!("开始扫描，共 {} 个活跃配置", active.len());

        let mut due: Vec<(PublishConfig, chrono::DateTime<Utc>)> = Vec::new();
        for config in active {
            match self.trigger.evaluate(&config, now) {
                Ok(decision) if decision.should_fire => {
                    if let Some(occurrence) = decision.occurrence {
                        due.push((config, occurrence));
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("评估配置 {} 的触发器失败: {}", config.id, e);
                }
            }
        }

        if due.is_empty() {
            return Ok(Vec::new());
        }

        // 优先级高的先占派发名额
        due.sort_by(|a, b| b.0.priority.cmp(&a.0.priority).then(a.0.id.cmp(&b.0.id)));

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_dispatches));
        let mut handles = Vec::with_capacity(due.len());

        for (config, occurrence) in due {
            let semaphore = semaphore.clone();
            let config_repo = self.config_repo.clone();
            let dispatcher = self.dispatcher.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;

                if let Err(e) = config_repo.record_fired(config.id, occurrence).await {
                    error!("记录配置 {} 的触发时间失败，本轮跳过派发: {}", config.id, e);
                    return None;
                }
                match dispatcher.dispatch(&config, occurrence).await {
                    Ok(summary) => summary,
                    Err(e) => {
                        error!("配置 {} 派发失败: {}", config.id, e);
                        None
                    }
                }
            }));
        }

        let mut summaries = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Some(summary)) => summaries.push(summary),
                Ok(None) => {}
                Err(e) => {
                    error!("派发任务执行出错: {}", e);
                }
            }
        }

        if !summaries.is_empty() {
            info!("本轮扫描完成，共派发 {} 个批次", summaries.len());
        }
        Ok(summaries)
    }

    /// 接收外部事件并派发所有匹配的事件触发配置
    pub async fn submit_event(&self, event: &PublishEvent) -> PublisherResult<Vec<BatchSummary>> {
        info!("收到外部事件: {}", event.event_type);

        let now = Utc::now();
        let active = self.config_repo.find_active().await?;
        let mut summaries = Vec::new();

        for config in active {
            if !TriggerEngine::matches_event(&config, event) {
                continue;
            }

            if let Err(e) = self.config_repo.record_fired(config.id, now).await {
                error!("记录配置 {} 的触发时间失败，跳过本次事件: {}", config.id, e);
                continue;
            }
            match self.dispatcher.dispatch(&config, now).await {
                Ok(Some(summary)) => summaries.push(summary),
                Ok(None) => {}
                Err(e) => {
                    error!("配置 {} 的事件派发失败: {}", config.id, e);
                }
            }
        }

        if summaries.is_empty() {
            debug!("事件 {} 没有命中任何配置", event.event_type);
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use serde_json::json;

    use crate::guard::ConcurrencyGuard;
    use crate::metrics::DispatchMetrics;
    use crate::strategies::StrategyResolver;
    use publisher_core::AppConfig;
    use publisher_domain::entities::TriggerConfig;
    use publisher_testing_utils::builders::{GroupBuilder, PipelineBuilder, PublishConfigBuilder};
    use publisher_testing_utils::mocks::{
        MockAccountGroupRegistry, MockConfigRepository, MockMessageQueue, MockPipelineRegistry,
        MockSlotRepository, MockStrategyRepository, MockTaskRepository,
    };

    struct Fixture {
        controller: DispatchController,
        config_repo: Arc<MockConfigRepository>,
        task_repo: Arc<MockTaskRepository>,
    }

    fn build_fixture(configs: Vec<PublishConfig>, member_count: usize) -> Fixture {
        let app = AppConfig::default();
        let config_repo = Arc::new(MockConfigRepository::with_configs(configs));
        let task_repo = Arc::new(MockTaskRepository::new());
        let pipelines = Arc::new(MockPipelineRegistry::with_pipelines(vec![
            PipelineBuilder::new().build(),
        ]));
        let groups = Arc::new(MockAccountGroupRegistry::with_groups(vec![
            GroupBuilder::new().with_plain_members(member_count).build(),
        ]));
        let resolver = Arc::new(StrategyResolver::new(
            config_repo.clone(),
            Arc::new(MockStrategyRepository::new()),
            groups,
        ));
        let dispatcher = Arc::new(TaskDispatcher::new(
            config_repo.clone(),
            task_repo.clone(),
            Arc::new(MockSlotRepository::new()),
            pipelines,
            resolver,
            Arc::new(ConcurrencyGuard::new()),
            Arc::new(MockMessageQueue::new()),
            Arc::new(DispatchMetrics::new().unwrap()),
            app.dispatcher.clone(),
            &app.queue,
        ));
        let controller = DispatchController::new(config_repo.clone(), dispatcher, &app.dispatcher);
        Fixture {
            controller,
            config_repo,
            task_repo,
        }
    }

    fn due_daily_config(id: i64) -> PublishConfigBuilder {
        PublishConfigBuilder::new()
            .with_id(id)
            .with_trigger(TriggerConfig::Daily {
                at: NaiveTime::from_hms_opt(3, 0, 0).unwrap(),
            })
            .with_created_at(Utc::now() - chrono::Duration::days(2))
    }

    #[tokio::test]
    async fn test_due_config_fires_once_then_goes_idle() {
        let config = due_daily_config(1).build();
        let fixture = build_fixture(vec![config], 2);

        let first = fixture.controller.scan_and_dispatch().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].total, 2);
        assert_eq!(fixture.task_repo.count(), 2);

        let stored = fixture.config_repo.find_by_id(1).await.unwrap().unwrap();
        assert!(stored.last_fired_at.is_some());

        // 同一调度点不会被再次派发
        let second = fixture.controller.scan_and_dispatch().await.unwrap();
        assert!(second.is_empty());
        assert_eq!(fixture.task_repo.count(), 2);
    }

    #[tokio::test]
    async fn test_manual_and_event_configs_never_fire_on_scan() {
        let manual = PublishConfigBuilder::new()
            .with_id(1)
            .with_trigger(TriggerConfig::Manual)
            .build();
        let event = PublishConfigBuilder::new()
            .with_id(2)
            .with_trigger(TriggerConfig::Event {
                event_type: "content_ready".to_string(),
                filter: None,
            })
            .build();
        let fixture = build_fixture(vec![manual, event], 2);

        let summaries = fixture.controller.scan_and_dispatch().await.unwrap();
        assert!(summaries.is_empty());
        assert_eq!(fixture.task_repo.count(), 0);
    }

    #[tokio::test]
    async fn test_higher_priority_config_dispatches_first() {
        let low = due_daily_config(1).with_priority(10).build();
        let high = due_daily_config(2).with_priority(90).build();
        let fixture = build_fixture(vec![low, high], 1);

        let summaries = fixture.controller.scan_and_dispatch().await.unwrap();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].config_id, 2);
        assert_eq!(summaries[1].config_id, 1);
    }

    #[tokio::test]
    async fn test_broken_config_does_not_block_others() {
        let broken = due_daily_config(1).with_timezone("bogus").build();
        let healthy = due_daily_config(2).build();
        let fixture = build_fixture(vec![broken, healthy], 1);

        let summaries = fixture.controller.scan_and_dispatch().await.unwrap();

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].config_id, 2);

        // 评估失败的配置不会推进触发时间
        let stored = fixture.config_repo.find_by_id(1).await.unwrap().unwrap();
        assert!(stored.last_fired_at.is_none());
    }

    #[tokio::test]
    async fn test_event_submission_hits_matching_configs_only() {
        let matching = PublishConfigBuilder::new()
            .with_id(1)
            .with_trigger(TriggerConfig::Event {
                event_type: "content_ready".to_string(),
                filter: Some(json!({"channel": "news"})),
            })
            .build();
        let other_event = PublishConfigBuilder::new()
            .with_id(2)
            .with_trigger(TriggerConfig::Event {
                event_type: "render_done".to_string(),
                filter: None,
            })
            .build();
        let scheduled = PublishConfigBuilder::new().with_id(3).build();
        let fixture = build_fixture(vec![matching, other_event, scheduled], 2);

        let event = PublishEvent::new(
            "content_ready",
            json!({"channel": "news", "content_id": "ep-7"}),
        );
        let summaries = fixture.controller.submit_event(&event).await.unwrap();

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].config_id, 1);
        assert_eq!(summaries[0].total, 2);

        let stored = fixture.config_repo.find_by_id(1).await.unwrap().unwrap();
        assert!(stored.last_fired_at.is_some());
    }
}
