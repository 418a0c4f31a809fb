use chrono::{Duration, Utc};
use uuid::Uuid;

use publisher_domain::entities::{
    AccountRole, FailureReason, ScheduleSlot, SlotStatus, TaskStatus,
};
use publisher_domain::repositories::{
    AccountGroupRegistry, ConfigRepository, PipelineRegistry, SlotRepository, StrategyRepository,
    TaskRepository,
};
use publisher_infrastructure::{
    DatabaseManager, SqliteAccountGroupRegistry, SqliteConfigRepository, SqlitePipelineRegistry,
    SqliteSlotRepository, SqliteStrategyRepository, SqliteTaskRepository,
};
use publisher_testing_utils::builders::{
    GroupBuilder, PipelineBuilder, PublishConfigBuilder, StrategyBuilder, TaskBuilder,
};

struct SqliteTestContext {
    config_repo: SqliteConfigRepository,
    task_repo: SqliteTaskRepository,
    slot_repo: SqliteSlotRepository,
    strategy_repo: SqliteStrategyRepository,
    pipelines: SqlitePipelineRegistry,
    groups: SqliteAccountGroupRegistry,
}

/// 所有仓储共享同一个内存库连接池
async fn setup() -> SqliteTestContext {
    let manager = DatabaseManager::in_memory().await.unwrap();
    let pool = manager.pool().clone();

    SqliteTestContext {
        config_repo: SqliteConfigRepository::new(pool.clone()),
        task_repo: SqliteTaskRepository::new(pool.clone()),
        slot_repo: SqliteSlotRepository::new(pool.clone()),
        strategy_repo: SqliteStrategyRepository::new(pool.clone()),
        pipelines: SqlitePipelineRegistry::new(pool.clone()),
        groups: SqliteAccountGroupRegistry::new(pool),
    }
}

#[tokio::test]
async fn test_full_publish_flow_persists_across_repositories() {
    let ctx = setup().await;

    // 注册外部维护的流水线与账号组
    ctx.pipelines
        .register(&PipelineBuilder::new().with_id("video_publish").build())
        .await
        .unwrap();
    let group = ctx
        .groups
        .register(
            &GroupBuilder::new()
                .with_member("acct_control", AccountRole::Control, true)
                .with_member("acct_experiment", AccountRole::Experiment, true)
                .build(),
        )
        .await
        .unwrap();

    // 建立策略与引用它的发布配置
    let strategy = ctx
        .strategy_repo
        .create(&StrategyBuilder::new().ab_test("views").build())
        .await
        .unwrap();
    let config = ctx
        .config_repo
        .create(
            &PublishConfigBuilder::new()
                .with_group(group.id)
                .with_strategy(strategy.id)
                .build(),
        )
        .await
        .unwrap();

    // 一次触发：两个槽位、两条同批次任务，槽位被消费
    let now = Utc::now();
    let slots = ctx
        .slot_repo
        .create_many(&[
            ScheduleSlot {
                id: 0,
                config_id: config.id,
                account_id: "acct_control".to_string(),
                scheduled_at: now,
                status: SlotStatus::Planned,
                task_id: None,
                created_at: now,
            },
            ScheduleSlot {
                id: 0,
                config_id: config.id,
                account_id: "acct_experiment".to_string(),
                scheduled_at: now + Duration::seconds(600),
                status: SlotStatus::Planned,
                task_id: None,
                created_at: now,
            },
        ])
        .await
        .unwrap();

    let batch_id = Uuid::new_v4();
    let mut task_ids = Vec::new();
    for (slot, (account, variant)) in slots.iter().zip([
        ("acct_control", "control"),
        ("acct_experiment", "experiment"),
    ]) {
        let task = ctx
            .task_repo
            .create(
                &TaskBuilder::new()
                    .with_config(config.id)
                    .with_account(account)
                    .with_strategy(strategy.id)
                    .with_variant(variant)
                    .with_batch(batch_id)
                    .build(),
            )
            .await
            .unwrap();
        ctx.slot_repo.mark_consumed(slot.id, task.id).await.unwrap();
        task_ids.push(task.id);
    }
    ctx.config_repo.record_fired(config.id, now).await.unwrap();

    // 在途视图与批次视图一致
    let in_flight = ctx.task_repo.find_in_flight_by_config(config.id).await.unwrap();
    assert_eq!(in_flight.len(), 2);
    let batch = ctx.task_repo.find_by_batch(batch_id).await.unwrap();
    assert_eq!(batch.len(), 2);

    let stored_slots = ctx.slot_repo.find_by_config(config.id).await.unwrap();
    assert!(stored_slots.iter().all(|s| s.status == SlotStatus::Consumed));
    assert_eq!(stored_slots[0].task_id, Some(task_ids[0]));

    let fired = ctx.config_repo.find_by_id(config.id).await.unwrap().unwrap();
    assert_eq!(fired.last_fired_at, Some(now));

    // 执行端回报：一个完成、一个失败
    let mut first = batch[0].clone();
    first.status = TaskStatus::Running;
    first.started_at = Some(now);
    let mut first = ctx.task_repo.update(&first).await.unwrap();
    first.status = TaskStatus::Completed;
    first.finished_at = Some(Utc::now());
    ctx.task_repo.update(&first).await.unwrap();

    let mut second = batch[1].clone();
    second.status = TaskStatus::Failed;
    second.failure_reason = Some(FailureReason::RunnerFailure);
    second.error_message = Some("上传被平台拒绝".to_string());
    second.finished_at = Some(Utc::now());
    ctx.task_repo.update(&second).await.unwrap();

    assert!(ctx
        .task_repo
        .find_in_flight_by_config(config.id)
        .await
        .unwrap()
        .is_empty());
    let completed = ctx
        .task_repo
        .find_completed_by_strategy(strategy.id)
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, first.id);
}

#[tokio::test]
async fn test_stale_running_tasks_visible_to_recovery_queries() {
    let ctx = setup().await;
    let now = Utc::now();

    ctx.task_repo
        .create(
            &TaskBuilder::new()
                .with_status(TaskStatus::Running)
                .with_started_at(now - Duration::hours(3))
                .build(),
        )
        .await
        .unwrap();
    ctx.task_repo
        .create(
            &TaskBuilder::new()
                .with_status(TaskStatus::Running)
                .with_started_at(now - Duration::minutes(1))
                .build(),
        )
        .await
        .unwrap();

    let stale = ctx
        .task_repo
        .find_running_started_before(now - Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);
    assert!(stale[0].started_at.unwrap() < now - Duration::hours(2));
}

#[tokio::test]
async fn test_rotation_cursor_survives_config_updates() {
    let ctx = setup().await;
    let mut config = ctx
        .config_repo
        .create(&PublishConfigBuilder::new().build())
        .await
        .unwrap();

    // 模拟三轮触发推进游标
    for expected in 1..=3 {
        let cursor = ctx.config_repo.load_cursor(config.id).await.unwrap();
        ctx.config_repo
            .save_cursor(config.id, cursor + 1)
            .await
            .unwrap();
        assert_eq!(
            ctx.config_repo.load_cursor(config.id).await.unwrap(),
            expected
        );
    }

    // 配置更新不影响游标
    config.priority = 99;
    ctx.config_repo.update(&config).await.unwrap();
    assert_eq!(ctx.config_repo.load_cursor(config.id).await.unwrap(), 3);

    // 删除配置后游标归零
    ctx.config_repo.delete(config.id).await.unwrap();
    assert_eq!(ctx.config_repo.load_cursor(config.id).await.unwrap(), 0);
}
