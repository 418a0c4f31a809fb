use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{PerformanceMetrics, PublishTask, TaskStatus};

/// 批次汇总
///
/// 由成员任务按需推导，不独立落库。指标汇总只计入COMPLETED任务，
/// 其余状态只参与状态计数。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub config_id: i64,
    pub created_at: DateTime<Utc>,
    pub task_ids: Vec<Uuid>,
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub metrics: PerformanceMetrics,
}

impl BatchSummary {
    pub fn from_tasks(batch_id: Uuid, tasks: &[PublishTask]) -> Option<Self> {
        let first = tasks.first()?;
        let mut summary = BatchSummary {
            batch_id,
            config_id: first.config_id,
            created_at: tasks.iter().map(|t| t.created_at).min()?,
            task_ids: Vec::with_capacity(tasks.len()),
            total: tasks.len(),
            pending: 0,
            running: 0,
            succeeded: 0,
            failed: 0,
            metrics: PerformanceMetrics::default(),
        };

        for task in tasks {
            summary.task_ids.push(task.id);
            match task.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Completed => {
                    summary.succeeded += 1;
                    if let Some(metrics) = &task.metrics {
                        summary.metrics.merge_sum(metrics);
                    }
                }
                TaskStatus::Failed => summary.failed += 1,
            }
        }
        Some(summary)
    }

    pub fn is_complete(&self) -> bool {
        self.pending == 0 && self.running == 0
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.total as f64 * 100.0
    }
}
