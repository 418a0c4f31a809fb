use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 外部提交的发布事件，用于驱动事件型触发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishEvent {
    pub event_type: String,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

impl PublishEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            occurred_at: Utc::now(),
        }
    }

    /// 判断事件是否命中触发条件
    ///
    /// 过滤条件是一个对象，每个键值都必须与负载中的同名字段精确相等。
    pub fn matches(&self, event_type: &str, filter: Option<&Value>) -> bool {
        if self.event_type != event_type {
            return false;
        }
        match filter {
            None => true,
            Some(Value::Object(conditions)) => conditions
                .iter()
                .all(|(key, expected)| self.payload.get(key) == Some(expected)),
            Some(_) => false,
        }
    }
}
