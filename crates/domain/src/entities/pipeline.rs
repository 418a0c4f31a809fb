use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use publisher_core::{PublisherError, PublisherResult};

/// 流水线定义
///
/// 由外部系统注册的可执行单元，声明参数模式与支持的发布目标。
/// 调度器只读消费，被活跃配置引用且存在运行中任务时不可变更。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    pub schema: ParamSchema,
    pub supported_targets: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pipeline {
    pub fn supports_target(&self, target: &str) -> bool {
        self.supported_targets.iter().any(|t| t == target)
    }
}

/// 流水线参数模式：字段名到字段规格的映射
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamSchema {
    pub fields: BTreeMap<String, ParamSpec>,
}

/// 单个参数的规格约束
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    /// 数值下界，仅对Number生效
    #[serde(default)]
    pub min: Option<f64>,
    /// 数值上界，仅对Number生效
    #[serde(default)]
    pub max: Option<f64>,
    /// 枚举约束：取值必须是其中之一
    #[serde(default)]
    pub one_of: Option<Vec<Value>>,
}

impl ParamSpec {
    pub fn new(param_type: ParamType) -> Self {
        Self {
            param_type,
            required: false,
            default: None,
            min: None,
            max: None,
            one_of: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_one_of(mut self, values: Vec<Value>) -> Self {
        self.one_of = Some(values);
        self
    }
}

/// 参数类型，支持递归的数组与对象
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Array { item: Box<ParamType> },
    Object { fields: BTreeMap<String, ParamSpec> },
}

impl ParamSchema {
    /// 合并存储值与模式默认值并校验
    ///
    /// # 参数
    /// - `stored`: 发布配置中保存的参数对象
    ///
    /// # 返回值
    /// 完整的参数对象：缺失字段用默认值补齐，所有值通过递归校验
    ///
    /// # 错误
    /// - 必填字段缺失且无默认值
    /// - 类型不匹配、越界、不在枚举范围内
    /// - 出现模式未声明的字段
    pub fn resolve(&self, stored: &Value) -> PublisherResult<Value> {
        let provided = match stored {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(validation_error(
                    "$",
                    &format!("参数必须是对象, 实际为 {}", type_name(other)),
                ))
            }
        };
        resolve_object(&self.fields, &provided, "$")
    }
}

fn resolve_object(
    fields: &BTreeMap<String, ParamSpec>,
    provided: &serde_json::Map<String, Value>,
    path: &str,
) -> PublisherResult<Value> {
    for key in provided.keys() {
        if !fields.contains_key(key) {
            return Err(validation_error(
                &format!("{path}.{key}"),
                "模式未声明该字段",
            ));
        }
    }

    let mut resolved = serde_json::Map::new();
    for (name, spec) in fields {
        let field_path = format!("{path}.{name}");
        let value = match provided.get(name) {
            Some(v) => Some(v.clone()),
            None => spec.default.clone(),
        };
        match value {
            Some(v) => {
                let checked = validate_value(spec, &v, &field_path)?;
                resolved.insert(name.clone(), checked);
            }
            None if spec.required => {
                return Err(validation_error(&field_path, "缺少必填字段"));
            }
            None => {}
        }
    }
    Ok(Value::Object(resolved))
}

fn validate_value(spec: &ParamSpec, value: &Value, path: &str) -> PublisherResult<Value> {
    if let Some(one_of) = &spec.one_of {
        if !one_of.contains(value) {
            return Err(validation_error(path, "取值不在枚举范围内"));
        }
    }
    validate_type(&spec.param_type, spec, value, path)
}

fn validate_type(
    param_type: &ParamType,
    spec: &ParamSpec,
    value: &Value,
    path: &str,
) -> PublisherResult<Value> {
    match param_type {
        ParamType::String => {
            if !value.is_string() {
                return Err(type_mismatch(path, "string", value));
            }
            Ok(value.clone())
        }
        ParamType::Number => {
            let n = value
                .as_f64()
                .ok_or_else(|| type_mismatch(path, "number", value))?;
            if let Some(min) = spec.min {
                if n < min {
                    return Err(validation_error(path, &format!("取值 {n} 小于下界 {min}")));
                }
            }
            if let Some(max) = spec.max {
                if n > max {
                    return Err(validation_error(path, &format!("取值 {n} 大于上界 {max}")));
                }
            }
            Ok(value.clone())
        }
        ParamType::Boolean => {
            if !value.is_boolean() {
                return Err(type_mismatch(path, "boolean", value));
            }
            Ok(value.clone())
        }
        ParamType::Array { item } => {
            let items = value
                .as_array()
                .ok_or_else(|| type_mismatch(path, "array", value))?;
            let item_spec = ParamSpec::new((**item).clone());
            let mut checked = Vec::with_capacity(items.len());
            for (index, element) in items.iter().enumerate() {
                let element_path = format!("{path}[{index}]");
                checked.push(validate_value(&item_spec, element, &element_path)?);
            }
            Ok(Value::Array(checked))
        }
        ParamType::Object { fields } => {
            let map = value
                .as_object()
                .ok_or_else(|| type_mismatch(path, "object", value))?;
            resolve_object(fields, map, path)
        }
    }
}

fn validation_error(field: &str, message: &str) -> PublisherError {
    PublisherError::Validation {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn type_mismatch(path: &str, expected: &str, actual: &Value) -> PublisherError {
    validation_error(
        path,
        &format!("期望类型 {expected}, 实际为 {}", type_name(actual)),
    )
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
