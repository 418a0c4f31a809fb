use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::config::models::AppConfig;
use crate::errors::{PublisherError, PublisherResult};

/// 加载应用配置
///
/// 分层覆盖顺序：内置默认值 < TOML配置文件 < `PUBLISHER_` 前缀环境变量。
/// 显式指定的配置文件不存在时直接报错，避免静默回退到默认值。
pub fn load_config(config_path: Option<&str>) -> PublisherResult<AppConfig> {
    let defaults = ConfigBuilder::try_from(&AppConfig::default())
        .map_err(|e| PublisherError::Configuration(format!("构建默认配置失败: {e}")))?;

    let mut builder = ConfigBuilder::builder().add_source(defaults);

    if let Some(path) = config_path {
        if !Path::new(path).exists() {
            return Err(PublisherError::Configuration(format!(
                "配置文件不存在: {path}"
            )));
        }
        builder = builder.add_source(File::new(path, FileFormat::Toml));
    } else {
        for path in ["config/publisher.toml", "publisher.toml"] {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
                break;
            }
        }
    }

    let config: AppConfig = builder
        .add_source(Environment::with_prefix("PUBLISHER").separator("__"))
        .build()
        .map_err(|e| PublisherError::Configuration(format!("合并配置源失败: {e}")))?
        .try_deserialize()
        .map_err(|e| PublisherError::Configuration(format!("反序列化配置失败: {e}")))?;

    config.validate()?;
    Ok(config)
}
