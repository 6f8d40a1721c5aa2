use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig, message_queue::MessageQueueConfig,
    observability::ObservabilityConfig, predictor::PredictorConfig, worker::WorkerConfig,
};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "EVENT_WORKER";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub message_queue: MessageQueueConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: EVENT_WORKER__)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/worker.toml", "worker.toml", "/etc/event-worker/config.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.message_queue
            .validate()
            .context("消息队列配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.predictor.validate().context("预测服务配置验证失败")?;
        self.observability
            .validate()
            .context("日志配置验证失败")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessageQueueType;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker.batch_size, 10);
        assert_eq!(config.worker.wait_time_seconds, 20);
        assert_eq!(config.worker.receive_backoff_seconds, 5);
        assert_eq!(config.worker.dead_letter_group, "dlq-group");
    }

    #[test]
    fn test_from_toml_with_partial_sections() {
        let toml_str = r#"
[message_queue]
type = "in_memory"
url = ""
source_queue = "events"
dead_letter_queue = "events-dlq"
consumer_group = "g"
dedup_window_seconds = 60
connection_timeout_seconds = 5

[database]
url = "memory://"
max_connections = 1
connection_timeout_seconds = 5
"#;

        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.message_queue.r#type, MessageQueueType::InMemory);
        assert_eq!(config.message_queue.source_queue, "events");
        assert_eq!(config.database.url, "memory://");
        assert_eq!(config.worker.batch_size, 10);
    }

    #[test]
    fn test_toml_roundtrip_keeps_values() {
        let mut config = AppConfig::default();
        config.worker.max_parallel_groups = 4;

        let toml_str = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.worker.max_parallel_groups, 4);
        assert_eq!(parsed.message_queue.source_queue, config.message_queue.source_queue);
    }

    #[test]
    fn test_wait_time_above_limit_is_rejected() {
        let mut config = AppConfig::default();
        config.worker.wait_time_seconds = 21;

        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("20"));
    }

    #[test]
    fn test_dead_letter_queue_must_differ_from_source() {
        let mut config = AppConfig::default();
        config.message_queue.dead_letter_queue = config.message_queue.source_queue.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unsupported_database_url_is_rejected() {
        let mut config = AppConfig::default();
        config.database.url = "mysql://localhost/db".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[worker]
batch_size = 3
wait_time_seconds = 1
receive_backoff_seconds = 1
max_parallel_groups = 2
dead_letter_group = "fallback"
shutdown_timeout_seconds = 5

[predictor]
endpoint = "http://model:9000/predict"
timeout_seconds = 10
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.worker.batch_size, 3);
        assert_eq!(config.worker.dead_letter_group, "fallback");
        assert_eq!(config.predictor.endpoint, "http://model:9000/predict");
        assert_eq!(config.database.url, AppConfig::default().database.url);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/worker.toml")).is_err());
    }
}
