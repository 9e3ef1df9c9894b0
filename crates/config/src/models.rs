use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub remote: RemoteExecutorConfig,
    pub api: ApiConfig,
    pub housekeeping: HousekeepingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_seconds: u64,
    /// 写确认级别，对应 Postgres 的 synchronous_commit
    pub synchronous_commit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 队列排空周期
    pub queue_drain_interval_seconds: u64,
    /// 远程作业轮询周期
    pub remote_poll_interval_seconds: u64,
    pub housekeeping_interval_seconds: u64,
    /// 单条记录保留的最大日志行数，超出后最旧的行被丢弃
    pub max_log_lines: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteExecutorConfig {
    /// 远程执行器基础地址，空字符串表示没有远程执行器
    pub base_url: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HousekeepingConfig {
    /// FINISHED 记录的保留天数
    pub retention_days: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/jobstore".to_string(),
                max_connections: 10,
                connect_timeout_seconds: 30,
                synchronous_commit: true,
            },
            scheduler: SchedulerConfig {
                queue_drain_interval_seconds: 10,
                remote_poll_interval_seconds: 10,
                housekeeping_interval_seconds: 60,
                max_log_lines: 100,
            },
            remote: RemoteExecutorConfig {
                base_url: String::new(),
                connect_timeout_ms: 5_000,
                read_timeout_ms: 20_000,
            },
            api: ApiConfig {
                enabled: true,
                bind_address: "0.0.0.0:8080".to_string(),
            },
            housekeeping: HousekeepingConfig { retention_days: 7 },
        }
    }
}

impl AppConfig {
    /// 加载配置：TOML 文件叠加 JOBSTORE_ 前缀的环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            for path in ["config/jobstore.toml", "jobstore.toml"] {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        let defaults = ConfigBuilder::try_from(&AppConfig::default())
            .context("无法序列化默认配置")?;

        let config = ConfigBuilder::builder()
            .add_source(defaults)
            .add_source(builder.build().context("读取配置文件失败")?)
            .add_source(
                Environment::with_prefix("JOBSTORE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("合并配置源失败")?;

        let app_config: AppConfig = config.try_deserialize().context("配置反序列化失败")?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(anyhow::anyhow!("database.url 不能为空"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("database.max_connections 必须大于 0"));
        }
        if self.scheduler.max_log_lines == 0 {
            return Err(anyhow::anyhow!("scheduler.max_log_lines 必须大于 0"));
        }
        if self.housekeeping.retention_days <= 0 {
            return Err(anyhow::anyhow!("housekeeping.retention_days 必须大于 0"));
        }
        if self.api.enabled && self.api.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "api.bind_address 不是合法的监听地址: {}",
                self.api.bind_address
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.max_log_lines, 100);
        assert_eq!(config.remote.connect_timeout_ms, 5_000);
        assert_eq!(config.remote.read_timeout_ms, 20_000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.api.bind_address = "nonsense".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.housekeeping.retention_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        assert!(AppConfig::load(Some("/definitely/not/there.toml")).is_err());
    }
}
