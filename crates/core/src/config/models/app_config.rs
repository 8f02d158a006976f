use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    broker::BrokerConfig, observability::ObservabilityConfig, queues::QueueTopologyConfig,
    renderer::RendererConfig,
};

/// 环境变量前缀，例如 `KAGAMI_BROKER__HOST`
pub const ENV_PREFIX: &str = "KAGAMI";

/// 不带前缀的旧环境变量名及其对应的配置键，优先级低于 `KAGAMI_` 变量
const LEGACY_BROKER_VARS: [(&str, &str); 4] = [
    ("HOST", "BROKER__HOST"),
    ("PORT", "BROKER__PORT"),
    ("ACCOUNT", "BROKER__ACCOUNT"),
    ("PASSWORD", "BROKER__PASSWORD"),
];

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/kagami.toml",
    "kagami.toml",
    "/etc/kagami/config.toml",
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub queues: QueueTopologyConfig,
    pub renderer: RendererConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 依次合并：配置文件（若存在）、旧环境变量 `HOST`/`PORT`/`ACCOUNT`/`PASSWORD`、
    /// `KAGAMI_` 环境变量；未出现的字段使用默认值
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let legacy = Self::legacy_environment(|name| std::env::var(name).ok());
        Self::load_with_env(config_path, legacy, Self::environment())
    }

    /// 把旧变量名翻译成 `KAGAMI_BROKER__*` 形式，作为单独的低优先级来源
    fn legacy_environment(lookup: impl Fn(&str) -> Option<String>) -> Environment {
        let source: config::Map<String, String> = LEGACY_BROKER_VARS
            .iter()
            .filter_map(|(legacy, key)| {
                lookup(legacy)
                    .filter(|value| !value.is_empty())
                    .map(|value| (format!("{ENV_PREFIX}_{key}"), value))
            })
            .collect();
        Self::environment().source(Some(source))
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn load_with_env(
        config_path: Option<&str>,
        legacy: Environment,
        env: Environment,
    ) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        let config: AppConfig = builder
            .add_source(legacy)
            .add_source(env)
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.broker.validate().context("RabbitMQ配置验证失败")?;
        self.queues.validate().context("队列配置验证失败")?;
        self.renderer.validate().context("渲染器配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;
        Ok(())
    }
}
