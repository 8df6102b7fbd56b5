//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// 单次拉取的默认最大消息数
pub const DEFAULT_MAX_MESSAGES: u32 = 1000;

/// Pub/Sub 订阅配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    /// 完整订阅名：projects/{project}/subscriptions/{subscription}
    pub subscription: String,
    /// REST 端点，本地模拟器可改为 http://localhost:8085
    pub endpoint: String,
    pub max_messages: u32,
    pub request_timeout_seconds: u64,
    /// 预先签发的 OAuth access token，为空时不带 Authorization 头
    pub access_token: Option<String>,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            subscription: String::new(),
            endpoint: "https://pubsub.googleapis.com".to_string(),
            max_messages: DEFAULT_MAX_MESSAGES,
            request_timeout_seconds: 30,
            access_token: None,
        }
    }
}

/// 邮件投递配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub from_address: String,
    /// 未在 action.subject 中指定主题时使用，支持 {policy} {account} {region} 占位符
    pub default_subject: String,
    /// resource-owner 收件人解析时依次查找的标签名
    pub contact_tags: Vec<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from_address: "noreply@example.com".to_string(),
            default_subject: "Policy notification - {policy}".to_string(),
            contact_tags: vec!["OwnerContact".to_string(), "owner".to_string()],
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
    /// OTLP 端点，为空时不导出分布式追踪
    pub tracing_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_port: 9090,
            tracing_endpoint: None,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub pubsub: PubSubConfig,
    pub mail: MailConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（MAILER_ 前缀，层级用双下划线，如 MAILER_PUBSUB__SUBSCRIPTION -> pubsub.subscription）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("MAILER_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            // 字段名本身含下划线（max_messages），层级分隔改用双下划线
            .add_source(
                Environment::with_prefix("MAILER")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("mail.contact_tags")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
