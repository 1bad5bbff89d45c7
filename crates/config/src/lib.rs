//! 统一配置中心
//!
//! 加载顺序：内置默认值 -> 可选配置文件（`APP_CONFIG_FILE`）-> `APP_` 前缀的环境变量，
//! 嵌套字段用 `__` 分隔，例如 `APP_BROKER__REDIS_URL`。

use domain::ChatPolicy;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("配置加载失败: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("配置校验失败: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
}

/// 数据库配置，未设置 url 时使用内存仓储
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[validate(url)]
    pub url: Option<String>,
    #[validate(range(min = 1))]
    pub max_connections: u32,
}

/// 事件总线配置，未设置 redis_url 时使用进程内总线
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BrokerConfig {
    #[validate(url)]
    pub redis_url: Option<String>,
    #[validate(length(min = 1))]
    pub stream_prefix: String,
    #[validate(range(min = 1))]
    pub publish_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub max_stream_len: usize,
    #[validate(length(min = 1))]
    pub consumer_group: String,
    #[validate(length(min = 1))]
    pub consumer_name: String,
    #[validate(range(min = 1))]
    pub prefetch: usize,
    #[validate(range(min = 1))]
    pub block_ms: u64,
    #[validate(range(min = 1))]
    pub handler_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub reclaim_idle_ms: u64,
    #[validate(range(min = 1))]
    pub max_deliveries: u64,
}

/// 聊天规则
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChatConfig {
    #[validate(range(min = 1))]
    pub max_content_chars: usize,
    #[validate(range(min = 1))]
    pub max_messages_per_conversation: usize,
    #[validate(range(min = 2))]
    pub max_participants: usize,
    #[validate(range(min = 1))]
    pub rate_limit_messages: u32,
    #[validate(range(min = 1))]
    pub rate_limit_window_secs: u64,
    pub edit_window_secs: u64,
    pub content_guard: bool,
}

/// 发布重试
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PublishRetryConfig {
    #[validate(range(min = 1))]
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub broker: BrokerConfig,
    #[validate(nested)]
    pub chat: ChatConfig,
    #[validate(nested)]
    pub publish_retry: PublishRetryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let policy = ChatPolicy::default();
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
            },
            broker: BrokerConfig {
                redis_url: None,
                stream_prefix: "matchchat".into(),
                publish_timeout_ms: 2_000,
                max_stream_len: 100_000,
                consumer_group: "notification-service".into(),
                consumer_name: "notification-1".into(),
                prefetch: 50,
                block_ms: 1_000,
                handler_timeout_ms: 5_000,
                reclaim_idle_ms: 30_000,
                max_deliveries: 5,
            },
            chat: ChatConfig {
                max_content_chars: policy.max_content_chars,
                max_messages_per_conversation: policy.max_messages_per_conversation,
                max_participants: policy.max_participants,
                rate_limit_messages: policy.rate_limit_messages,
                rate_limit_window_secs: policy.rate_limit_window_secs,
                edit_window_secs: policy.edit_window_secs,
                content_guard: policy.content_guard,
            },
            publish_retry: PublishRetryConfig {
                max_attempts: 3,
                base_delay_ms: 100,
            },
        }
    }
}

impl AppConfig {
    /// 默认值 -> 可选文件 -> 环境变量
    pub fn figment() -> Figment {
        let mut fig = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig.merge(Env::prefixed("APP_").split("__"))
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let cfg: AppConfig = figment.extract().map_err(Box::new)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn chat_policy(&self) -> ChatPolicy {
        ChatPolicy {
            max_content_chars: self.chat.max_content_chars,
            max_messages_per_conversation: self.chat.max_messages_per_conversation,
            max_participants: self.chat.max_participants,
            rate_limit_messages: self.chat.rate_limit_messages,
            rate_limit_window_secs: self.chat.rate_limit_window_secs,
            edit_window_secs: self.chat.edit_window_secs,
            content_guard: self.chat.content_guard,
        }
    }

    /// 日志用的脱敏表示
    pub fn sanitize(&self) -> String {
        let mut clone = self.clone();
        if clone.database.url.is_some() {
            clone.database.url = Some("[REDACTED]".into());
        }
        if clone.broker.redis_url.is_some() {
            clone.broker.redis_url = Some("[REDACTED]".into());
        }
        format!("{:?}", clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.chat_policy(), ChatPolicy::default());
        assert!(cfg.database.url.is_none());
        assert!(cfg.broker.redis_url.is_none());
    }

    #[test]
    fn test_env_overrides_file_and_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "app.toml",
                r#"
                [server]
                port = 9000

                [chat]
                rate_limit_messages = 20
                "#,
            )?;
            jail.set_env("APP_CONFIG_FILE", "app.toml");
            jail.set_env("APP_SERVER__PORT", "9100");
            jail.set_env("APP_BROKER__REDIS_URL", "redis://127.0.0.1:6379");

            let cfg = AppConfig::load().expect("config");
            assert_eq!(cfg.server.port, 9100);
            assert_eq!(cfg.chat.rate_limit_messages, 20);
            assert_eq!(cfg.broker.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));
            assert_eq!(cfg.broker.prefetch, 50);
            Ok(())
        });
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("APP_BROKER__PREFETCH", "0");
            assert!(matches!(AppConfig::load(), Err(ConfigError::Invalid(_))));

            jail.set_env("APP_BROKER__PREFETCH", "10");
            jail.set_env("APP_CHAT__RATE_LIMIT_WINDOW_SECS", "0");
            assert!(matches!(AppConfig::load(), Err(ConfigError::Invalid(_))));
            Ok(())
        });
    }

    #[test]
    fn test_sanitize_hides_urls() {
        let mut cfg = AppConfig::default();
        cfg.database.url = Some("postgres://user:secret@db/app".into());
        assert!(!cfg.sanitize().contains("secret"));
    }
}
