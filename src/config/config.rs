use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::security::config::SecuritySettings;

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 服务地址
    pub host: String,
    /// 服务端口
    pub port: u16,
    /// 请求超时（秒）
    pub request_timeout: u64,
    /// 最大请求体大小（字节），签名校验前整体缓冲
    pub max_body_bytes: usize,
    /// 是否信任 X-Forwarded-For（仅在反向代理之后启用）
    pub trust_forwarded_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            request_timeout: 30,
            max_body_bytes: 1024 * 1024,
            trust_forwarded_headers: false,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别，RUST_LOG 优先
    pub level: String,
    /// 结构化（JSON）日志格式
    pub structured: bool,
    /// 日志目录，设置后按天滚动写入文件
    pub log_dir: Option<PathBuf>,
    /// 日志文件名前缀
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            structured: false,
            log_dir: None,
            file_prefix: "tradegate.log".into(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 安全配置
    pub security: SecuritySettings,
    /// 日志配置
    pub logging: LoggingConfig,
    /// 应用名称
    pub app_name: String,
    /// 环境
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            security: SecuritySettings::default(),
            logging: LoggingConfig::default(),
            app_name: "tradegate".into(),
            environment: "development".into(),
        }
    }
}

impl AppConfig {
    /// 创建开发环境配置
    pub fn development() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                ..ServerConfig::default()
            },
            security: SecuritySettings::development(),
            logging: LoggingConfig {
                level: "debug".into(),
                ..LoggingConfig::default()
            },
            ..Self::default()
        }
    }

    /// 创建生产环境配置
    pub fn production() -> Self {
        Self {
            security: SecuritySettings::production(),
            logging: LoggingConfig {
                structured: true,
                log_dir: Some(PathBuf::from("./logs")),
                ..LoggingConfig::default()
            },
            environment: "production".into(),
            ..Self::default()
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}
