use crate::config::config::AppConfig;
use crate::security::ip_filter::IpAllowList;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use std::path::{Path, PathBuf};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "TRADEGATE_";

/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "TRADEGATE_CONFIG";

/// JWT 密钥最小长度
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从默认路径加载配置
    ///
    /// 搜索路径：
    /// 1. $TRADEGATE_CONFIG 或 ./tradegate.toml
    /// 2. TRADEGATE_ 前缀环境变量，嵌套字段以 `__` 分隔
    pub fn load() -> Result<AppConfig, figment::Error> {
        Self::load_from(default_config_path())
    }

    /// 从指定路径加载配置
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__").global())
            .extract()
    }

    /// 验证配置
    pub fn validate(config: &AppConfig) -> Result<(), ConfigValidationError> {
        if config.server.port == 0 {
            return Err(ConfigValidationError::InvalidPort);
        }

        let security = &config.security;
        if security.jwt_secret.is_empty() {
            return Err(ConfigValidationError::MissingJwtSecret);
        }
        if security.jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigValidationError::WeakJwtSecret(MIN_JWT_SECRET_LEN));
        }
        if security.access_token_ttl_secs == 0 || security.refresh_token_ttl_secs == 0 {
            return Err(ConfigValidationError::InvalidTtl);
        }
        if security.hash_iterations == 0 || security.hash_workers == 0 {
            return Err(ConfigValidationError::InvalidHashing);
        }

        for (route, limit) in &security.rate_limits {
            if limit.window_ms <= 0 || limit.max == 0 {
                return Err(ConfigValidationError::InvalidRateLimit(route.clone()));
            }
            if limit.block_duration_ms.is_some_and(|d| d <= 0) {
                return Err(ConfigValidationError::InvalidRateLimit(route.clone()));
            }
        }

        for (role, multiplier) in &security.role_multipliers {
            if !multiplier.is_finite() || *multiplier <= 0.0 {
                return Err(ConfigValidationError::InvalidMultiplier(role.clone()));
            }
        }

        for key in &security.api_keys {
            if key
                .rate_limit_multiplier
                .is_some_and(|m| !m.is_finite() || m <= 0.0)
            {
                return Err(ConfigValidationError::InvalidMultiplier(key.key.clone()));
            }
        }

        IpAllowList::new(&security.ip_whitelist)
            .map_err(|e| ConfigValidationError::InvalidAddress(e.to_string()))?;
        IpAllowList::new(&security.rate_limit_whitelist)
            .map_err(|e| ConfigValidationError::InvalidAddress(e.to_string()))?;

        Ok(())
    }
}

/// 配置验证错误
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigValidationError {
    #[error("服务端口无效，必须大于 0")]
    InvalidPort,

    #[error("JWT 密钥未配置")]
    MissingJwtSecret,

    #[error("JWT 密钥长度不足，至少 {0} 个字符")]
    WeakJwtSecret(usize),

    #[error("令牌有效期必须大于 0")]
    InvalidTtl,

    #[error("密码哈希迭代次数和工作线程数必须大于 0")]
    InvalidHashing,

    #[error("限流规则无效: {0}")]
    InvalidRateLimit(String),

    #[error("角色倍率必须为正数: {0}")]
    InvalidMultiplier(String),

    #[error("白名单地址无效: {0}")]
    InvalidAddress(String),
}

/// 获取默认配置文件路径
pub fn default_config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("tradegate.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::config::ApiKeySettings;
    use crate::security::rate_limit::WindowStrategy;
    use figment::Jail;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_load_file_and_env_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "tradegate.toml",
                r#"
                app_name = "desk-gate"

                [server]
                port = 9000

                [security]
                jwt_secret = "0123456789abcdef0123456789abcdef"
                ip_whitelist = ["10.0.0.0/8"]

                [security.rate_limits."/api/orders"]
                window_ms = 1000
                max = 5
                strategy = "fixed"

                [security.role_multipliers]
                trader = 1.5
                "#,
            )?;
            jail.set_env("TRADEGATE_SERVER__PORT", "9100");
            jail.set_env("TRADEGATE_SECURITY__MAX_LOGIN_ATTEMPTS", "3");

            let config = ConfigLoader::load_from("tradegate.toml")?;
            assert_eq!(config.app_name, "desk-gate");
            assert_eq!(config.server.port, 9100);
            assert_eq!(config.security.max_login_attempts, 3);
            assert_eq!(config.security.access_token_ttl_secs, 900);
            assert_eq!(config.security.ip_whitelist, vec!["10.0.0.0/8".to_string()]);

            let orders = &config.security.rate_limits["/api/orders"];
            assert_eq!(orders.max, 5);
            assert_eq!(orders.strategy, WindowStrategy::Fixed);
            assert_eq!(orders.block_duration_ms, None);
            assert_eq!(config.security.role_multipliers["trader"], 1.5);

            assert_eq!(ConfigLoader::validate(&config), Ok(()));
            Ok(())
        });
    }

    #[test]
    fn test_config_path_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env(CONFIG_PATH_ENV, "/etc/tradegate/gate.toml");
            assert_eq!(default_config_path(), PathBuf::from("/etc/tradegate/gate.toml"));
            Ok(())
        });
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = AppConfig::default();
        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigValidationError::MissingJwtSecret)
        );

        config.security.jwt_secret = "short".into();
        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigValidationError::WeakJwtSecret(MIN_JWT_SECRET_LEN))
        );

        config.security.jwt_secret = SECRET.into();
        config.security.role_multipliers.insert("viewer".into(), 0.0);
        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigValidationError::InvalidMultiplier("viewer".into()))
        );

        config.security.role_multipliers.clear();
        config.security.api_keys = vec![ApiKeySettings {
            key: "desk-1".into(),
            secret: "desk-secret".into(),
            role: "trader".into(),
            permissions: vec![],
            rate_limit_multiplier: Some(-1.0),
        }];
        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigValidationError::InvalidMultiplier("desk-1".into()))
        );

        config.security.api_keys.clear();
        config.security.ip_whitelist = vec!["not-an-address".into()];
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigValidationError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_development_config_is_valid() {
        assert_eq!(ConfigLoader::validate(&AppConfig::development()), Ok(()));
    }
}
