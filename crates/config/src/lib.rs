//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听地址
//! - 实时中继（出站队列、身份请求头）
//! - 文件传输限速
//! - 文件存储目录
//!
//! 加载顺序：内置默认值 -> `APP_CONFIG_FILE` 指定的文件 -> `APP_` 前缀的环境变量（`__` 分隔层级）。

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    /// 服务配置
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,
    /// 实时中继配置
    #[serde(default)]
    #[validate(nested)]
    pub relay: RelayConfig,
    /// 文件传输限速配置
    #[serde(default)]
    pub bandwidth: BandwidthConfig,
    /// 文件存储配置
    #[serde(default)]
    #[validate(nested)]
    pub storage: StorageConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 实时中继配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RelayConfig {
    /// 每个连接的出站事件队列容量
    #[validate(range(min = 1))]
    pub outbound_buffer: usize,
    /// 握手请求中携带用户ID的请求头
    #[validate(length(min = 1))]
    pub identity_header: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
            identity_header: "x-user-id".into(),
        }
    }
}

/// 文件传输限速配置
///
/// 速率单位为 KB/s（1 KB = 1024 字节），小于等于 0 表示不限速。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthConfig {
    pub enabled: bool,
    pub max_upload_rate_kbps: i64,
    pub max_download_rate_kbps: i64,
    /// 需要限速的路径前缀（不区分大小写）
    pub target_path_prefixes: Vec<String>,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_upload_rate_kbps: 100,
            max_download_rate_kbps: 100,
            target_path_prefixes: vec!["/api/files/".into()],
        }
    }
}

impl BandwidthConfig {
    /// 不限速的配置
    pub fn unlimited() -> Self {
        Self {
            enabled: false,
            max_upload_rate_kbps: 0,
            max_download_rate_kbps: 0,
            target_path_prefixes: Vec::new(),
        }
    }
}

/// 文件存储配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    #[validate(length(min = 1))]
    pub upload_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: "uploads".into(),
        }
    }
}

impl AppConfig {
    /// 按默认值 -> 配置文件 -> 环境变量的顺序加载并验证
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            figment = Self::merge_file(figment, &path);
        }
        Self::extract(figment.merge(Env::prefixed("APP_").split("__")))
    }

    /// 从指定文件加载（不读取环境变量）
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(AppConfig::default()));
        Self::extract(Self::merge_file(figment, path))
    }

    fn merge_file(figment: Figment, path: &str) -> Figment {
        if path.ends_with(".yml") || path.ends_with(".yaml") {
            figment.merge(Yaml::file(path))
        } else if path.ends_with(".json") {
            figment.merge(Json::file(path))
        } else {
            figment.merge(Toml::file(path))
        }
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置解析失败: {0}")]
    Parse(#[from] Box<figment::Error>),
    #[error("配置验证失败: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}
