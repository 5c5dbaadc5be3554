//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DEVPILOT__*` 覆盖（双下划线表示嵌套，
//! 如 `DEVPILOT__AI__API_KEY=xxx`）。所有键都有默认值，文件缺失时可直接运行。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub ai: AiSection,
    #[serde(default)]
    pub connection: ConnectionSection,
}

/// [app] 段：日志级别、启动时选中的设备
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// tracing 过滤指令（可被 RUST_LOG 覆盖）
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 启动时选中的设备 ID
    pub selected_device: Option<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            log_level: default_log_level(),
            selected_device: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// [ai] 段：聊天补全服务的凭证与端点
#[derive(Debug, Clone, Deserialize)]
pub struct AiSection {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            model: default_model(),
        }
    }
}

impl AiSection {
    /// 凭证可用性检查：非空且超过 10 个字符
    pub fn is_valid_api_key(&self) -> bool {
        !self.api_key.is_empty() && self.api_key.chars().count() > 10
    }
}

fn default_provider() -> String {
    "zhipu".to_string()
}

fn default_endpoint() -> String {
    "https://open.bigmodel.cn/api/paas/v4".to_string()
}

fn default_model() -> String {
    "glm-4".to_string()
}

/// [connection] 段：控制面 WebSocket 链路参数
///
/// `reconnect_attempts` 目前只是配置项，重连循环不消费它（无上限重连）。
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionSection {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// 心跳间隔（毫秒）
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// 重连尝试上限（读取但未强制执行）
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    /// 重连前的固定等待（毫秒）
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

impl ConnectionSection {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

fn default_ws_url() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_interval_ms() -> u64 {
    5_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            ai: AiSection::default(),
            connection: ConnectionSection::default(),
        }
    }
}

/// 遮蔽 API Key 用于日志输出：保留首尾各 4 个字符，中间用 **** 代替
///
/// 按字符而不是字节处理，多字节凭证不会切在字符边界内
pub fn mask_api_key(key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }
    let len = key.chars().count();
    if len <= 8 {
        return "****".to_string();
    }
    let head: String = key.chars().take(4).collect();
    let tail: String = key.chars().skip(len - 4).collect();
    format!("{}****{}", head, tail)
}

/// 从 config 目录加载配置，环境变量 DEVPILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DEVPILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DEVPILOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
