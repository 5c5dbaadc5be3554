//! 运行日志存储
//!
//! 有界环形日志（默认 1000 条，满后丢最旧），承接各组件的
//! info/warn/error/debug 写入，并同步镜像为 tracing 事件。
//! 读侧（快照、过滤、导出）只供展示层使用，核心逻辑从不回读。

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// 日志类别：来自哪类动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Execute,
    Stop,
    Pause,
    AiParse,
    Connection,
    System,
}

impl LogCategory {
    fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Execute => "execute",
            LogCategory::Stop => "stop",
            LogCategory::Pause => "pause",
            LogCategory::AiParse => "ai_parse",
            LogCategory::Connection => "connection",
            LogCategory::System => "system",
        }
    }
}

/// 单条日志
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    /// 毫秒时间戳
    pub timestamp: i64,
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    pub details: Option<String>,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
}

/// 查询过滤条件，未设置的字段不参与过滤
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub device_id: Option<String>,
    pub category: Option<LogCategory>,
    pub level: Option<LogLevel>,
    /// 毫秒时间戳闭区间 (start, end)
    pub time_range: Option<(i64, i64)>,
    pub keyword: Option<String>,
}

impl LogFilter {
    fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(ref device_id) = self.device_id {
            if entry.device_id.as_deref() != Some(device_id.as_str()) {
                return false;
            }
        }
        if let Some(category) = self.category {
            if entry.category != category {
                return false;
            }
        }
        if let Some(level) = self.level {
            if entry.level != level {
                return false;
            }
        }
        if let Some((start, end)) = self.time_range {
            if entry.timestamp < start || entry.timestamp > end {
                return false;
            }
        }
        if let Some(ref keyword) = self.keyword {
            let keyword = keyword.to_lowercase();
            let in_message = entry.message.to_lowercase().contains(&keyword);
            let in_details = entry
                .details
                .as_ref()
                .map(|d| d.to_lowercase().contains(&keyword))
                .unwrap_or(false);
            if !in_message && !in_details {
                return false;
            }
        }
        true
    }
}

const DEFAULT_CAPACITY: usize = 1000;

/// 有界日志存储
pub struct Journal {
    entries: RwLock<VecDeque<LogEntry>>,
    capacity: usize,
}

impl Default for Journal {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Journal {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// 写入一条日志，返回条目 ID
    pub async fn log(
        &self,
        level: LogLevel,
        category: LogCategory,
        message: &str,
        details: Option<&str>,
        device_id: Option<&str>,
        device_name: Option<&str>,
    ) -> String {
        let entry = LogEntry {
            id: format!("log_{}", uuid::Uuid::new_v4()),
            timestamp: chrono::Utc::now().timestamp_millis(),
            level,
            category,
            message: message.to_string(),
            details: details.map(str::to_string),
            device_id: device_id.map(str::to_string),
            device_name: device_name.map(str::to_string),
        };
        let id = entry.id.clone();

        emit_trace(&entry);

        let mut entries = self.entries.write().await;
        entries.push_back(entry);
        if entries.len() > self.capacity {
            entries.pop_front();
        }
        id
    }

    pub async fn info(
        &self,
        message: &str,
        details: Option<&str>,
        device_id: Option<&str>,
        device_name: Option<&str>,
    ) -> String {
        self.log(LogLevel::Info, LogCategory::System, message, details, device_id, device_name)
            .await
    }

    pub async fn warn(
        &self,
        message: &str,
        details: Option<&str>,
        device_id: Option<&str>,
        device_name: Option<&str>,
    ) -> String {
        self.log(LogLevel::Warn, LogCategory::System, message, details, device_id, device_name)
            .await
    }

    pub async fn error(
        &self,
        message: &str,
        details: Option<&str>,
        device_id: Option<&str>,
        device_name: Option<&str>,
    ) -> String {
        self.log(LogLevel::Error, LogCategory::System, message, details, device_id, device_name)
            .await
    }

    pub async fn debug(
        &self,
        message: &str,
        details: Option<&str>,
        device_id: Option<&str>,
        device_name: Option<&str>,
    ) -> String {
        self.log(LogLevel::Debug, LogCategory::System, message, details, device_id, device_name)
            .await
    }

    /// 全量快照（写入顺序，最旧在前）
    pub async fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().await.iter().cloned().collect()
    }

    /// 条件过滤，结果按时间倒序（最新在前）
    pub async fn filtered(&self, filter: &LogFilter) -> Vec<LogEntry> {
        let mut result: Vec<LogEntry> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        result
    }

    /// 导出为纯文本：`[时间] [级别] [设备] [类别] 消息`，详情另起一行
    pub async fn export(&self) -> String {
        self.entries
            .read()
            .await
            .iter()
            .map(|e| {
                let time = format_timestamp(e.timestamp);
                let device = e.device_name.as_deref().unwrap_or("System");
                let mut line = format!(
                    "[{}] [{}] [{}] [{}] {}",
                    time,
                    e.level.as_str(),
                    device,
                    e.category.as_str(),
                    e.message
                );
                if let Some(ref details) = e.details {
                    line.push('\n');
                    line.push_str(details);
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// 毫秒时间戳 → 本地时间 `YYYY-MM-DD HH:mm:ss.SSS`
fn format_timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| {
            dt.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S%.3f")
                .to_string()
        })
        .unwrap_or_default()
}

/// 镜像到 tracing，让日志同时出现在结构化输出里
fn emit_trace(entry: &LogEntry) {
    let device = entry
        .device_name
        .as_deref()
        .or(entry.device_id.as_deref())
        .unwrap_or("-");
    match entry.level {
        LogLevel::Info => tracing::info!(device, "{}", entry.message),
        LogLevel::Warn => tracing::warn!(device, "{}", entry.message),
        LogLevel::Error => tracing::error!(device, "{}", entry.message),
        LogLevel::Debug => tracing::debug!(device, "{}", entry.message),
    }
}
