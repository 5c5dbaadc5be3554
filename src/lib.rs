//! DevPilot - 移动设备远程控制客户端核心
//!
//! 模块划分：
//! - **ai**: 自然语言到设备命令的解析与调度（智谱 AI / Mock）
//! - **command**: 命令执行状态机（队列、步骤、历史）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **device**: 设备注册表与选中状态
//! - **journal**: 操作日志（环形缓冲 + 过滤 + 导出）
//! - **messaging**: WebSocket 链路（心跳、重连、离线积压）

pub mod ai;
pub mod command;
pub mod config;
pub mod device;
pub mod journal;
pub mod messaging;

pub use ai::AiOrchestrator;
pub use command::CommandExecutor;
pub use device::DeviceRegistry;
pub use journal::Journal;
pub use messaging::MessagingClient;
