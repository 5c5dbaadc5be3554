//! AI 指令链路
//!
//! 自然语言 → 对话模型 → 行级解析 → 命令执行器。
//! 模型只负责把口语改写成八类固定格式的指令行，结构化在本地完成。

mod client;
mod history;
mod interpreter;
mod orchestrator;

pub use client::{ChatClient, ChatError, ChatOptions, HttpChatClient, MockChatClient, TokenUsage};
pub use history::{ChatTurn, ConversationHistory, Role};
pub use interpreter::{parse_commands, DeviceAction, ParsedCommand, ScrollDirection};
pub use orchestrator::{AiError, AiOrchestrator};
