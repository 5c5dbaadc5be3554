//! 命令执行模块
//!
//! 命令从入队起经历 pending → executing → {paused ⇄ executing} → {completed | failed}，
//! 终态不可逆。队列与历史相互独立，历史定容 100 条。

mod executor;

pub use executor::{
    Command, CommandExecutor, CommandId, CommandKind, CommandNotification, CommandStatus,
    CommandStep, StepStatus,
};
