//! 命令执行状态机
//!
//! 维护实时队列、定容历史与单一执行指针，只做状态追踪，
//! 进度推进由上层（AI 调度器、控制台或远端回报）驱动

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

/// 命令 ID
pub type CommandId = String;

/// 历史容量，满后最旧先出
const MAX_HISTORY: usize = 100;

/// 命令生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    /// 等待执行
    Pending,
    /// 正在执行
    Executing,
    /// 已暂停
    Paused,
    /// 已完成
    Completed,
    /// 执行失败
    Failed,
}

impl CommandStatus {
    /// 终态不再接受任何状态迁移
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Failed)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Executing => "executing",
            CommandStatus::Paused => "paused",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// 命令来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// 手动输入的文本指令
    Text,
    /// 预置快捷操作
    Action,
    /// AI 解析产生
    Ai,
}

impl Default for CommandKind {
    fn default() -> Self {
        Self::Text
    }
}

/// 步骤状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// 命令步骤，按逗号切分出的子指令
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandStep {
    /// 序号 ID（step_1 起）
    pub id: String,
    /// 原文片段
    pub description: String,
    pub status: StepStatus,
    /// 进度（0-100）
    pub progress: u8,
}

/// 下发给设备的命令
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    /// 指令原文
    pub content: String,
    pub kind: CommandKind,
    pub status: CommandStatus,
    /// 目标设备
    pub device_id: Option<String>,
    /// 创建时间（毫秒时间戳）
    pub created_at: i64,
    /// 开始执行时间
    pub executed_at: Option<i64>,
    /// 完成时间，仅在首次进入终态时写入
    pub completed_at: Option<i64>,
    /// 总进度（0-100）
    pub progress: u8,
    pub steps: Vec<CommandStep>,
    /// 执行结果
    pub result: Option<String>,
    /// 错误信息
    pub error: Option<String>,
}

/// 命令进入终态时的通知
#[derive(Debug, Clone)]
pub struct CommandNotification {
    pub command_id: CommandId,
    pub device_id: Option<String>,
    pub status: CommandStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// 命令执行器（内存状态机）
pub struct CommandExecutor {
    /// 实时队列
    queue: RwLock<Vec<Command>>,
    /// 执行历史，新的在前
    history: RwLock<VecDeque<Command>>,
    /// 当前执行指针，同一时刻至多一条
    current: RwLock<Option<CommandId>>,
    /// 终态通知发送器
    notification_tx: mpsc::UnboundedSender<CommandNotification>,
    /// id 序号，避免同毫秒生成重复 ID
    seq: AtomicU64,
}

impl CommandExecutor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CommandNotification>) {
        let (notification_tx, notification_rx) = mpsc::unbounded_channel();

        (
            Self {
                queue: RwLock::new(Vec::new()),
                history: RwLock::new(VecDeque::new()),
                current: RwLock::new(None),
                notification_tx,
                seq: AtomicU64::new(0),
            },
            notification_rx,
        )
    }

    /// 入队并立即置为执行中，返回命令 ID
    ///
    /// 本方法不做任何网络调用，进度需由调用方通过
    /// `update_progress`/`complete`/`stop` 推进
    pub async fn enqueue(
        &self,
        content: &str,
        device_id: Option<&str>,
        kind: CommandKind,
    ) -> CommandId {
        let id = self.next_id();
        let now = chrono::Utc::now().timestamp_millis();

        let command = Command {
            id: id.clone(),
            content: content.to_string(),
            kind,
            status: CommandStatus::Executing,
            device_id: device_id.map(String::from),
            created_at: now,
            executed_at: Some(now),
            completed_at: None,
            progress: 0,
            steps: build_steps(content),
            result: None,
            error: None,
        };

        let mut queue = self.queue.write().await;
        let mut history = self.history.write().await;
        let mut current = self.current.write().await;

        history.push_front(command.clone());
        if history.len() > MAX_HISTORY {
            history.pop_back();
        }
        queue.push(command);
        *current = Some(id.clone());

        id
    }

    /// 暂停，仅对执行中的命令生效
    pub async fn pause(&self, id: &str) -> bool {
        let mut queue = self.queue.write().await;
        let mut history = self.history.write().await;

        if let Some(cmd) = queue.iter_mut().find(|c| c.id == id) {
            if cmd.status == CommandStatus::Executing {
                cmd.status = CommandStatus::Paused;
                sync_history(&mut history, cmd);
                return true;
            }
        }
        false
    }

    /// 恢复，仅对已暂停的命令生效
    pub async fn resume(&self, id: &str) -> bool {
        let mut queue = self.queue.write().await;
        let mut history = self.history.write().await;

        if let Some(cmd) = queue.iter_mut().find(|c| c.id == id) {
            if cmd.status == CommandStatus::Paused {
                cmd.status = CommandStatus::Executing;
                sync_history(&mut history, cmd);
                return true;
            }
        }
        false
    }

    /// 手动终止，非终态命令置为失败并记录固定错误信息
    pub async fn stop(&self, id: &str) -> bool {
        let mut queue = self.queue.write().await;
        let mut history = self.history.write().await;
        let mut current = self.current.write().await;

        if let Some(cmd) = queue.iter_mut().find(|c| c.id == id) {
            if !cmd.status.is_terminal() {
                cmd.status = CommandStatus::Failed;
                cmd.completed_at = Some(chrono::Utc::now().timestamp_millis());
                cmd.error = Some("用户手动停止".to_string());
                sync_history(&mut history, cmd);

                if current.as_deref() == Some(id) {
                    *current = None;
                }
                self.notify(cmd);
                return true;
            }
        }
        false
    }

    /// 标记完成，所有步骤强制置为完成态
    pub async fn complete(&self, id: &str, result: Option<&str>) -> bool {
        let mut queue = self.queue.write().await;
        let mut history = self.history.write().await;
        let mut current = self.current.write().await;

        if let Some(cmd) = queue.iter_mut().find(|c| c.id == id) {
            if !cmd.status.is_terminal() {
                cmd.status = CommandStatus::Completed;
                cmd.completed_at = Some(chrono::Utc::now().timestamp_millis());
                cmd.result = result.map(String::from);
                cmd.progress = 100;
                for step in &mut cmd.steps {
                    step.status = StepStatus::Completed;
                    step.progress = 100;
                }
                sync_history(&mut history, cmd);

                if current.as_deref() == Some(id) {
                    *current = None;
                }
                self.notify(cmd);
                return true;
            }
        }
        false
    }

    /// 更新总进度；给定步骤序号时，该步骤置为执行中，其前所有步骤补记完成
    pub async fn update_progress(&self, id: &str, progress: u8, step_index: Option<usize>) {
        let mut queue = self.queue.write().await;
        let mut history = self.history.write().await;

        if let Some(cmd) = queue.iter_mut().find(|c| c.id == id) {
            if cmd.status.is_terminal() {
                return;
            }
            let progress = progress.min(100);
            cmd.progress = progress;

            if let Some(idx) = step_index {
                if idx < cmd.steps.len() {
                    for step in &mut cmd.steps[..idx] {
                        step.status = StepStatus::Completed;
                        step.progress = 100;
                    }
                    cmd.steps[idx].status = StepStatus::Executing;
                    cmd.steps[idx].progress = progress;
                }
            }
            sync_history(&mut history, cmd);
        }
    }

    /// 从历史重新执行，生成全新 ID 的命令；历史中不存在时返回 None
    pub async fn re_execute(&self, id: &str) -> Option<CommandId> {
        let source = {
            let history = self.history.read().await;
            history
                .iter()
                .find(|c| c.id == id)
                .map(|c| (c.content.clone(), c.device_id.clone(), c.kind))
        };

        match source {
            Some((content, device_id, kind)) => {
                Some(self.enqueue(&content, device_id.as_deref(), kind).await)
            }
            None => None,
        }
    }

    /// 删除单条历史
    pub async fn delete_history_item(&self, id: &str) -> bool {
        let mut history = self.history.write().await;
        let before = history.len();
        history.retain(|c| c.id != id);
        history.len() != before
    }

    /// 清空历史
    pub async fn clear_history(&self) {
        self.history.write().await.clear();
    }

    /// 清空实时队列与执行指针，历史保留
    pub async fn clear_queue(&self) {
        let mut queue = self.queue.write().await;
        let mut current = self.current.write().await;
        queue.clear();
        *current = None;
    }

    /// 查找命令，先查实时队列再查历史
    pub async fn get(&self, id: &str) -> Option<Command> {
        if let Some(cmd) = self.queue.read().await.iter().find(|c| c.id == id) {
            return Some(cmd.clone());
        }
        self.history
            .read()
            .await
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    /// 实时队列快照，入队顺序
    pub async fn queue(&self) -> Vec<Command> {
        self.queue.read().await.clone()
    }

    /// 历史快照，新的在前
    pub async fn history(&self) -> Vec<Command> {
        self.history.read().await.iter().cloned().collect()
    }

    /// 当前执行中的命令
    pub async fn current_executing(&self) -> Option<Command> {
        // 先取出 id 放掉指针锁，加锁顺序与写路径保持一致（队列锁在前）
        let id = self.current.read().await.clone()?;
        self.queue.read().await.iter().find(|c| c.id == id).cloned()
    }

    pub async fn current_executing_id(&self) -> Option<CommandId> {
        self.current.read().await.clone()
    }

    pub async fn is_executing(&self) -> bool {
        self.current.read().await.is_some()
    }

    fn next_id(&self) -> CommandId {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("cmd_{}_{}", chrono::Utc::now().timestamp_millis(), seq)
    }

    fn notify(&self, cmd: &Command) {
        let _ = self.notification_tx.send(CommandNotification {
            command_id: cmd.id.clone(),
            device_id: cmd.device_id.clone(),
            status: cmd.status,
            result: cmd.result.clone(),
            error: cmd.error.clone(),
        });
    }
}

/// 回写历史中的同 ID 条目，保持与队列一致
fn sync_history(history: &mut VecDeque<Command>, command: &Command) {
    if let Some(entry) = history.iter_mut().find(|c| c.id == command.id) {
        *entry = command.clone();
    }
}

/// 按中英文逗号切分步骤，无有效片段时合成单个占位步骤
fn build_steps(content: &str) -> Vec<CommandStep> {
    let parts: Vec<&str> = content
        .split([',', '，'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if parts.is_empty() {
        return vec![CommandStep {
            id: "step_1".to_string(),
            description: "执行指令".to_string(),
            status: StepStatus::Pending,
            progress: 0,
        }];
    }

    parts
        .iter()
        .enumerate()
        .map(|(i, part)| CommandStep {
            id: format!("step_{}", i + 1),
            description: (*part).to_string(),
            status: StepStatus::Pending,
            progress: 0,
        })
        .collect()
}
