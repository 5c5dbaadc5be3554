//! AI 指令调度
//!
//! 调用对话模型、维护有界会话上下文、把解析出的动作序列依次
//! 送入执行器（带固定入队间隔），全过程写入运行日志

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::ai::client::{ChatClient, ChatError, ChatOptions};
use crate::ai::history::{ChatTurn, ConversationHistory};
use crate::ai::interpreter::{self, ParsedCommand};
use crate::command::{CommandExecutor, CommandKind};
use crate::device::DeviceRegistry;
use crate::journal::Journal;

/// 回放给模型的历史轮数
const CONTEXT_TURNS: usize = 5;
/// 会话历史上限（条），超出后裁掉最旧
const MAX_HISTORY_TURNS: usize = 20;
/// 连续命令的入队间隔
const COMMAND_PACING: Duration = Duration::from_millis(500);

const SYSTEM_PROMPT: &str = r#"你是一个移动设备控制助手。请将用户的自然语言指令解析为可执行的设备命令。

支持的命令格式：
- 截图：截取当前屏幕
- 点击 [x] [y]：在坐标(x,y)处点击
- 滑动 [x1] [y1] [x2] [y2] [时长]：从(x1,y1)滑动到(x2,y2)
- 输入 [文本]：输入指定文本
- 返回：返回上一界面
- Home：返回主屏幕
- 打开 [应用名]：打开指定应用
- 滚动 [上/下]：滚动屏幕

请直接输出解析后的命令，每条命令一行，不要包含其他解释。"#;

/// 调度失败
#[derive(Debug, Error)]
pub enum AiError {
    /// 凭证缺失或长度不足
    #[error("请先配置有效的API Key")]
    NotConfigured,
    /// 既未指定设备也没有选中设备
    #[error("请先选择要控制的设备")]
    NoTargetDevice,
    /// 远端调用失败
    #[error(transparent)]
    Remote(#[from] ChatError),
}

/// AI 指令调度器
pub struct AiOrchestrator {
    client: Arc<dyn ChatClient>,
    executor: Arc<CommandExecutor>,
    devices: Arc<DeviceRegistry>,
    journal: Arc<Journal>,
    history: RwLock<ConversationHistory>,
    pacing: Duration,
}

impl AiOrchestrator {
    pub fn new(
        client: Arc<dyn ChatClient>,
        executor: Arc<CommandExecutor>,
        devices: Arc<DeviceRegistry>,
        journal: Arc<Journal>,
    ) -> Self {
        Self {
            client,
            executor,
            devices,
            journal,
            history: RwLock::new(ConversationHistory::new(MAX_HISTORY_TURNS)),
            pacing: COMMAND_PACING,
        }
    }

    /// 调整入队间隔
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// 将用户输入解析为指令序列
    ///
    /// 成功时把本轮 (user, assistant) 追加进会话历史；失败时历史保持原样
    pub async fn parse(&self, user_input: &str) -> Result<Vec<ParsedCommand>, AiError> {
        if !self.client.is_configured() {
            return Err(AiError::NotConfigured);
        }

        let mut turns = Vec::with_capacity(CONTEXT_TURNS + 2);
        turns.push(ChatTurn::system(SYSTEM_PROMPT));
        {
            let history = self.history.read().await;
            turns.extend_from_slice(history.recent(CONTEXT_TURNS));
        }
        turns.push(ChatTurn::user(user_input));

        self.journal
            .info("正在调用智谱AI解析指令...", Some(user_input), None, None)
            .await;

        let content = match self.client.complete(&turns, ChatOptions::parsing()).await {
            Ok(content) => content,
            Err(e) => {
                self.journal
                    .error("AI指令解析失败", Some(&e.to_string()), None, None)
                    .await;
                return Err(e.into());
            }
        };

        self.history
            .write()
            .await
            .push_exchange(user_input, &content);

        let commands = interpreter::parse_commands(&content);

        let (stamp_id, stamp_name) = self.selected_stamp().await;
        self.journal
            .info(
                "AI指令解析完成",
                Some(&format!("解析出{}条命令", commands.len())),
                stamp_id.as_deref(),
                stamp_name.as_deref(),
            )
            .await;

        Ok(commands)
    }

    /// 解析并逐条下发执行
    ///
    /// 未解析出命令时只告警不报错；每条命令入队后等待固定间隔，
    /// 给外部执行方留出逐步推进的时间
    pub async fn interpret_and_execute(
        &self,
        user_input: &str,
        device_id: Option<&str>,
    ) -> Result<(), AiError> {
        let selected = self.devices.selected_device().await;
        let target_id = device_id
            .map(String::from)
            .or_else(|| selected.as_ref().map(|d| d.id.clone()))
            .ok_or(AiError::NoTargetDevice)?;
        let device_name = selected.as_ref().map(|d| d.name.clone());

        self.journal
            .info(
                "开始AI指令解析与执行",
                Some(user_input),
                Some(&target_id),
                device_name.as_deref(),
            )
            .await;

        let commands = self.parse(user_input).await?;

        if commands.is_empty() {
            self.journal
                .warn(
                    "AI未能解析出有效命令",
                    Some(user_input),
                    Some(&target_id),
                    device_name.as_deref(),
                )
                .await;
            return Ok(());
        }

        for cmd in &commands {
            let command_str = cmd.command_string();
            self.executor
                .enqueue(&command_str, Some(&target_id), CommandKind::Ai)
                .await;
            tokio::time::sleep(self.pacing).await;
        }

        self.journal
            .info(
                "AI指令执行完成",
                Some(&format!("共执行{}条命令", commands.len())),
                Some(&target_id),
                device_name.as_deref(),
            )
            .await;

        Ok(())
    }

    /// 探测模型服务连通性，不写入会话历史
    pub async fn test_connection(&self) -> Result<bool, AiError> {
        if !self.client.is_configured() {
            return Err(AiError::NotConfigured);
        }

        let turns = vec![ChatTurn::user("hi")];
        match self.client.complete(&turns, ChatOptions::probe()).await {
            Ok(_) => {
                self.journal
                    .info("AI服务连接测试成功", None, None, None)
                    .await;
                Ok(true)
            }
            Err(e) => {
                self.journal
                    .error("AI服务连接测试失败", Some(&e.to_string()), None, None)
                    .await;
                Err(e.into())
            }
        }
    }

    /// 会话历史快照
    pub async fn conversation(&self) -> Vec<ChatTurn> {
        self.history.read().await.turns().to_vec()
    }

    /// 清空会话历史
    pub async fn clear_history(&self) {
        self.history.write().await.clear();
    }

    /// 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.client.token_usage()
    }

    async fn selected_stamp(&self) -> (Option<String>, Option<String>) {
        let id = self.devices.selected_device_id().await;
        let name = self.devices.selected_device().await.map(|d| d.name);
        (id, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::client::MockChatClient;
    use crate::journal::LogLevel;
    use async_trait::async_trait;

    struct FailingClient;

    #[async_trait]
    impl ChatClient for FailingClient {
        async fn complete(
            &self,
            _turns: &[ChatTurn],
            _options: ChatOptions,
        ) -> Result<String, ChatError> {
            Err(ChatError::Api {
                status: 401,
                message: "API Key 无效".to_string(),
            })
        }
    }

    struct UnconfiguredClient;

    #[async_trait]
    impl ChatClient for UnconfiguredClient {
        async fn complete(
            &self,
            _turns: &[ChatTurn],
            _options: ChatOptions,
        ) -> Result<String, ChatError> {
            Ok(String::new())
        }

        fn is_configured(&self) -> bool {
            false
        }
    }

    /// 记录每次调用收到的消息条数
    struct RecordingClient {
        seen: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ChatClient for RecordingClient {
        async fn complete(
            &self,
            turns: &[ChatTurn],
            _options: ChatOptions,
        ) -> Result<String, ChatError> {
            self.seen.lock().unwrap().push(turns.len());
            Ok(String::new())
        }
    }

    fn build(client: Arc<dyn ChatClient>) -> (AiOrchestrator, Arc<CommandExecutor>, Arc<Journal>) {
        let (executor, _) = CommandExecutor::new();
        let executor = Arc::new(executor);
        let journal = Arc::new(Journal::default());
        let devices = Arc::new(DeviceRegistry::demo());
        let orchestrator = AiOrchestrator::new(
            client,
            Arc::clone(&executor),
            devices,
            Arc::clone(&journal),
        )
        .with_pacing(Duration::ZERO);
        (orchestrator, executor, journal)
    }

    #[tokio::test]
    async fn test_interpret_and_execute_enqueues_in_order() {
        let (orchestrator, executor, journal) = build(Arc::new(MockChatClient));

        orchestrator
            .interpret_and_execute("截图\n点击 100 200", None)
            .await
            .unwrap();

        let queue = executor.queue().await;
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].content, "screenshot {}");
        assert_eq!(queue[1].content, r#"tap {"x":100,"y":200}"#);
        assert!(queue.iter().all(|c| c.kind == CommandKind::Ai));
        assert_eq!(queue[0].device_id.as_deref(), Some("1"));

        let messages: Vec<String> = journal
            .entries()
            .await
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert!(messages.contains(&"开始AI指令解析与执行".to_string()));
        assert!(messages.contains(&"AI指令解析完成".to_string()));
        assert!(messages.contains(&"AI指令执行完成".to_string()));
    }

    #[tokio::test]
    async fn test_explicit_device_overrides_selection() {
        let (orchestrator, executor, _journal) = build(Arc::new(MockChatClient));

        orchestrator
            .interpret_and_execute("返回", Some("9"))
            .await
            .unwrap();

        let queue = executor.queue().await;
        assert_eq!(queue[0].device_id.as_deref(), Some("9"));
    }

    #[tokio::test]
    async fn test_zero_commands_warns_without_enqueue() {
        let (orchestrator, executor, journal) = build(Arc::new(MockChatClient));

        orchestrator
            .interpret_and_execute("今天天气怎么样", None)
            .await
            .unwrap();

        assert!(executor.queue().await.is_empty());

        let warnings: Vec<_> = journal
            .entries()
            .await
            .into_iter()
            .filter(|e| e.level == LogLevel::Warn)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, "AI未能解析出有效命令");
    }

    #[tokio::test]
    async fn test_parse_failure_leaves_history_untouched() {
        let (orchestrator, _executor, journal) = build(Arc::new(FailingClient));

        let err = orchestrator.parse("点击 1 2").await.unwrap_err();
        assert_eq!(err.to_string(), "API Key 无效");
        assert!(orchestrator.conversation().await.is_empty());

        let errors: Vec<_> = journal
            .entries()
            .await
            .into_iter()
            .filter(|e| e.level == LogLevel::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "AI指令解析失败");
        assert_eq!(errors[0].details.as_deref(), Some("API Key 无效"));
    }

    #[tokio::test]
    async fn test_parse_trims_history_and_replays_recent_turns() {
        let client = Arc::new(RecordingClient {
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let (executor, _) = CommandExecutor::new();
        let journal = Arc::new(Journal::default());
        let orchestrator = AiOrchestrator::new(
            Arc::clone(&client) as Arc<dyn ChatClient>,
            Arc::new(executor),
            Arc::new(DeviceRegistry::demo()),
            journal,
        );

        for i in 0..15 {
            orchestrator.parse(&format!("指令 {}", i)).await.unwrap();
        }

        let conversation = orchestrator.conversation().await;
        assert_eq!(conversation.len(), 20);
        assert_eq!(conversation[0].content, "指令 5");

        // 首次调用只有 system + user；历史攒够后稳定在 system + 5 条历史 + user
        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0], 2);
        assert_eq!(seen[1], 4);
        assert_eq!(seen[14], 7);

        orchestrator.clear_history().await;
        assert!(orchestrator.conversation().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_credential_rejected_before_any_call() {
        let (orchestrator, _executor, journal) = build(Arc::new(UnconfiguredClient));

        let err = orchestrator.parse("截图").await.unwrap_err();
        assert!(matches!(err, AiError::NotConfigured));
        assert_eq!(err.to_string(), "请先配置有效的API Key");

        let err = orchestrator.test_connection().await.unwrap_err();
        assert!(matches!(err, AiError::NotConfigured));

        // 凭证检查先于日志写入
        assert!(journal.is_empty().await);
    }

    #[tokio::test]
    async fn test_no_target_device_rejected() {
        let (executor, _) = CommandExecutor::new();
        let journal = Arc::new(Journal::default());
        let orchestrator = AiOrchestrator::new(
            Arc::new(MockChatClient),
            Arc::new(executor),
            Arc::new(DeviceRegistry::new()),
            Arc::clone(&journal),
        );

        let err = orchestrator
            .interpret_and_execute("截图", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::NoTargetDevice));
        assert_eq!(err.to_string(), "请先选择要控制的设备");
        assert!(journal.is_empty().await);
    }

    #[tokio::test]
    async fn test_connection_probe_logs_outcome() {
        let (orchestrator, _executor, journal) = build(Arc::new(MockChatClient));
        assert!(orchestrator.test_connection().await.unwrap());
        assert!(orchestrator.conversation().await.is_empty());

        let messages: Vec<String> = journal
            .entries()
            .await
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert!(messages.contains(&"AI服务连接测试成功".to_string()));

        let (orchestrator, _executor, journal) = build(Arc::new(FailingClient));
        let err = orchestrator.test_connection().await.unwrap_err();
        assert_eq!(err.to_string(), "API Key 无效");

        let messages: Vec<String> = journal
            .entries()
            .await
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert!(messages.contains(&"AI服务连接测试失败".to_string()));
    }
}
