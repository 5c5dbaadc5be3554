//! 指令链路集成测试
//!
//! 从自然语言输入到命令入队、消息下发、设备回报落日志的全链路验证

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use devpilot::ai::{AiOrchestrator, ChatClient, ChatError, ChatOptions, ChatTurn};
use devpilot::command::{CommandExecutor, CommandKind, CommandStatus};
use devpilot::device::{DeviceRegistry, DeviceStatus};
use devpilot::journal::Journal;
use devpilot::messaging::{
    Dialer, FrameSink, FrameStream, LinkConfig, MessagingClient, TransportError,
};

/// 固定回复的对话客户端
struct ScriptedClient {
    reply: String,
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn complete(
        &self,
        _turns: &[ChatTurn],
        _options: ChatOptions,
    ) -> Result<String, ChatError> {
        Ok(self.reply.clone())
    }
}

/// 单连接脚本拨号器：记录发出的帧，测试侧可注入入站帧
struct ScriptedDialer {
    sent: Arc<Mutex<Vec<String>>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Result<String, TransportError>>>>,
}

/// 测试侧对假连接的把手
struct LinkProbe {
    sent: Arc<Mutex<Vec<String>>>,
    feed_tx: mpsc::UnboundedSender<Result<String, TransportError>>,
}

impl ScriptedDialer {
    fn single() -> (Self, LinkProbe) {
        let (feed_tx, inbound) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                sent: Arc::clone(&sent),
                inbound: Mutex::new(Some(inbound)),
            },
            LinkProbe { sent, feed_tx },
        )
    }
}

impl LinkProbe {
    fn frames(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn feed(&self, frame: &str) {
        let _ = self.feed_tx.send(Ok(frame.to_string()));
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(
        &self,
        _url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError> {
        let taken = self.inbound.lock().unwrap().take();
        match taken {
            Some(inbound) => Ok((
                Box::new(ProbeSink {
                    sent: Arc::clone(&self.sent),
                }),
                Box::new(ProbeStream { inbound }),
            )),
            // 只接受一次连接
            None => std::future::pending().await,
        }
    }
}

struct ProbeSink {
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl FrameSink for ProbeSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct ProbeStream {
    inbound: mpsc::UnboundedReceiver<Result<String, TransportError>>,
}

#[async_trait]
impl FrameStream for ProbeStream {
    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await
    }
}

fn test_link_config() -> LinkConfig {
    LinkConfig {
        url: "ws://test.local/ws".to_string(),
        heartbeat_interval: Duration::from_secs(60),
        reconnect_interval: Duration::from_secs(60),
        reconnect_attempts: 3,
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("等待超时");
}

#[tokio::test]
async fn test_natural_language_becomes_queued_commands() {
    let (executor, _notifications) = CommandExecutor::new();
    let executor = Arc::new(executor);
    let devices = Arc::new(DeviceRegistry::demo());
    let journal = Arc::new(Journal::default());

    let reply = "截图\n点击 100 200\n滑动 0 0 500 500\n输入 你好世界\n返回";
    let orchestrator = AiOrchestrator::new(
        Arc::new(ScriptedClient {
            reply: reply.to_string(),
        }),
        Arc::clone(&executor),
        Arc::clone(&devices),
        Arc::clone(&journal),
    )
    .with_pacing(Duration::ZERO);

    orchestrator
        .interpret_and_execute("帮我截图然后点一下屏幕", None)
        .await
        .unwrap();

    let queue = executor.queue().await;
    assert_eq!(queue.len(), 5);
    assert!(queue.iter().all(|c| c.kind == CommandKind::Ai));
    assert!(queue.iter().all(|c| c.device_id.as_deref() == Some("1")));
    assert_eq!(queue[0].content, "screenshot {}");
    assert_eq!(queue[1].content, r#"tap {"x":100,"y":200}"#);
    assert_eq!(
        queue[2].content,
        r#"swipe {"duration":300,"x1":0,"x2":500,"y1":0,"y2":500}"#
    );
    assert_eq!(queue[3].content, r#"input {"text":"你好世界"}"#);
    assert_eq!(queue[4].content, "back {}");

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
async fn test_commands_flow_to_wire_and_reports_land_in_journal() {
    let (executor, _notifications) = CommandExecutor::new();
    let executor = Arc::new(executor);
    let devices = Arc::new(DeviceRegistry::demo());
    let journal = Arc::new(Journal::default());

    let orchestrator = AiOrchestrator::new(
        Arc::new(ScriptedClient {
            reply: "截图\n点击 10 20".to_string(),
        }),
        Arc::clone(&executor),
        Arc::clone(&devices),
        Arc::clone(&journal),
    )
    .with_pacing(Duration::ZERO);

    let (dialer, link) = ScriptedDialer::single();
    let messaging = Arc::new(MessagingClient::new(
        test_link_config(),
        Arc::new(dialer),
        Arc::clone(&devices),
        Arc::clone(&journal),
    ));
    let run = {
        let messaging = Arc::clone(&messaging);
        tokio::spawn(async move { messaging.run().await })
    };

    orchestrator
        .interpret_and_execute("截个图再点一下", None)
        .await
        .unwrap();
    for command in executor.queue().await {
        if let Some(device_id) = &command.device_id {
            messaging.send_command(device_id, &command.content);
        }
    }

    wait_until(|| link.frames().len() >= 2).await;
    let frames = link.frames();
    let first: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
    assert_eq!(first["type"], "command");
    assert_eq!(first["deviceId"], "1");
    assert_eq!(first["command"], "screenshot {}");
    let second: serde_json::Value = serde_json::from_str(&frames[1]).unwrap();
    assert_eq!(second["command"], r#"tap {"x":10,"y":20}"#);

    // 设备回报执行结果与状态变化
    link.feed(r#"{"type":"command_result","deviceId":"1","result":"已截图","details":"png 已保存"}"#);
    link.feed(r#"{"type":"device_status","deviceId":"5","status":"online"}"#);

    for _ in 0..400 {
        if devices.get("5").await.map(|d| d.status) == Some(DeviceStatus::Online) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let device = devices.get("5").await.unwrap();
    assert_eq!(device.status, DeviceStatus::Online);
    assert!(device.connected_at.is_some());

    let entries = journal.entries().await;
    assert!(entries.iter().any(|e| {
        e.message == "命令执行结果: 已截图" && e.details.as_deref() == Some("png 已保存")
    }));

    messaging.disconnect();
    let _ = run.await;
}

#[tokio::test]
async fn test_lifecycle_progress_and_notifications() {
    let (executor, mut notifications) = CommandExecutor::new();

    let id = executor
        .enqueue("打开设置，滑到底部，点击关于手机", Some("2"), CommandKind::Text)
        .await;

    let command = executor.get(&id).await.unwrap();
    assert_eq!(command.steps.len(), 3);
    assert_eq!(command.status, CommandStatus::Executing);

    executor.update_progress(&id, 70, Some(2)).await;
    let command = executor.get(&id).await.unwrap();
    assert_eq!(command.progress, 70);
    assert!(command.steps[..2].iter().all(|s| s.progress == 100));

    assert!(executor.pause(&id).await);
    assert!(executor.resume(&id).await);
    assert!(executor.complete(&id, Some("全部步骤完成")).await);

    let n = notifications.recv().await.unwrap();
    assert_eq!(n.command_id, id);
    assert_eq!(n.status, CommandStatus::Completed);
    assert_eq!(n.result.as_deref(), Some("全部步骤完成"));

    // 历史里的终态记录可以再次执行，生成新 ID
    let replayed = executor.re_execute(&id).await.unwrap();
    assert_ne!(replayed, id);
    let replay = executor.get(&replayed).await.unwrap();
    assert_eq!(replay.content, "打开设置，滑到底部，点击关于手机");
    assert_eq!(replay.status, CommandStatus::Executing);
}
