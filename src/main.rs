//! DevPilot 控制台
//!
//! 入口：加载配置、初始化日志，把 AI 调度、命令执行与消息链路
//! 接成一个 stdin 交互循环。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use devpilot::ai::{AiOrchestrator, ChatClient, HttpChatClient, MockChatClient};
use devpilot::command::{CommandExecutor, CommandNotification};
use devpilot::config::{load_config, mask_api_key};
use devpilot::device::DeviceRegistry;
use devpilot::journal::Journal;
use devpilot::messaging::{LinkConfig, MessagingClient, WsDialer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(std::env::args().nth(1).map(PathBuf::from))
        .context("配置加载失败")?;

    // 日志：默认取配置里的级别，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.app.log_level)),
        )
        .with(fmt::layer())
        .init();

    let journal = Arc::new(Journal::default());
    let devices = Arc::new(DeviceRegistry::demo());
    if let Some(id) = &config.app.selected_device {
        devices.select_device(id).await;
    }

    let (executor, mut notifications) = CommandExecutor::new();
    let executor = Arc::new(executor);

    let client: Arc<dyn ChatClient> = if config.ai.is_valid_api_key() {
        tracing::info!(
            provider = %config.ai.provider,
            model = %config.ai.model,
            key = %mask_api_key(&config.ai.api_key),
            "使用远端模型解析指令"
        );
        Arc::new(HttpChatClient::new(&config.ai))
    } else {
        tracing::warn!("未配置有效的 API Key，回退到回显 Mock，输入将按命令原文解析");
        Arc::new(MockChatClient)
    };

    let orchestrator = AiOrchestrator::new(
        Arc::clone(&client),
        Arc::clone(&executor),
        Arc::clone(&devices),
        Arc::clone(&journal),
    );

    let messaging = Arc::new(MessagingClient::new(
        LinkConfig::from(&config.connection),
        Arc::new(WsDialer),
        Arc::clone(&devices),
        Arc::clone(&journal),
    ));
    let link = {
        let messaging = Arc::clone(&messaging);
        tokio::spawn(async move { messaging.run().await })
    };

    println!("DevPilot 控制台已启动，直接输入自然语言指令，/help 查看命令");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            maybe_line = lines.next_line() => {
                match maybe_line? {
                    Some(line) => {
                        let input = line.trim();
                        if input.is_empty() {
                            continue;
                        }
                        if input == "/quit" {
                            break;
                        }
                        if input == "/help" {
                            print_help();
                            continue;
                        }
                        if input == "/status" {
                            print_status(&messaging, &executor, &devices).await;
                            continue;
                        }
                        if input == "/logs" {
                            println!("{}", journal.export().await);
                            continue;
                        }
                        if input == "/test" {
                            match orchestrator.test_connection().await {
                                Ok(_) => println!("AI 服务连通"),
                                Err(e) => println!("AI 服务不可用: {}", e),
                            }
                            continue;
                        }
                        if input.starts_with('/') {
                            println!("未知命令，/help 查看用法");
                            continue;
                        }
                        run_instruction(input, &orchestrator, &executor, &messaging).await;
                    }
                    None => break,
                }
            }
            notification = notifications.recv() => {
                // 执行器与通道同生命周期，这里拿不到 None
                if let Some(n) = notification {
                    print_notification(&n);
                }
            }
        }
    }

    messaging.disconnect();
    let _ = link.await;
    Ok(())
}

/// 解析自然语言并执行，入队的新命令同时走消息链路下发
async fn run_instruction(
    input: &str,
    orchestrator: &AiOrchestrator,
    executor: &CommandExecutor,
    messaging: &MessagingClient,
) {
    let before = executor.queue().await.len();
    if let Err(e) = orchestrator.interpret_and_execute(input, None).await {
        println!("解析执行失败: {}", e);
        return;
    }

    let queue = executor.queue().await;
    if queue.len() == before {
        println!("没有解析出可执行的命令");
        return;
    }
    for command in queue.iter().skip(before) {
        if let Some(device_id) = &command.device_id {
            messaging.send_command(device_id, &command.content);
        }
        println!("已下发 [{}] {}", command.id, command.content);
    }
}

async fn print_status(
    messaging: &MessagingClient,
    executor: &CommandExecutor,
    devices: &DeviceRegistry,
) {
    println!("链路: {:?}", messaging.state());
    match devices.selected_device().await {
        Some(d) => println!("选中设备: {} ({}, {})", d.name, d.id, d.status),
        None => println!("选中设备: 无"),
    }
    let queue = executor.queue().await;
    if queue.is_empty() {
        println!("队列为空");
        return;
    }
    for command in queue {
        println!(
            "  [{}] {} {} 进度 {}%",
            command.id, command.content, command.status, command.progress
        );
    }
}

fn print_notification(n: &CommandNotification) {
    let device = n.device_id.as_deref().unwrap_or("-");
    match (&n.result, &n.error) {
        (_, Some(error)) => println!("命令 {} ({}) 失败: {}", n.command_id, device, error),
        (Some(result), None) => println!("命令 {} ({}) 完成: {}", n.command_id, device, result),
        (None, None) => println!("命令 {} ({}) {}", n.command_id, device, n.status),
    }
}

fn print_help() {
    println!("直接输入自然语言，例如：截图，然后点击屏幕中间");
    println!("/status  链路状态、选中设备与执行队列");
    println!("/logs    导出操作日志");
    println!("/test    探测 AI 服务连通性");
    println!("/quit    断开链路并退出");
}
