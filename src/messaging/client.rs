//! WebSocket 链路维护
//!
//! 维持与设备控制服务端的长连接。每次断开只排一次固定间隔的重连，
//! 心跳按周期发送，断线期间的出站消息先积压、连上后按入队顺序补发。
//! 入站消息在这里分发：设备状态写回注册表，其余按类型记操作日志。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionSection;
use crate::device::DeviceRegistry;
use crate::journal::Journal;

use super::envelope::{Inbound, Outbound};
use super::transport::{Dialer, FrameSink, FrameStream};

/// 链路状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// 链路参数
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// 服务端地址
    pub url: String,
    /// 心跳间隔
    pub heartbeat_interval: Duration,
    /// 重连间隔
    pub reconnect_interval: Duration,
    /// 重连次数上限，预留配置，当前循环不消费
    pub reconnect_attempts: u32,
}

impl From<&ConnectionSection> for LinkConfig {
    fn from(section: &ConnectionSection) -> Self {
        Self {
            url: section.ws_url.clone(),
            heartbeat_interval: section.heartbeat_interval(),
            reconnect_interval: section.reconnect_interval(),
            reconnect_attempts: section.reconnect_attempts,
        }
    }
}

/// WebSocket 客户端
///
/// `run` 驱动连接循环直到 `disconnect`。出站消息走无界通道，
/// 断线时消息留在通道里，连接建立后按顺序发出
pub struct MessagingClient {
    config: LinkConfig,
    dialer: Arc<dyn Dialer>,
    devices: Arc<DeviceRegistry>,
    journal: Arc<Journal>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    state_tx: watch::Sender<LinkState>,
    shutdown: CancellationToken,
}

impl MessagingClient {
    pub fn new(
        config: LinkConfig,
        dialer: Arc<dyn Dialer>,
        devices: Arc<DeviceRegistry>,
        journal: Arc<Journal>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self {
            config,
            dialer,
            devices,
            journal,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            state_tx,
            shutdown: CancellationToken::new(),
        }
    }

    /// 当前链路状态
    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// 订阅状态变更
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// 入队一条出站消息，断线时积压、连上后补发
    pub fn send(&self, message: Outbound) {
        self.send_text(message.to_frame());
    }

    /// 入队任意 JSON 负载
    pub fn send_raw(&self, payload: serde_json::Value) {
        self.send_text(payload.to_string());
    }

    /// 下发设备命令
    pub fn send_command(&self, device_id: &str, command: &str) {
        self.send(Outbound::command(device_id, command));
    }

    fn send_text(&self, text: String) {
        let _ = self.outbound_tx.send(text);
    }

    /// 停止连接循环，同时取消尚未触发的重连
    pub fn disconnect(&self) {
        self.shutdown.cancel();
    }

    /// 连接循环主体，直到 `disconnect` 才退出
    ///
    /// 重复调用只有第一次生效
    pub async fn run(&self) {
        let mut outbound_rx = match self.outbound_rx.lock().await.take() {
            Some(rx) => rx,
            // 已有循环在跑
            None => return,
        };

        loop {
            self.set_state(LinkState::Connecting);
            let dialed = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.dialer.dial(&self.config.url) => result,
            };

            match dialed {
                Ok((sink, stream)) => {
                    self.set_state(LinkState::Connected);
                    self.journal
                        .info("WebSocket连接已建立", Some(&self.config.url), None, None)
                        .await;

                    let finished = self.drive_session(sink, stream, &mut outbound_rx).await;

                    self.set_state(LinkState::Disconnected);
                    self.journal
                        .warn("WebSocket连接已关闭", Some(&self.config.url), None, None)
                        .await;

                    if finished {
                        break;
                    }
                }
                Err(e) => {
                    self.set_state(LinkState::Disconnected);
                    self.journal
                        .error("WebSocket连接失败", Some(&e.to_string()), None, None)
                        .await;
                }
            }

            // 一次断开只排一次重连
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_interval) => {}
            }
            self.journal
                .info("尝试重新连接WebSocket...", None, None, None)
                .await;
        }

        self.set_state(LinkState::Disconnected);
    }

    /// 单条连接的会话循环，返回 true 表示收到停止指令
    async fn drive_session(
        &self,
        mut sink: Box<dyn FrameSink>,
        mut stream: Box<dyn FrameStream>,
        outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    ) -> bool {
        // 首跳等满一个完整周期
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = sink.close().await;
                    return true;
                }
                _ = heartbeat.tick() => {
                    if !self.push_frame(sink.as_mut(), Outbound::Ping.to_frame()).await {
                        return false;
                    }
                }
                text = outbound_rx.recv() => {
                    // 发送端持在 self 上，这里拿不到 None
                    if let Some(text) = text {
                        if !self.push_frame(sink.as_mut(), text).await {
                            return false;
                        }
                    }
                }
                frame = stream.next_text() => {
                    match frame {
                        Some(Ok(text)) => self.handle_frame(&text).await,
                        Some(Err(e)) => {
                            self.journal
                                .error("WebSocket连接错误", Some(&e.to_string()), None, None)
                                .await;
                            return false;
                        }
                        None => return false,
                    }
                }
            }
        }
    }

    /// 发送一帧，失败记一条连接错误并结束本条连接
    async fn push_frame(&self, sink: &mut dyn FrameSink, text: String) -> bool {
        if let Err(e) = sink.send_text(text).await {
            self.journal
                .error("WebSocket连接错误", Some(&e.to_string()), None, None)
                .await;
            return false;
        }
        true
    }

    /// 入站帧分发
    ///
    /// 坏 JSON 只打诊断日志，不进操作日志；合法 JSON 但类型未知的按未知消息记录
    async fn handle_frame(&self, text: &str) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("WebSocket消息解析失败: {}", e);
                return;
            }
        };

        match serde_json::from_value::<Inbound>(value.clone()) {
            Ok(Inbound::DeviceStatus { device_id, status }) => {
                self.devices.update_status(&device_id, status).await;
                self.journal
                    .info(
                        &format!("设备状态更新: {}", status),
                        Some(&device_id),
                        Some(&device_id),
                        None,
                    )
                    .await;
            }
            Ok(Inbound::DeviceData { device_id, data }) => {
                self.journal
                    .debug(
                        "收到设备数据",
                        Some(&data.to_string()),
                        device_id.as_deref(),
                        None,
                    )
                    .await;
            }
            Ok(Inbound::CommandResult {
                device_id,
                result,
                details,
            }) => {
                self.journal
                    .info(
                        &format!("命令执行结果: {}", result),
                        details.as_deref(),
                        device_id.as_deref(),
                        None,
                    )
                    .await;
            }
            Ok(Inbound::Error { message, details }) => {
                self.journal
                    .error(
                        &format!("服务端错误: {}", message),
                        details.as_deref(),
                        None,
                        None,
                    )
                    .await;
            }
            Err(_) => {
                self.journal
                    .debug("收到未知消息", Some(&value.to_string()), None, None)
                    .await;
            }
        }
    }

    fn set_state(&self, state: LinkState) {
        self.state_tx.send_replace(state);
    }
}
