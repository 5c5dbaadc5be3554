//! 消息链路
//!
//! 与设备控制服务端之间的 WebSocket 通道：
//! - **信封**：出入站消息的 JSON 格式约定
//! - **传输**：连接拆成发送端/接收端两个 trait 对象，便于替换实现
//! - **客户端**：连接循环、心跳、断线重连与离线积压

mod client;
mod envelope;
mod transport;

pub use client::{LinkConfig, LinkState, MessagingClient};
pub use envelope::{Inbound, Outbound};
pub use transport::{Dialer, FrameSink, FrameStream, TransportError, WsDialer};
