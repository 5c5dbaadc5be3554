//! 传输层抽象
//!
//! 把一条 WebSocket 连接拆成发送端与接收端两个 trait 对象，
//! 链路循环只面向文本帧，测试里可以换成脚本化的假连接

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};

/// 传输层错误
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Ws(#[from] tungstenite::Error),
    #[error("{0}")]
    Other(String),
}

/// 文本帧发送端
#[async_trait]
pub trait FrameSink: Send {
    /// 发送一帧文本
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// 主动关闭连接
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// 文本帧接收端
#[async_trait]
pub trait FrameStream: Send {
    /// 下一帧文本，连接关闭时返回 None
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;
}

/// 连接拨号器
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError>;
}

type WsSplitSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSplitStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// 基于 tokio-tungstenite 的真实拨号器
pub struct WsDialer;

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError> {
        let (stream, _response) = connect_async(url).await?;
        let (sink, stream) = stream.split();
        Ok((
            Box::new(WsSink { sink }),
            Box::new(WsStream { stream }),
        ))
    }
}

struct WsSink {
    sink: WsSplitSink,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sink.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink.close().await?;
        Ok(())
    }
}

struct WsStream {
    stream: WsSplitStream,
}

#[async_trait]
impl FrameStream for WsStream {
    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                // 二进制帧与 Ping/Pong 帧对上层没有意义，直接跳过
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
