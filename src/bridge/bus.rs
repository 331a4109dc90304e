//! 消息总线抽象
//!
//! 运行时只依赖 `MessageBus`：发送即返回，不等待引擎回复。引擎的回复作为入站消息
//! 另行送入运行时。

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};

use super::message::BusMessage;
use crate::core::BusError;

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// 发送一条消息
    async fn emit(&self, message: BusMessage) -> Result<(), BusError>;

    /// 对端是否在线；不在线时注册流程降级为提示"不可用"
    fn is_connected(&self) -> bool {
        true
    }
}

/// 进程内通道总线，测试与嵌入宿主使用
pub struct ChannelBus {
    tx: mpsc::UnboundedSender<BusMessage>,
}

impl ChannelBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BusMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MessageBus for ChannelBus {
    async fn emit(&self, message: BusMessage) -> Result<(), BusError> {
        self.tx.send(message).map_err(|_| BusError::Closed)
    }

    fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// 每条消息一行 JSON 写到标准输出
pub struct StdoutBus {
    out: Mutex<tokio::io::Stdout>,
}

impl StdoutBus {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for StdoutBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for StdoutBus {
    async fn emit(&self, message: BusMessage) -> Result<(), BusError> {
        let mut line = serde_json::to_string(&message).map_err(std::io::Error::from)?;
        line.push('\n');
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}

/// 未接入引擎时使用，所有发送都失败
pub struct DisconnectedBus;

#[async_trait]
impl MessageBus for DisconnectedBus {
    async fn emit(&self, _message: BusMessage) -> Result<(), BusError> {
        Err(BusError::NotConnected)
    }

    fn is_connected(&self) -> bool {
        false
    }
}
