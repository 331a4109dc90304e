//! 与外部的连接：声纹引擎总线与语音输出
//!
//! - **event**: 出站/入站事件载荷
//! - **message**: 总线信封与编解码
//! - **bus**: 消息总线（通道 / 标准输出）
//! - **speaker**: 对话输出

pub mod bus;
pub mod event;
pub mod message;
pub mod speaker;

pub use bus::{ChannelBus, DisconnectedBus, MessageBus, StdoutBus};
pub use event::{InboundEvent, OutboundEvent};
pub use message::{decode, encode, topics, BusMessage};
pub use speaker::{ConsoleSpeaker, DialogSink, RecordingSpeaker};
