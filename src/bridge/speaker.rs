//! 对话输出
//!
//! 语音合成不在本 crate 内：宿主实现 `DialogSink`，把 `Dialog` 交给自己的 TTS。

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::enrollment::Dialog;

#[async_trait]
pub trait DialogSink: Send + Sync {
    async fn speak(&self, dialog: &Dialog);
}

/// 把渲染后的英文文本打印到标准错误，不干扰标准输出上的总线消息
#[derive(Debug, Default)]
pub struct ConsoleSpeaker;

#[async_trait]
impl DialogSink for ConsoleSpeaker {
    async fn speak(&self, dialog: &Dialog) {
        let line = format!("[{}] {}\n", dialog.key.as_str(), dialog.render());
        let mut err = tokio::io::stderr();
        if let Err(e) = err.write_all(line.as_bytes()).await {
            tracing::warn!("Failed to write dialog: {}", e);
        }
    }
}

/// 记录所有朗读，供测试检查
#[derive(Debug, Default)]
pub struct RecordingSpeaker {
    spoken: Mutex<Vec<Dialog>>,
}

impl RecordingSpeaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spoken(&self) -> Vec<Dialog> {
        self.spoken.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DialogSink for RecordingSpeaker {
    async fn speak(&self, dialog: &Dialog) {
        if let Ok(mut spoken) = self.spoken.lock() {
            spoken.push(dialog.clone());
        }
    }
}
