//! 错误类型
//!
//! - `ErrorCode`：注册失败时对外可见的错误码（进入 Failed 阶段时携带）
//! - `EnrollError`：crate 内部错误（非法阶段迁移、配置、总线、编解码）
//! - `BusError`：消息总线发送失败

use std::fmt;

use thiserror::Error;

use crate::enrollment::Phase;

/// 注册失败的错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidName,
    SampleCountInsufficient,
    PluginUnavailable,
    ProcessingFailed,
    NetworkError,
    UserExists,
    AudioQualityPoor,
}

/// 引擎错误文本 -> 错误码；按顺序匹配，未命中归为 processing_failed
const ENGINE_MESSAGE_TABLE: [(&str, ErrorCode); 10] = [
    ("user id is required", ErrorCode::InvalidName),
    ("missing user_name", ErrorCode::InvalidName),
    ("audio samples are required", ErrorCode::SampleCountInsufficient),
    ("no valid audio samples", ErrorCode::SampleCountInsufficient),
    ("voice processor not initialized", ErrorCode::PluginUnavailable),
    ("already exists", ErrorCode::UserExists),
    ("already enrolled", ErrorCode::UserExists),
    ("network", ErrorCode::NetworkError),
    ("connection", ErrorCode::NetworkError),
    ("quality", ErrorCode::AudioQualityPoor),
];

impl ErrorCode {
    pub const ALL: [ErrorCode; 7] = [
        ErrorCode::InvalidName,
        ErrorCode::SampleCountInsufficient,
        ErrorCode::PluginUnavailable,
        ErrorCode::ProcessingFailed,
        ErrorCode::NetworkError,
        ErrorCode::UserExists,
        ErrorCode::AudioQualityPoor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidName => "invalid_name",
            ErrorCode::SampleCountInsufficient => "sample_count_insufficient",
            ErrorCode::PluginUnavailable => "plugin_unavailable",
            ErrorCode::ProcessingFailed => "processing_failed",
            ErrorCode::NetworkError => "network_error",
            ErrorCode::UserExists => "user_exists",
            ErrorCode::AudioQualityPoor => "audio_quality_poor",
        }
    }

    /// 解析引擎给出的结构化错误码
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim().to_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }

    /// 从引擎错误文本推断错误码（大小写不敏感的子串匹配）
    pub fn from_engine_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        ENGINE_MESSAGE_TABLE
            .iter()
            .find(|(needle, _)| lower.contains(needle))
            .map(|(_, code)| *code)
            .unwrap_or(ErrorCode::ProcessingFailed)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 消息总线错误
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Bus not connected")]
    NotConnected,

    #[error("Bus channel closed")]
    Closed,

    #[error("Bus write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// crate 内部错误
#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("Illegal phase transition: {from:?} -> {to:?}")]
    IllegalTransition { from: Phase, to: Phase },

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Message codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Message '{msg_type}' missing field '{field}'")]
    MissingField { msg_type: String, field: &'static str },
}
