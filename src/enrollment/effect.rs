//! 状态机的输入与副作用
//!
//! 状态机本身不做 I/O：每次输入返回一组 `Effect`，由运行时依次执行
//! （发总线消息、朗读、设定/取消计时器）。

use std::time::Duration;

use serde::Serialize;

use super::dialog::Dialog;
use super::session::Trigger;
use crate::bridge::{InboundEvent, OutboundEvent};

/// 计时器键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKey {
    Confirmation,
    SampleCollection,
    RetryConfirmation,
    TimeoutConfirmation,
    OverallSession,
    NameCollection,
    PausedSession,
    Processing,
    ProceedDelay,
}

impl TimeoutKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutKey::Confirmation => "confirmation",
            TimeoutKey::SampleCollection => "sample_collection",
            TimeoutKey::RetryConfirmation => "retry_confirmation",
            TimeoutKey::TimeoutConfirmation => "timeout_confirmation",
            TimeoutKey::OverallSession => "overall_session",
            TimeoutKey::NameCollection => "name_collection",
            TimeoutKey::PausedSession => "paused_session",
            TimeoutKey::Processing => "processing",
            TimeoutKey::ProceedDelay => "proceed_delay",
        }
    }
}

/// 计时器到期时回送给状态机的数据：设定时的会话 ID 与关联 ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFire {
    pub key: TimeoutKey,
    pub session_id: String,
    /// sample_id / enrollment_id
    pub correlation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// 触发注册流程（意图命中或显式命令）
    Start {
        utterance: String,
        trigger: Trigger,
        /// 意图槽位里已经给出的姓名
        name_hint: Option<String>,
    },
    /// 用户的一句话
    Utterance(String),
    /// 查询已注册用户
    ListUsers,
    Engine(InboundEvent),
    Timer(TimerFire),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Emit(OutboundEvent),
    Speak(Dialog),
    ArmTimer {
        key: TimeoutKey,
        after: Duration,
        fire: TimerFire,
    },
    CancelTimer(TimeoutKey),
    CancelAllTimers,
}
