//! 注册会话记录
//!
//! 同一时刻只有一个会话，由状态机独占。所有可选字段显式列出，会话结束时整体丢弃，
//! 不存在"忘记清理某个字段"的问题。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::phase::Phase;
use crate::core::{EnrollError, ErrorCode};

/// 触发注册流程的来源（仅用于诊断）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    FileIntent,
    AdaptIntent,
    RememberIntent,
    Utterance,
    Retry,
    Restart,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::FileIntent => "file_intent",
            Trigger::AdaptIntent => "adapt_intent",
            Trigger::RememberIntent => "remember_intent",
            Trigger::Utterance => "utterance",
            Trigger::Retry => "retry",
            Trigger::Restart => "restart",
        }
    }
}

/// 已采集的样本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    pub sample_id: String,
    pub phrase: String,
    pub recorded_at: DateTime<Utc>,
}

/// 已发给引擎、尚未有结果的采样请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    pub sample_id: String,
    pub phrase: String,
    pub started_at: DateTime<Utc>,
}

/// 各阶段独立的重试计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryCounters {
    pub confirmation: u32,
    pub sample: u32,
    pub name: u32,
}

/// 等待用户回答的是/否问题
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingPrompt {
    /// 采样多次失败后：跳过这句继续，还是放弃
    SampleContinueOrAbort,
    /// 失败后：是否重新开始
    TryAgain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    phase: Phase,
    pub user_name: Option<String>,
    pub trigger: Trigger,
    pub target_sample_count: u32,
    pub samples: Vec<SampleRecord>,
    /// 已完成的样本序号（0 起）
    pub current_sample_index: u32,
    /// 被跳过的短语数，与序号一起决定当前短语
    pub skipped: u32,
    pub current_recording: Option<Recording>,
    pub enrollment_request_id: Option<String>,
    pub retries: RetryCounters,
    pub third_person: bool,
    pub relationship: Option<String>,
    pub error: Option<SessionError>,
    /// 是否已向引擎发送 start_enrollment
    pub engine_session_started: bool,
    pub pending: Option<PendingPrompt>,
    /// 总时长到期后正在询问是否继续
    pub session_timeout_prompt: bool,
    /// 第几次尝试（失败后重来时递增）
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
}

/// 生成短会话 ID
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

impl Session {
    pub fn new(trigger: Trigger, user_name: Option<String>, target_sample_count: u32, attempt: u32) -> Self {
        Self {
            session_id: new_session_id(),
            phase: Phase::Idle,
            user_name,
            trigger,
            target_sample_count: target_sample_count.max(1),
            samples: Vec::new(),
            current_sample_index: 0,
            skipped: 0,
            current_recording: None,
            enrollment_request_id: None,
            retries: RetryCounters::default(),
            third_person: false,
            relationship: None,
            error: None,
            engine_session_started: false,
            pending: None,
            session_timeout_prompt: false,
            attempt,
            started_at: Utc::now(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// 按迁移表改变阶段
    pub fn transition(&mut self, to: Phase) -> Result<(), EnrollError> {
        let from = self.phase;
        self.phase = from.transition_to(to)?;
        tracing::info!("Session {}: {} -> {}", self.session_id, from, to);
        Ok(())
    }

    /// 当前应朗读的短语：按 (序号 + 跳过数) 在短语表中轮换
    pub fn current_phrase<'a>(&self, phrases: &'a [String]) -> &'a str {
        if phrases.is_empty() {
            return "";
        }
        let slot = (self.current_sample_index + self.skipped) as usize % phrases.len();
        &phrases[slot]
    }

    /// 是否还有未尝试过的短语
    pub fn has_untried_phrase(&self, phrase_count: usize) -> bool {
        ((self.current_sample_index + self.skipped) as usize + 1) < phrase_count
    }

    /// 记录一个合格样本并推进序号
    pub fn record_sample(&mut self, recording: Recording) {
        self.samples.push(SampleRecord {
            sample_id: recording.sample_id,
            phrase: recording.phrase,
            recorded_at: Utc::now(),
        });
        self.current_sample_index = (self.current_sample_index + 1).min(self.target_sample_count);
        self.retries.sample = 0;
    }

    pub fn samples_complete(&self) -> bool {
        self.samples.len() as u32 >= self.target_sample_count
    }

    /// 正在采集的样本 ID 是否为 `sample_id`
    pub fn is_recording(&self, sample_id: &str) -> bool {
        self.current_recording
            .as_ref()
            .is_some_and(|r| r.sample_id == sample_id)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            session_id: Some(self.session_id.clone()),
            user_name: self.user_name.clone(),
            samples_collected: self.samples.len() as u32,
            target_samples: self.target_sample_count,
            third_person: self.third_person,
            error_code: self.error.as_ref().map(|e| e.code.as_str()),
        }
    }
}

/// 供外部观察的轻量状态投影
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub session_id: Option<String>,
    pub user_name: Option<String>,
    pub samples_collected: u32,
    pub target_samples: u32,
    pub third_person: bool,
    pub error_code: Option<&'static str>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            session_id: None,
            user_name: None,
            samples_collected: 0,
            target_samples: 0,
            third_person: false,
            error_code: None,
        }
    }
}
