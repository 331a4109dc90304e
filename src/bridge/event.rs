//! 与声纹引擎往来的事件
//!
//! 出站事件只发不等；入站事件按 sample_id / enrollment_id 与当前会话对应。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSession {
    pub session_id: String,
    pub user_id: String,
    pub target_samples: u32,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectSample {
    pub session_id: String,
    pub sample_id: String,
    pub phrase: String,
    pub sample_number: u32,
    pub total_samples: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopSample {
    pub session_id: String,
    pub sample_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitEnrollment {
    pub user_id: String,
    pub session_id: String,
    pub enrollment_id: String,
    pub sample_count: u32,
    pub sample_phrases: Vec<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionExpired {
    pub session_id: String,
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// 出站事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    StartSession(StartSession),
    CollectSample(CollectSample),
    StopSample(StopSample),
    SubmitEnrollment(SubmitEnrollment),
    ListUsers,
    SessionExpired(SessionExpired),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleCollected {
    pub sample_id: String,
    pub quality_ok: bool,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentResult {
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub enrollment_id: Option<String>,
    #[serde(default)]
    pub samples_processed: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
    /// 引擎提供结构化错误码时优先使用
    #[serde(default)]
    pub error_code: Option<String>,
}

impl EnrollmentResult {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserList {
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub total_users: Option<usize>,
    #[serde(default)]
    pub model_info: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl UserList {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    pub fn total(&self) -> usize {
        self.total_users.unwrap_or(self.users.len())
    }
}

fn default_status() -> String {
    "error".to_string()
}

/// 入站事件
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    SampleCollected(SampleCollected),
    EnrollmentResult(EnrollmentResult),
    UserList(UserList),
}
