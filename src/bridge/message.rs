//! 总线消息信封与编解码
//!
//! 信封格式 `{"type": "<topic>", "data": {...}}`，与语音助手消息总线一致。

use serde::{Deserialize, Serialize};

use super::event::{InboundEvent, OutboundEvent};
use crate::core::EnrollError;

/// 总线主题
pub mod topics {
    pub const START_ENROLLMENT: &str = "omva.voiceid.start_enrollment";
    pub const COLLECT_SAMPLE: &str = "omva.voiceid.collect_sample";
    pub const STOP_SAMPLE_COLLECTION: &str = "omva.voiceid.stop_sample_collection";
    pub const SESSION_EXPIRED: &str = "omva.voiceid.session_expired";
    pub const ENROLL_USER: &str = "ovos.voiceid.enroll_user";
    pub const LIST_USERS: &str = "ovos.voiceid.list_users";

    pub const SAMPLE_COLLECTED: &str = "omva.voiceid.sample.collected";
    pub const ENROLL_RESPONSE: &str = "ovos.voiceid.enroll.response";
    pub const USERS_RESPONSE: &str = "ovos.voiceid.users.response";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default = "empty_object")]
    pub data: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl BusMessage {
    pub fn new(msg_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            data,
        }
    }

    pub fn to_json(&self) -> Result<String, EnrollError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(line: &str) -> Result<Self, EnrollError> {
        Ok(serde_json::from_str(line)?)
    }
}

/// 出站事件 -> 总线消息
pub fn encode(event: &OutboundEvent) -> Result<BusMessage, EnrollError> {
    let (topic, data) = match event {
        OutboundEvent::StartSession(p) => (topics::START_ENROLLMENT, serde_json::to_value(p)?),
        OutboundEvent::CollectSample(p) => (topics::COLLECT_SAMPLE, serde_json::to_value(p)?),
        OutboundEvent::StopSample(p) => (topics::STOP_SAMPLE_COLLECTION, serde_json::to_value(p)?),
        OutboundEvent::SubmitEnrollment(p) => (topics::ENROLL_USER, serde_json::to_value(p)?),
        OutboundEvent::ListUsers => (topics::LIST_USERS, empty_object()),
        OutboundEvent::SessionExpired(p) => (topics::SESSION_EXPIRED, serde_json::to_value(p)?),
    };
    Ok(BusMessage::new(topic, data))
}

/// 总线消息 -> 入站事件；不关心的主题返回 `Ok(None)`
pub fn decode(message: &BusMessage) -> Result<Option<InboundEvent>, EnrollError> {
    let data = message.data.clone();
    let event = match message.msg_type.as_str() {
        topics::SAMPLE_COLLECTED => {
            require(message, "sample_id")?;
            require(message, "quality_ok")?;
            InboundEvent::SampleCollected(serde_json::from_value(data)?)
        }
        topics::ENROLL_RESPONSE => InboundEvent::EnrollmentResult(serde_json::from_value(data)?),
        topics::USERS_RESPONSE => InboundEvent::UserList(serde_json::from_value(data)?),
        other => {
            tracing::debug!("Ignoring bus message '{}'", other);
            return Ok(None);
        }
    };
    Ok(Some(event))
}

fn require(message: &BusMessage, field: &'static str) -> Result<(), EnrollError> {
    if message.data.get(field).is_some() {
        Ok(())
    } else {
        Err(EnrollError::MissingField {
            msg_type: message.msg_type.clone(),
            field,
        })
    }
}
