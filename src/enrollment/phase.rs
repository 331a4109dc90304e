//! 注册会话阶段与合法迁移表

use serde::Serialize;

use crate::core::EnrollError;

/// 会话阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    /// 等待用户确认开始
    Confirmation,
    /// 第三人称注册，等待对方姓名
    ThirdPersonNameCollection,
    NameCollection,
    SampleCollection,
    /// 采样中途暂停
    Paused,
    /// 已提交批量注册，等待引擎结果
    Processing,
    Completed,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Confirmation => "confirmation",
            Phase::ThirdPersonNameCollection => "third_person_name_collection",
            Phase::NameCollection => "name_collection",
            Phase::SampleCollection => "sample_collection",
            Phase::Paused => "paused",
            Phase::Processing => "processing",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }

    /// 是否允许迁移到 `target`；任何非 Idle 阶段都可以被取消回到 Idle。
    /// Failed -> Completed 对应处理超时后迟到的成功结果
    pub fn can_transition_to(&self, target: &Self) -> bool {
        use Phase::*;
        if *target == Idle {
            return *self != Idle;
        }
        matches!(
            (self, target),
            (Idle, Confirmation)
                | (Idle, ThirdPersonNameCollection)
                | (ThirdPersonNameCollection, Confirmation)
                | (Confirmation, NameCollection)
                | (Confirmation, SampleCollection)
                | (NameCollection, SampleCollection)
                | (SampleCollection, Paused)
                | (SampleCollection, Processing)
                | (SampleCollection, Failed)
                | (Paused, SampleCollection)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Completed)
        )
    }

    pub fn valid_transitions(&self) -> Vec<Self> {
        use Phase::*;
        match self {
            Idle => vec![Confirmation, ThirdPersonNameCollection],
            Confirmation => vec![NameCollection, SampleCollection, Idle],
            ThirdPersonNameCollection => vec![Confirmation, Idle],
            NameCollection => vec![SampleCollection, Idle],
            SampleCollection => vec![Paused, Processing, Failed, Idle],
            Paused => vec![SampleCollection, Idle],
            Processing => vec![Completed, Failed, Idle],
            Completed => vec![Idle],
            Failed => vec![Completed, Idle],
        }
    }

    /// 校验后迁移
    pub fn transition_to(&self, target: Self) -> Result<Self, EnrollError> {
        if self.can_transition_to(&target) {
            Ok(target)
        } else {
            Err(EnrollError::IllegalTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// 等待用户说出姓名的阶段
    pub fn is_collecting_name(&self) -> bool {
        matches!(self, Phase::NameCollection | Phase::ThirdPersonNameCollection)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
