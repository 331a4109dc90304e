//! 对话提示
//!
//! 状态机只产出 `Dialog { key, params }`，真正的语音合成在外部。
//! `render` 提供英文模板，供命令行宿主打印"将要说的话"。

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogKey {
    EnrollmentStartWithName,
    EnrollmentStartNoName,
    ConfirmEnrollment,
    EnrollmentCancelled,
    EnrollmentAborted,
    RequestName,
    RequestThirdPersonName,
    NameInvalid,
    NameTitleUnsupported,
    NameConfirmed,
    NameCollectionFailed,
    ReadyForSamples,
    SamplePrompt,
    SampleAccepted,
    SampleQualityPoor,
    RecordingTimeout,
    SampleContinueOrAbort,
    SampleSkipped,
    EarlyFinish,
    SamplesComplete,
    EnrollmentSuccess,
    ErrorAudioQuality,
    ErrorProcessingFailed,
    ErrorNetwork,
    ErrorPluginUnavailable,
    ErrorUserExists,
    ErrorGeneral,
    AskTryAgain,
    TooManyAttempts,
    SessionTimeoutPrompt,
    SessionExtended,
    SessionExpired,
    EnrollmentPaused,
    EnrollmentResumed,
    CheckingEnrolledUsers,
    NoEnrolledUsers,
    OneEnrolledUser,
    MultipleEnrolledUsers,
    ManyEnrolledUsers,
    ErrorCheckingUsers,
}

impl DialogKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogKey::EnrollmentStartWithName => "enrollment_start_with_name",
            DialogKey::EnrollmentStartNoName => "enrollment_start_no_name",
            DialogKey::ConfirmEnrollment => "confirm_enrollment",
            DialogKey::EnrollmentCancelled => "enrollment_cancelled",
            DialogKey::EnrollmentAborted => "enrollment_aborted",
            DialogKey::RequestName => "request_name",
            DialogKey::RequestThirdPersonName => "request_third_person_name",
            DialogKey::NameInvalid => "name_invalid",
            DialogKey::NameTitleUnsupported => "name_title_unsupported",
            DialogKey::NameConfirmed => "name_confirmed",
            DialogKey::NameCollectionFailed => "name_collection_failed",
            DialogKey::ReadyForSamples => "ready_for_samples",
            DialogKey::SamplePrompt => "sample_prompt",
            DialogKey::SampleAccepted => "sample_accepted",
            DialogKey::SampleQualityPoor => "sample_quality_poor",
            DialogKey::RecordingTimeout => "recording_timeout",
            DialogKey::SampleContinueOrAbort => "sample_continue_or_abort",
            DialogKey::SampleSkipped => "sample_skipped",
            DialogKey::EarlyFinish => "early_finish",
            DialogKey::SamplesComplete => "samples_complete",
            DialogKey::EnrollmentSuccess => "enrollment_success",
            DialogKey::ErrorAudioQuality => "error_audio_quality",
            DialogKey::ErrorProcessingFailed => "error_processing_failed",
            DialogKey::ErrorNetwork => "error_network",
            DialogKey::ErrorPluginUnavailable => "error_plugin_unavailable",
            DialogKey::ErrorUserExists => "error_user_exists",
            DialogKey::ErrorGeneral => "error_general",
            DialogKey::AskTryAgain => "ask_try_again",
            DialogKey::TooManyAttempts => "too_many_attempts",
            DialogKey::SessionTimeoutPrompt => "session_timeout_prompt",
            DialogKey::SessionExtended => "session_extended",
            DialogKey::SessionExpired => "session_expired",
            DialogKey::EnrollmentPaused => "enrollment_paused",
            DialogKey::EnrollmentResumed => "enrollment_resumed",
            DialogKey::CheckingEnrolledUsers => "checking_enrolled_users",
            DialogKey::NoEnrolledUsers => "no_enrolled_users",
            DialogKey::OneEnrolledUser => "one_enrolled_user",
            DialogKey::MultipleEnrolledUsers => "multiple_enrolled_users",
            DialogKey::ManyEnrolledUsers => "many_enrolled_users",
            DialogKey::ErrorCheckingUsers => "error_checking_users",
        }
    }

    /// 失败时朗读的错误提示
    pub fn for_error(code: ErrorCode) -> Self {
        match code {
            ErrorCode::AudioQualityPoor => DialogKey::ErrorAudioQuality,
            ErrorCode::ProcessingFailed => DialogKey::ErrorProcessingFailed,
            ErrorCode::NetworkError => DialogKey::ErrorNetwork,
            ErrorCode::PluginUnavailable => DialogKey::ErrorPluginUnavailable,
            ErrorCode::UserExists => DialogKey::ErrorUserExists,
            ErrorCode::InvalidName | ErrorCode::SampleCountInsufficient => DialogKey::ErrorGeneral,
        }
    }

    fn template(&self) -> &'static str {
        match self {
            DialogKey::EnrollmentStartWithName => {
                "I'll set up voice recognition for {name}. Shall we begin?"
            }
            DialogKey::EnrollmentStartNoName => "I'll set up voice recognition for you. Shall we begin?",
            DialogKey::ConfirmEnrollment => "Should I start the voice enrollment? Please say yes or no.",
            DialogKey::EnrollmentCancelled => "Voice enrollment cancelled.",
            DialogKey::EnrollmentAborted => "Okay, I've stopped the voice enrollment.",
            DialogKey::RequestName => "What name should I use for this voice?",
            DialogKey::RequestThirdPersonName => "What is your {relationship}'s name?",
            DialogKey::NameInvalid => "Sorry, I didn't catch a valid name.",
            DialogKey::NameTitleUnsupported => {
                "I can't use the title {title}. Please say the name without it."
            }
            DialogKey::NameConfirmed => "Got it, {name}.",
            DialogKey::NameCollectionFailed => {
                "I couldn't get a name, so I'll stop the enrollment for now."
            }
            DialogKey::ReadyForSamples => {
                "{name}, I'll need {count} voice samples. Please read each phrase after the prompt."
            }
            DialogKey::SamplePrompt => "Sample {number} of {total}. Please say: {phrase}",
            DialogKey::SampleAccepted => "Sample {number} of {total} recorded.",
            DialogKey::SampleQualityPoor => "That recording wasn't clear enough. Let's try again.",
            DialogKey::RecordingTimeout => "I didn't hear anything.",
            DialogKey::SampleContinueOrAbort => {
                "I'm having trouble with this phrase. Should I skip it and continue?"
            }
            DialogKey::SampleSkipped => "Let's try a different phrase.",
            DialogKey::EarlyFinish => "That's enough. I'll use the {count} samples we have.",
            DialogKey::SamplesComplete => "All {count} samples recorded for {name}. Processing now.",
            DialogKey::EnrollmentSuccess => {
                "Done! I'll recognise {name}'s voice from now on, using {samples} samples."
            }
            DialogKey::ErrorAudioQuality => "The audio quality was too poor to enroll.",
            DialogKey::ErrorProcessingFailed => "Something went wrong while processing the voice samples.",
            DialogKey::ErrorNetwork => "I couldn't reach the voice recognition service.",
            DialogKey::ErrorPluginUnavailable => "Voice recognition isn't available right now.",
            DialogKey::ErrorUserExists => "That name is already enrolled.",
            DialogKey::ErrorGeneral => "The voice enrollment didn't work.",
            DialogKey::AskTryAgain => "Would you like to try again?",
            DialogKey::TooManyAttempts => "That didn't work after several attempts. Let's try another time.",
            DialogKey::SessionTimeoutPrompt => "This is taking a while. Do you want to continue?",
            DialogKey::SessionExtended => "Okay, let's keep going.",
            DialogKey::SessionExpired => "The voice enrollment has timed out.",
            DialogKey::EnrollmentPaused => "Enrollment paused. Say resume when you're ready.",
            DialogKey::EnrollmentResumed => "Resuming the enrollment.",
            DialogKey::CheckingEnrolledUsers => "Let me check who is enrolled.",
            DialogKey::NoEnrolledUsers => "No voices are enrolled yet.",
            DialogKey::OneEnrolledUser => "One voice is enrolled: {name}.",
            DialogKey::MultipleEnrolledUsers => "{count} voices are enrolled: {users}.",
            DialogKey::ManyEnrolledUsers => "{count} voices are enrolled.",
            DialogKey::ErrorCheckingUsers => "I couldn't check the enrolled voices.",
        }
    }
}

/// 一次朗读：对话键 + 参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dialog {
    pub key: DialogKey,
    pub params: BTreeMap<&'static str, String>,
}

impl Dialog {
    pub fn new(key: DialogKey) -> Self {
        Self {
            key,
            params: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &'static str, value: impl ToString) -> Self {
        self.params.insert(name, value.to_string());
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// 用英文模板渲染；缺失的参数原样保留占位符
    pub fn render(&self) -> String {
        let mut text = self.key.template().to_string();
        for (name, value) in &self.params {
            text = text.replace(&format!("{{{}}}", name), value);
        }
        text
    }
}

/// "A, B and C"
pub fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}
