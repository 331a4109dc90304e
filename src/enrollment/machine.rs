//! 注册会话状态机
//!
//! 独占唯一的会话记录，每次处理一个输入（用户话语、引擎回报、计时器到期），
//! 返回需要执行的副作用。不做 I/O，也不向外抛错：所有失败都落到 Failed 阶段并朗读提示。
//!
//! 话语的处理顺序：
//! 1. 空闲时：查询已注册用户 / 注册请求
//! 2. 全局打断：取消、重来（先于任何阶段处理）
//! 3. 会话总时长到期后的"是否继续"
//! 4. 挂起的是/否问题（跳过短语 / 失败重试）
//! 5. 当前阶段的处理

use std::time::Duration;

use chrono::Utc;

use super::dialog::{join_names, Dialog, DialogKey};
use super::effect::{Effect, Input, TimeoutKey, TimerFire};
use super::phase::Phase;
use super::session::{PendingPrompt, Recording, Session, SessionError, SessionSnapshot, Trigger};
use crate::bridge::event::{
    CollectSample, EnrollmentResult, SampleCollected, SessionExpired, StartSession, StopSample,
    SubmitEnrollment, UserList,
};
use crate::bridge::{InboundEvent, OutboundEvent};
use crate::config::{AppConfig, EnrollmentSection, TimeoutsSection};
use crate::core::ErrorCode;
use crate::nlu::{name, NameExtractor, Reply, ReplyClassifier, Vocabulary};

/// 状态机使用的注册参数
#[derive(Debug, Clone)]
pub struct MachineSettings {
    pub target_samples: u32,
    pub confirmation_required: bool,
    pub max_retries: u32,
    pub min_samples_for_early_finish: u32,
    pub sample_phrases: Vec<String>,
    pub timeouts: TimeoutsSection,
}

impl From<&EnrollmentSection> for MachineSettings {
    fn from(section: &EnrollmentSection) -> Self {
        let section = section.clone().sanitized();
        Self {
            target_samples: section.target_samples,
            confirmation_required: section.confirmation_required,
            max_retries: section.max_retries,
            min_samples_for_early_finish: section.min_samples_for_early_finish,
            sample_phrases: section.sample_phrases,
            timeouts: section.timeouts,
        }
    }
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self::from(&EnrollmentSection::default())
    }
}

impl MachineSettings {
    pub fn timeout(&self, key: TimeoutKey) -> Duration {
        let t = &self.timeouts;
        match key {
            TimeoutKey::Confirmation => t.confirmation(),
            TimeoutKey::SampleCollection => t.sample_collection(),
            TimeoutKey::RetryConfirmation => t.retry_confirmation(),
            TimeoutKey::TimeoutConfirmation => t.timeout_confirmation(),
            TimeoutKey::OverallSession => t.overall_session(),
            TimeoutKey::NameCollection => t.name_collection(),
            TimeoutKey::PausedSession => t.paused_session(),
            TimeoutKey::Processing => t.processing(),
            TimeoutKey::ProceedDelay => t.proceed_delay(),
        }
    }
}

pub struct EnrollmentMachine {
    settings: MachineSettings,
    extractor: NameExtractor,
    replies: ReplyClassifier,
    bus_available: bool,
    session: Option<Session>,
    enrolled_users: Vec<String>,
    model_info: Option<serde_json::Value>,
    effects: Vec<Effect>,
}

impl EnrollmentMachine {
    pub fn new(settings: MachineSettings, vocab: Option<&Vocabulary>, bus_available: bool) -> Self {
        let extractor = NameExtractor::from_locale(vocab);
        let replies = match vocab {
            Some(v) if v.first_empty_list().is_none() => ReplyClassifier::new(v),
            _ => ReplyClassifier::new(&Vocabulary::english()),
        };
        Self {
            settings,
            extractor,
            replies,
            bus_available,
            session: None,
            enrolled_users: Vec::new(),
            model_info: None,
            effects: Vec::new(),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            MachineSettings::from(&cfg.enrollment),
            cfg.locale.vocabulary.as_ref(),
            cfg.bus.enabled,
        )
    }

    pub fn settings(&self) -> &MachineSettings {
        &self.settings
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.session.as_ref().map_or(Phase::Idle, Session::phase)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session
            .as_ref()
            .map(Session::snapshot)
            .unwrap_or_default()
    }

    pub fn set_bus_available(&mut self, available: bool) {
        self.bus_available = available;
    }

    /// 最近一次查询到的已注册用户
    pub fn enrolled_users(&self) -> &[String] {
        &self.enrolled_users
    }

    pub fn model_info(&self) -> Option<&serde_json::Value> {
        self.model_info.as_ref()
    }

    /// 处理一个输入，返回待执行的副作用
    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        match input {
            Input::Start {
                utterance,
                trigger,
                name_hint,
            } => self.start_flow(&utterance, trigger, name_hint.as_deref(), 1),
            Input::Utterance(text) => self.on_utterance(&text),
            Input::ListUsers => self.list_users(),
            Input::Engine(event) => self.on_engine(event),
            Input::Timer(fire) => self.on_timer(fire),
        }
        std::mem::take(&mut self.effects)
    }

    /// 宿主退出：结束当前会话并通知引擎
    pub fn shutdown(&mut self) -> Vec<Effect> {
        if self.session.is_some() {
            tracing::info!("Shutting down with an active enrollment session");
        }
        self.teardown(Some("shutdown"));
        std::mem::take(&mut self.effects)
    }

    // ---- 副作用 ----

    fn speak(&mut self, dialog: Dialog) {
        self.effects.push(Effect::Speak(dialog));
    }

    fn say(&mut self, key: DialogKey) {
        self.speak(Dialog::new(key));
    }

    fn emit(&mut self, event: OutboundEvent) {
        self.effects.push(Effect::Emit(event));
    }

    fn arm(&mut self, key: TimeoutKey, correlation: Option<String>) {
        let Some(session) = &self.session else { return };
        let fire = TimerFire {
            key,
            session_id: session.session_id.clone(),
            correlation,
        };
        let after = self.settings.timeout(key);
        self.effects.push(Effect::ArmTimer { key, after, fire });
    }

    fn cancel(&mut self, key: TimeoutKey) {
        self.effects.push(Effect::CancelTimer(key));
    }

    /// 迁移阶段；非法迁移只记录错误，不中断处理
    fn enter(&mut self, to: Phase) {
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.transition(to) {
                tracing::error!("{}", e);
            }
        }
    }

    /// 结束会话：取消全部计时器；`reason` 非空且引擎已开始会话时通知引擎
    fn teardown(&mut self, reason: Option<&str>) {
        self.effects.push(Effect::CancelAllTimers);
        let Some(mut session) = self.session.take() else { return };
        if let (true, Some(reason)) = (session.engine_session_started, reason) {
            self.emit(OutboundEvent::SessionExpired(SessionExpired {
                session_id: session.session_id.clone(),
                user_name: session.user_name.clone(),
                reason: Some(reason.to_string()),
            }));
        }
        if session.phase() != Phase::Idle {
            if let Err(e) = session.transition(Phase::Idle) {
                tracing::debug!("{}", e);
            }
        }
        tracing::info!("Session {} ended", session.session_id);
    }

    // ---- 开始 ----

    fn start_flow(&mut self, utterance: &str, trigger: Trigger, name_hint: Option<&str>, attempt: u32) {
        if !self.bus_available {
            tracing::warn!("Voice ID engine not attached, cannot start enrollment");
            self.say(DialogKey::ErrorPluginUnavailable);
            return;
        }

        if let Some(old) = self.session.take() {
            tracing::info!("Session {} superseded by a new enrollment", old.session_id);
            if old.engine_session_started {
                self.emit(OutboundEvent::SessionExpired(SessionExpired {
                    session_id: old.session_id,
                    user_name: old.user_name,
                    reason: Some("superseded".to_string()),
                }));
            }
        }
        self.effects.push(Effect::CancelAllTimers);

        let extraction = self.extractor.extract(utterance);
        let hinted = name_hint
            .map(name::normalize)
            .filter(|n| name::validate(n));
        let mut user_name = hinted.or(extraction.name);
        if let Some(title) = user_name.as_deref().and_then(name::unsupported_title) {
            self.speak(Dialog::new(DialogKey::NameTitleUnsupported).with("title", title));
            user_name = None;
        }

        let mut session = Session::new(trigger, user_name, self.settings.target_samples, attempt);
        session.third_person = extraction.third_person;
        session.relationship = extraction.relationship;
        tracing::info!(
            "Starting enrollment session {} (trigger: {}, name: {:?}, attempt: {})",
            session.session_id,
            trigger.as_str(),
            session.user_name,
            attempt
        );
        let needs_third_person_name = session.third_person && session.user_name.is_none();
        self.session = Some(session);
        self.arm(TimeoutKey::OverallSession, None);

        if needs_third_person_name {
            self.ask_third_person_name();
        } else {
            self.enter_confirmation();
        }
    }

    fn ask_third_person_name(&mut self) {
        self.enter(Phase::ThirdPersonNameCollection);
        let relationship = self
            .session
            .as_ref()
            .and_then(|s| s.relationship.clone())
            .unwrap_or_else(|| "friend".to_string());
        self.speak(Dialog::new(DialogKey::RequestThirdPersonName).with("relationship", relationship));
        self.arm(TimeoutKey::NameCollection, None);
    }

    fn enter_confirmation(&mut self) {
        self.enter(Phase::Confirmation);
        let user_name = self.session.as_ref().and_then(|s| s.user_name.clone());
        match user_name {
            Some(name) => self.speak(Dialog::new(DialogKey::EnrollmentStartWithName).with("name", name)),
            None => self.say(DialogKey::EnrollmentStartNoName),
        }
        if self.settings.confirmation_required {
            self.arm(TimeoutKey::Confirmation, None);
        } else {
            self.arm(TimeoutKey::ProceedDelay, None);
        }
    }

    /// 确认后：已知姓名直接采样，否则询问姓名
    fn proceed(&mut self) {
        self.cancel(TimeoutKey::Confirmation);
        self.cancel(TimeoutKey::ProceedDelay);
        let has_name = self.session.as_ref().is_some_and(|s| s.user_name.is_some());
        if has_name {
            self.begin_samples();
        } else {
            self.enter(Phase::NameCollection);
            self.say(DialogKey::RequestName);
            self.arm(TimeoutKey::NameCollection, None);
        }
    }

    fn begin_samples(&mut self) {
        self.enter(Phase::SampleCollection);
        let Some(session) = self.session.as_mut() else { return };
        session.engine_session_started = true;
        let user = session.user_name.clone().unwrap_or_default();
        let start = StartSession {
            session_id: session.session_id.clone(),
            user_id: user.clone(),
            target_samples: session.target_sample_count,
            timestamp: Utc::now().to_rfc3339(),
        };
        let count = session.target_sample_count;
        self.emit(OutboundEvent::StartSession(start));
        self.speak(
            Dialog::new(DialogKey::ReadyForSamples)
                .with("name", user)
                .with("count", count),
        );
        self.request_sample();
    }

    /// 请求当前序号的样本；已满则进入处理
    fn request_sample(&mut self) {
        let Some(session) = self.session.as_mut() else { return };
        if session.samples_complete() {
            self.finish_samples();
            return;
        }
        let phrase = session.current_phrase(&self.settings.sample_phrases).to_string();
        let sample_id = uuid::Uuid::new_v4().to_string();
        session.current_recording = Some(Recording {
            sample_id: sample_id.clone(),
            phrase: phrase.clone(),
            started_at: Utc::now(),
        });
        let number = session.current_sample_index + 1;
        let total = session.target_sample_count;
        let request = CollectSample {
            session_id: session.session_id.clone(),
            sample_id: sample_id.clone(),
            phrase: phrase.clone(),
            sample_number: number,
            total_samples: total,
        };
        tracing::info!("Requesting sample {}/{} ({})", number, total, sample_id);

        self.speak(
            Dialog::new(DialogKey::SamplePrompt)
                .with("number", number)
                .with("total", total)
                .with("phrase", phrase),
        );
        self.emit(OutboundEvent::CollectSample(request));
        self.arm(TimeoutKey::SampleCollection, Some(sample_id));
    }

    fn finish_samples(&mut self) {
        let Some(user) = self.session.as_ref().and_then(|s| s.user_name.clone()) else {
            self.fail(ErrorCode::InvalidName, "No user name for enrollment".to_string());
            return;
        };
        self.cancel(TimeoutKey::SampleCollection);
        self.enter(Phase::Processing);
        let Some(session) = self.session.as_mut() else { return };
        session.current_recording = None;
        let enrollment_id = uuid::Uuid::new_v4().to_string();
        session.enrollment_request_id = Some(enrollment_id.clone());
        let phrases: Vec<String> = session.samples.iter().map(|s| s.phrase.clone()).collect();
        let count = phrases.len() as u32;
        let submit = SubmitEnrollment {
            user_id: user.clone(),
            session_id: session.session_id.clone(),
            enrollment_id: enrollment_id.clone(),
            sample_count: count,
            sample_phrases: phrases,
            timestamp: Utc::now().to_rfc3339(),
        };
        tracing::info!("Submitting {} samples for {} ({})", count, user, enrollment_id);

        self.speak(
            Dialog::new(DialogKey::SamplesComplete)
                .with("name", user)
                .with("count", count),
        );
        self.emit(OutboundEvent::SubmitEnrollment(submit));
        self.arm(TimeoutKey::Processing, Some(enrollment_id));
    }

    fn fail(&mut self, code: ErrorCode, message: String) {
        tracing::error!("Enrollment failed: {} - {}", code, message);
        self.effects.push(Effect::CancelAllTimers);
        self.enter(Phase::Failed);
        let Some(session) = self.session.as_mut() else { return };
        session.current_recording = None;
        session.error = Some(SessionError { code, message });
        let retry_allowed = session.attempt <= self.settings.max_retries;
        if retry_allowed {
            session.pending = Some(PendingPrompt::TryAgain);
        }

        self.say(DialogKey::for_error(code));
        if retry_allowed {
            self.say(DialogKey::AskTryAgain);
            self.arm(TimeoutKey::RetryConfirmation, None);
        } else {
            self.say(DialogKey::TooManyAttempts);
            self.teardown(Some("failed"));
        }
    }

    // ---- 话语 ----

    fn on_utterance(&mut self, text: &str) {
        let Some((phase, timeout_prompt, pending)) = self
            .session
            .as_ref()
            .map(|s| (s.phase(), s.session_timeout_prompt, s.pending))
        else {
            self.on_idle_utterance(text);
            return;
        };

        let reply = self.replies.classify(text);
        match reply {
            Reply::Cancel => {
                tracing::info!("Cancel requested in {}", phase);
                self.say(DialogKey::EnrollmentCancelled);
                self.teardown(Some("cancelled"));
                return;
            }
            Reply::Restart => {
                tracing::info!("Restart requested in {}", phase);
                self.teardown(Some("restarted"));
                self.start_flow(text, Trigger::Restart, None, 1);
                return;
            }
            _ => {}
        }

        if timeout_prompt {
            self.on_session_timeout_reply(reply);
            return;
        }
        if let Some(pending) = pending {
            self.on_pending_reply(pending, reply);
            return;
        }

        match phase {
            Phase::Confirmation => self.on_confirmation_reply(reply),
            Phase::NameCollection | Phase::ThirdPersonNameCollection => self.on_name_utterance(text),
            Phase::SampleCollection => match reply {
                Reply::Stop => self.stop_sample(),
                Reply::Pause => self.pause(),
                _ => tracing::debug!("Ignoring utterance during sample collection"),
            },
            Phase::Paused => match reply {
                Reply::Resume | Reply::Affirm => self.resume(),
                _ => self.say(DialogKey::EnrollmentPaused),
            },
            Phase::Processing | Phase::Failed | Phase::Completed | Phase::Idle => {
                tracing::debug!("Ignoring utterance in {}", phase);
            }
        }
    }

    fn on_idle_utterance(&mut self, text: &str) {
        if self.replies.is_list_request(text) {
            self.list_users();
        } else if self.replies.is_enrollment_request(text) {
            self.start_flow(text, Trigger::Utterance, None, 1);
        } else {
            tracing::debug!("No enrollment intent in utterance");
        }
    }

    fn on_confirmation_reply(&mut self, reply: Reply) {
        match reply {
            Reply::Affirm | Reply::Resume => {
                tracing::info!("Enrollment confirmed");
                self.proceed();
            }
            Reply::Deny | Reply::Stop => {
                tracing::info!("Enrollment declined");
                self.say(DialogKey::EnrollmentCancelled);
                self.teardown(None);
            }
            _ if self.settings.confirmation_required => self.say(DialogKey::ConfirmEnrollment),
            _ => {}
        }
    }

    fn on_name_utterance(&mut self, text: &str) {
        let extraction = self.extractor.extract(text);
        match extraction.name {
            Some(candidate) => match name::unsupported_title(&candidate) {
                Some(title) => {
                    self.speak(Dialog::new(DialogKey::NameTitleUnsupported).with("title", title));
                    self.name_retry();
                }
                None => self.accept_name(candidate),
            },
            None => {
                tracing::warn!("No valid name in utterance");
                self.say(DialogKey::NameInvalid);
                self.name_retry();
            }
        }
    }

    fn accept_name(&mut self, user_name: String) {
        self.cancel(TimeoutKey::NameCollection);
        let Some(session) = self.session.as_mut() else { return };
        session.user_name = Some(user_name.clone());
        session.retries.name = 0;
        let phase = session.phase();
        tracing::info!("Valid name collected: {}", user_name);
        self.speak(Dialog::new(DialogKey::NameConfirmed).with("name", user_name));
        if phase == Phase::ThirdPersonNameCollection {
            self.enter_confirmation();
        } else {
            self.begin_samples();
        }
    }

    /// 姓名收集失败或超时：计数，未超限则重新询问
    fn name_retry(&mut self) {
        let Some(session) = self.session.as_mut() else { return };
        session.retries.name += 1;
        let attempts = session.retries.name;
        let phase = session.phase();
        let relationship = session.relationship.clone();

        if attempts > self.settings.max_retries {
            tracing::warn!("Name collection gave up after {} attempts", attempts);
            self.say(DialogKey::NameCollectionFailed);
            self.teardown(None);
            return;
        }
        if phase == Phase::ThirdPersonNameCollection {
            self.speak(
                Dialog::new(DialogKey::RequestThirdPersonName)
                    .with("relationship", relationship.unwrap_or_else(|| "friend".to_string())),
            );
        } else {
            self.say(DialogKey::RequestName);
        }
        self.arm(TimeoutKey::NameCollection, None);
    }

    fn stop_sample(&mut self) {
        let Some(session) = &self.session else { return };
        match &session.current_recording {
            Some(recording) => {
                tracing::info!("Stopping sample {} early", recording.sample_id);
                let stop = StopSample {
                    session_id: session.session_id.clone(),
                    sample_id: recording.sample_id.clone(),
                };
                self.emit(OutboundEvent::StopSample(stop));
            }
            None => tracing::debug!("Stop requested with no sample in flight"),
        }
    }

    fn pause(&mut self) {
        let Some(session) = self.session.as_mut() else { return };
        let stop = session.current_recording.take().map(|r| StopSample {
            session_id: session.session_id.clone(),
            sample_id: r.sample_id,
        });
        if let Some(stop) = stop {
            self.emit(OutboundEvent::StopSample(stop));
        }
        self.cancel(TimeoutKey::SampleCollection);
        self.enter(Phase::Paused);
        self.say(DialogKey::EnrollmentPaused);
        self.arm(TimeoutKey::PausedSession, None);
    }

    fn resume(&mut self) {
        self.cancel(TimeoutKey::PausedSession);
        self.enter(Phase::SampleCollection);
        self.say(DialogKey::EnrollmentResumed);
        self.request_sample();
    }

    fn on_session_timeout_reply(&mut self, reply: Reply) {
        match reply {
            Reply::Affirm | Reply::Resume => {
                if let Some(session) = self.session.as_mut() {
                    session.session_timeout_prompt = false;
                }
                tracing::info!("Session extended");
                self.cancel(TimeoutKey::TimeoutConfirmation);
                self.arm(TimeoutKey::OverallSession, None);
                self.say(DialogKey::SessionExtended);
            }
            Reply::Deny | Reply::Stop => {
                self.say(DialogKey::SessionExpired);
                self.teardown(Some("expired"));
            }
            _ => self.say(DialogKey::SessionTimeoutPrompt),
        }
    }

    fn on_pending_reply(&mut self, pending: PendingPrompt, reply: Reply) {
        match (pending, reply) {
            (PendingPrompt::SampleContinueOrAbort, Reply::Affirm | Reply::Resume) => {
                self.cancel(TimeoutKey::RetryConfirmation);
                self.skip_phrase();
            }
            (PendingPrompt::SampleContinueOrAbort, Reply::Deny | Reply::Stop) => {
                self.say(DialogKey::EnrollmentAborted);
                self.teardown(Some("aborted"));
            }
            (PendingPrompt::SampleContinueOrAbort, _) => self.say(DialogKey::SampleContinueOrAbort),
            (PendingPrompt::TryAgain, Reply::Affirm | Reply::Resume) => {
                self.cancel(TimeoutKey::RetryConfirmation);
                self.retry_flow();
            }
            (PendingPrompt::TryAgain, Reply::Deny | Reply::Stop) => {
                self.say(DialogKey::EnrollmentCancelled);
                self.teardown(Some("failed"));
            }
            (PendingPrompt::TryAgain, _) => self.say(DialogKey::AskTryAgain),
        }
    }

    /// 跳过当前短语：样本够数则提前结束，还有短语则换一句，否则失败
    fn skip_phrase(&mut self) {
        let phrase_count = self.settings.sample_phrases.len();
        let min_samples = self.settings.min_samples_for_early_finish.max(1);
        let Some(session) = self.session.as_mut() else { return };
        session.pending = None;
        session.retries.sample = 0;
        let collected = session.samples.len() as u32;

        if collected >= min_samples {
            tracing::info!("Finishing early with {} samples", collected);
            self.speak(Dialog::new(DialogKey::EarlyFinish).with("count", collected));
            self.finish_samples();
        } else if session.has_untried_phrase(phrase_count) {
            session.skipped += 1;
            self.say(DialogKey::SampleSkipped);
            self.request_sample();
        } else {
            let target = session.target_sample_count;
            self.fail(
                ErrorCode::SampleCountInsufficient,
                format!("Only {} of {} samples collected", collected, target),
            );
        }
    }

    /// 失败后重来：沿用已知姓名，尝试次数加一；引擎端的旧会话先行结束
    fn retry_flow(&mut self) {
        let Some(old) = self.session.take() else { return };
        tracing::info!("Retrying enrollment (attempt {})", old.attempt + 1);
        if old.engine_session_started {
            self.emit(OutboundEvent::SessionExpired(SessionExpired {
                session_id: old.session_id.clone(),
                user_name: old.user_name.clone(),
                reason: Some("retry".to_string()),
            }));
        }
        self.start_flow("", Trigger::Retry, old.user_name.as_deref(), old.attempt + 1);
    }

    // ---- 引擎回报 ----

    fn on_engine(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::SampleCollected(result) => self.on_sample_collected(result),
            InboundEvent::EnrollmentResult(result) => self.on_enrollment_result(result),
            InboundEvent::UserList(list) => self.on_user_list(list),
        }
    }

    fn on_sample_collected(&mut self, result: SampleCollected) {
        let Some(session) = self.session.as_mut() else {
            tracing::debug!("Sample {} arrived with no active session", result.sample_id);
            return;
        };
        let same_session = result
            .session_id
            .as_deref()
            .map_or(true, |id| id == session.session_id);
        if session.phase() != Phase::SampleCollection || !same_session || !session.is_recording(&result.sample_id) {
            tracing::debug!("Dropping stale sample result {}", result.sample_id);
            return;
        }
        let Some(recording) = session.current_recording.take() else { return };

        if result.quality_ok {
            session.record_sample(recording);
            let number = session.samples.len();
            let total = session.target_sample_count;
            let complete = session.samples_complete();
            tracing::info!("Sample {}/{} accepted", number, total);
            self.cancel(TimeoutKey::SampleCollection);
            self.speak(
                Dialog::new(DialogKey::SampleAccepted)
                    .with("number", number)
                    .with("total", total),
            );
            if complete {
                self.finish_samples();
            } else {
                self.request_sample();
            }
        } else {
            tracing::warn!("Sample {} rejected for poor quality", result.sample_id);
            self.cancel(TimeoutKey::SampleCollection);
            self.say(DialogKey::SampleQualityPoor);
            self.sample_retry();
        }
    }

    /// 样本超时或质量差：同一短语重试，超过上限后询问跳过还是放弃
    fn sample_retry(&mut self) {
        let Some(session) = self.session.as_mut() else { return };
        session.retries.sample += 1;
        if session.retries.sample <= self.settings.max_retries {
            self.request_sample();
        } else {
            session.pending = Some(PendingPrompt::SampleContinueOrAbort);
            self.cancel(TimeoutKey::SampleCollection);
            self.say(DialogKey::SampleContinueOrAbort);
            self.arm(TimeoutKey::RetryConfirmation, None);
        }
    }

    fn on_enrollment_result(&mut self, result: EnrollmentResult) {
        let Some(session) = &self.session else {
            tracing::debug!("Enrollment result with no active session");
            return;
        };
        let phase = session.phase();
        if !matches!(phase, Phase::Processing | Phase::Failed) {
            tracing::debug!("Ignoring enrollment result in {}", phase);
            return;
        }
        // 只有处理中且尚未记录批次编号时才放宽匹配；失败阶段必须对上已提交的批次
        let accepted = match session.enrollment_request_id.as_deref() {
            Some(stored) => result.enrollment_id.as_deref() == Some(stored),
            None => phase == Phase::Processing,
        };
        if !accepted {
            tracing::debug!(
                "Ignoring enrollment result for {:?} (expected {:?})",
                result.enrollment_id,
                session.enrollment_request_id
            );
            return;
        }

        if result.is_success() {
            let name = result
                .user_id
                .or_else(|| session.user_name.clone())
                .unwrap_or_else(|| "Unknown".to_string());
            let samples = result
                .samples_processed
                .unwrap_or(session.samples.len() as u32);
            tracing::info!("Enrollment completed successfully for {}", name);
            self.effects.push(Effect::CancelAllTimers);
            self.enter(Phase::Completed);
            self.speak(
                Dialog::new(DialogKey::EnrollmentSuccess)
                    .with("name", name)
                    .with("samples", samples),
            );
            self.teardown(None);
        } else if phase == Phase::Processing {
            let message = result.message.unwrap_or_else(|| "Unknown error".to_string());
            let code = result
                .error_code
                .as_deref()
                .and_then(ErrorCode::parse)
                .unwrap_or_else(|| ErrorCode::from_engine_message(&message));
            self.fail(code, message);
        } else {
            tracing::debug!("Ignoring error result, session already failed");
        }
    }

    fn on_user_list(&mut self, list: UserList) {
        if !list.is_success() {
            tracing::warn!(
                "Failed to get enrolled users: {} - {:?}",
                list.status,
                list.message
            );
            self.say(DialogKey::ErrorCheckingUsers);
            return;
        }

        let total = list.total();
        tracing::info!("Voice ID engine has {} enrolled users", total);
        let dialog = match total {
            0 => Dialog::new(DialogKey::NoEnrolledUsers),
            1 => Dialog::new(DialogKey::OneEnrolledUser).with(
                "name",
                list.users.first().cloned().unwrap_or_else(|| "someone".to_string()),
            ),
            2..=3 if list.users.len() >= total => Dialog::new(DialogKey::MultipleEnrolledUsers)
                .with("count", total)
                .with("users", join_names(&list.users[..total])),
            _ => Dialog::new(DialogKey::ManyEnrolledUsers).with("count", total),
        };
        self.speak(dialog);
        self.enrolled_users = list.users;
        self.model_info = list.model_info;
    }

    fn list_users(&mut self) {
        if !self.bus_available {
            self.say(DialogKey::ErrorPluginUnavailable);
            return;
        }
        self.emit(OutboundEvent::ListUsers);
        self.say(DialogKey::CheckingEnrolledUsers);
    }

    // ---- 计时器 ----

    fn on_timer(&mut self, fire: TimerFire) {
        let Some(session) = self.session.as_mut() else {
            tracing::debug!("Timer {} fired with no active session", fire.key.as_str());
            return;
        };
        if session.session_id != fire.session_id {
            tracing::debug!(
                "Dropping timer {} for stale session {}",
                fire.key.as_str(),
                fire.session_id
            );
            return;
        }
        let phase = session.phase();
        let recording_matches = fire
            .correlation
            .as_deref()
            .is_some_and(|id| session.is_recording(id));
        let processing_matches =
            fire.correlation.is_some() && fire.correlation == session.enrollment_request_id;
        let pending = session.pending;
        let timeout_prompt = session.session_timeout_prompt;

        match fire.key {
            TimeoutKey::Confirmation if phase == Phase::Confirmation => {
                session.retries.confirmation += 1;
                if session.retries.confirmation <= self.settings.max_retries {
                    tracing::warn!("Confirmation timed out, asking again");
                    self.say(DialogKey::ConfirmEnrollment);
                    self.arm(TimeoutKey::Confirmation, None);
                } else {
                    tracing::warn!("Confirmation timed out, cancelling");
                    self.say(DialogKey::EnrollmentCancelled);
                    self.teardown(None);
                }
            }
            TimeoutKey::ProceedDelay if phase == Phase::Confirmation => self.proceed(),
            TimeoutKey::NameCollection if phase.is_collecting_name() => {
                tracing::warn!("Name collection timed out");
                self.name_retry();
            }
            TimeoutKey::SampleCollection if phase == Phase::SampleCollection && recording_matches => {
                tracing::warn!("Sample collection timed out");
                session.current_recording = None;
                self.say(DialogKey::RecordingTimeout);
                self.sample_retry();
            }
            TimeoutKey::RetryConfirmation => match pending {
                Some(PendingPrompt::SampleContinueOrAbort) => {
                    self.say(DialogKey::EnrollmentAborted);
                    self.teardown(Some("aborted"));
                }
                Some(PendingPrompt::TryAgain) => {
                    self.say(DialogKey::EnrollmentCancelled);
                    self.teardown(Some("failed"));
                }
                None => tracing::debug!("Retry confirmation timer with nothing pending"),
            },
            TimeoutKey::TimeoutConfirmation if timeout_prompt => {
                self.say(DialogKey::SessionExpired);
                self.teardown(Some("expired"));
            }
            TimeoutKey::OverallSession => {
                tracing::warn!("Session {} exceeded its time limit", fire.session_id);
                session.session_timeout_prompt = true;
                self.say(DialogKey::SessionTimeoutPrompt);
                self.arm(TimeoutKey::TimeoutConfirmation, None);
            }
            TimeoutKey::PausedSession if phase == Phase::Paused => {
                tracing::warn!("Paused session timed out");
                self.say(DialogKey::SessionExpired);
                self.teardown(Some("paused_timeout"));
            }
            TimeoutKey::Processing if phase == Phase::Processing && processing_matches => {
                tracing::warn!("Processing timeout for enrollment {:?}", fire.correlation);
                self.fail(ErrorCode::ProcessingFailed, "Processing timeout".to_string());
            }
            key => tracing::debug!("Timer {} no longer relevant in {}", key.as_str(), phase),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> EnrollmentMachine {
        EnrollmentMachine::new(MachineSettings::default(), None, true)
    }

    fn spoken(effects: &[Effect]) -> Vec<DialogKey> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Speak(d) => Some(d.key),
                _ => None,
            })
            .collect()
    }

    fn dialog(effects: &[Effect], key: DialogKey) -> Dialog {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::Speak(d) if d.key == key => Some(d.clone()),
                _ => None,
            })
            .unwrap()
    }

    fn emitted(effects: &[Effect]) -> Vec<OutboundEvent> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Emit(ev) => Some(ev.clone()),
                _ => None,
            })
            .collect()
    }

    fn armed(effects: &[Effect], key: TimeoutKey) -> Option<TimerFire> {
        effects.iter().rev().find_map(|e| match e {
            Effect::ArmTimer { key: k, fire, .. } if *k == key => Some(fire.clone()),
            _ => None,
        })
    }

    fn requested_sample(effects: &[Effect]) -> CollectSample {
        effects
            .iter()
            .rev()
            .find_map(|e| match e {
                Effect::Emit(OutboundEvent::CollectSample(c)) => Some(c.clone()),
                _ => None,
            })
            .unwrap()
    }

    fn start(m: &mut EnrollmentMachine, utterance: &str) -> Vec<Effect> {
        m.handle(Input::Start {
            utterance: utterance.to_string(),
            trigger: Trigger::FileIntent,
            name_hint: None,
        })
    }

    fn say(m: &mut EnrollmentMachine, text: &str) -> Vec<Effect> {
        m.handle(Input::Utterance(text.to_string()))
    }

    fn sample_result(m: &mut EnrollmentMachine, sample_id: &str, quality_ok: bool) -> Vec<Effect> {
        m.handle(Input::Engine(InboundEvent::SampleCollected(SampleCollected {
            sample_id: sample_id.to_string(),
            quality_ok,
            session_id: None,
        })))
    }

    fn result(status: &str, enrollment_id: Option<&str>, message: Option<&str>) -> Input {
        Input::Engine(InboundEvent::EnrollmentResult(EnrollmentResult {
            status: status.to_string(),
            user_id: None,
            enrollment_id: enrollment_id.map(str::to_string),
            samples_processed: None,
            message: message.map(str::to_string),
            error_code: None,
        }))
    }

    /// 开始并确认，进入采样阶段
    fn into_samples(m: &mut EnrollmentMachine) -> Vec<Effect> {
        start(m, "enroll my voice as Dr. Jean-Luc");
        let effects = say(m, "yes");
        assert_eq!(m.phase(), Phase::SampleCollection);
        effects
    }

    /// 采满全部样本，返回最后一批副作用
    fn collect_all(m: &mut EnrollmentMachine, mut effects: Vec<Effect>) -> Vec<Effect> {
        while m.phase() == Phase::SampleCollection {
            let sample = requested_sample(&effects);
            effects = sample_result(m, &sample.sample_id, true);
        }
        effects
    }

    fn enrollment_id(m: &EnrollmentMachine) -> String {
        m.session().unwrap().enrollment_request_id.clone().unwrap()
    }

    #[test]
    fn test_start_with_extracted_name() {
        let mut m = machine();
        let effects = start(&mut m, "enroll my voice as Dr. Jean-Luc");
        assert_eq!(effects[0], Effect::CancelAllTimers);
        assert_eq!(m.phase(), Phase::Confirmation);
        assert_eq!(
            dialog(&effects, DialogKey::EnrollmentStartWithName).param("name"),
            Some("Dr. Jean-Luc")
        );
        assert!(armed(&effects, TimeoutKey::Confirmation).is_some());
        assert!(armed(&effects, TimeoutKey::OverallSession).is_some());
        assert!(emitted(&effects).is_empty());
    }

    #[test]
    fn test_confirmed_with_name_starts_engine_session() {
        let mut m = machine();
        let effects = into_samples(&mut m);
        let events = emitted(&effects);
        match &events[0] {
            OutboundEvent::StartSession(s) => {
                assert_eq!(s.user_id, "Dr. Jean-Luc");
                assert_eq!(s.target_samples, 3);
                assert_eq!(s.session_id, m.session().unwrap().session_id);
            }
            other => panic!("unexpected {:?}", other),
        }
        let sample = requested_sample(&effects);
        assert_eq!(sample.sample_number, 1);
        assert_eq!(sample.total_samples, 3);
        assert_eq!(sample.phrase, crate::config::DEFAULT_SAMPLE_PHRASES[0]);
        assert_eq!(
            armed(&effects, TimeoutKey::SampleCollection).unwrap().correlation,
            Some(sample.sample_id)
        );
    }

    #[test]
    fn test_three_samples_submit_one_batch() {
        let mut m = machine();
        let mut effects = into_samples(&mut m);
        let mut submits = Vec::new();
        let mut phrases = Vec::new();
        while m.phase() == Phase::SampleCollection {
            let sample = requested_sample(&effects);
            phrases.push(sample.phrase.clone());
            effects = sample_result(&mut m, &sample.sample_id, true);
            submits.extend(emitted(&effects).into_iter().filter_map(|e| match e {
                OutboundEvent::SubmitEnrollment(s) => Some(s),
                _ => None,
            }));
        }
        assert_eq!(m.phase(), Phase::Processing);
        assert_eq!(submits.len(), 1);
        assert_eq!(submits[0].sample_count, 3);
        assert_eq!(submits[0].sample_phrases, phrases);
        assert_eq!(Some(submits[0].enrollment_id.clone()), m.session().unwrap().enrollment_request_id);
        assert!(armed(&effects, TimeoutKey::Processing).is_some());
    }

    #[test]
    fn test_third_person_name_collection() {
        let mut m = machine();
        let effects = start(&mut m, "my son Michael");
        assert_eq!(m.phase(), Phase::ThirdPersonNameCollection);
        assert_eq!(
            dialog(&effects, DialogKey::RequestThirdPersonName).param("relationship"),
            Some("son")
        );

        let effects = say(&mut m, "Michael");
        assert_eq!(m.phase(), Phase::Confirmation);
        let session = m.session().unwrap();
        assert_eq!(session.user_name.as_deref(), Some("Michael"));
        assert!(session.third_person);
        assert_eq!(session.relationship.as_deref(), Some("son"));
        assert!(spoken(&effects).contains(&DialogKey::NameConfirmed));
    }

    #[test]
    fn test_name_collection_then_samples() {
        let mut m = machine();
        start(&mut m, "enroll my voice");
        let effects = say(&mut m, "sure");
        assert_eq!(m.phase(), Phase::NameCollection);
        assert!(spoken(&effects).contains(&DialogKey::RequestName));

        let effects = say(&mut m, "my name is mary-kate o'neil");
        assert_eq!(m.phase(), Phase::SampleCollection);
        match &emitted(&effects)[0] {
            OutboundEvent::StartSession(s) => assert_eq!(s.user_id, "Mary-Kate O'Neil"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_name_collection_retries_are_bounded() {
        let mut m = machine();
        start(&mut m, "enroll my voice");
        say(&mut m, "yes");
        for _ in 0..2 {
            let effects = say(&mut m, "R2D2");
            assert_eq!(spoken(&effects), vec![DialogKey::NameInvalid, DialogKey::RequestName]);
        }
        let effects = say(&mut m, "R2D2");
        assert!(spoken(&effects).contains(&DialogKey::NameCollectionFailed));
        assert_eq!(m.phase(), Phase::Idle);
        assert!(emitted(&effects).is_empty());
    }

    #[test]
    fn test_name_collection_timeouts_are_bounded() {
        let mut m = machine();
        start(&mut m, "enroll my voice");
        let mut effects = say(&mut m, "yes");
        assert_eq!(m.phase(), Phase::NameCollection);
        for _ in 0..2 {
            let fire = armed(&effects, TimeoutKey::NameCollection).unwrap();
            effects = m.handle(Input::Timer(fire));
            assert_eq!(spoken(&effects), vec![DialogKey::RequestName]);
            assert_eq!(m.phase(), Phase::NameCollection);
        }
        let fire = armed(&effects, TimeoutKey::NameCollection).unwrap();
        let effects = m.handle(Input::Timer(fire));
        assert_eq!(spoken(&effects), vec![DialogKey::NameCollectionFailed]);
        assert!(emitted(&effects).is_empty());
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn test_third_person_name_timeouts_share_retry_budget() {
        let mut m = machine();
        start(&mut m, "enroll my daughter's voice");
        assert_eq!(m.phase(), Phase::ThirdPersonNameCollection);

        // 一次无效回答与两次超时共用同一计数
        let mut effects = say(&mut m, "R2D2");
        assert!(spoken(&effects).contains(&DialogKey::NameInvalid));
        let fire = armed(&effects, TimeoutKey::NameCollection).unwrap();
        effects = m.handle(Input::Timer(fire));
        assert_eq!(
            dialog(&effects, DialogKey::RequestThirdPersonName).param("relationship"),
            Some("daughter")
        );
        assert_eq!(m.phase(), Phase::ThirdPersonNameCollection);

        let fire = armed(&effects, TimeoutKey::NameCollection).unwrap();
        let effects = m.handle(Input::Timer(fire));
        assert_eq!(spoken(&effects), vec![DialogKey::NameCollectionFailed]);
        assert!(emitted(&effects).is_empty());
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn test_unsupported_title_reprompts() {
        let mut m = machine();
        start(&mut m, "enroll my voice");
        say(&mut m, "yes");
        let effects = say(&mut m, "call me Professor Oak");
        assert_eq!(
            dialog(&effects, DialogKey::NameTitleUnsupported).param("title"),
            Some("professor")
        );
        assert_eq!(m.phase(), Phase::NameCollection);
        assert!(m.session().unwrap().user_name.is_none());
    }

    #[test]
    fn test_decline_cancels_without_notifying_engine() {
        let mut m = machine();
        start(&mut m, "enroll my voice as Ann");
        let effects = say(&mut m, "no thanks");
        assert!(spoken(&effects).contains(&DialogKey::EnrollmentCancelled));
        assert!(emitted(&effects).is_empty());
        assert!(effects.contains(&Effect::CancelAllTimers));
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn test_confirmation_timeout_reprompts_then_cancels() {
        let mut m = machine();
        let mut effects = start(&mut m, "enroll my voice as Ann");
        for _ in 0..2 {
            let fire = armed(&effects, TimeoutKey::Confirmation).unwrap();
            effects = m.handle(Input::Timer(fire));
            assert_eq!(spoken(&effects), vec![DialogKey::ConfirmEnrollment]);
        }
        let fire = armed(&effects, TimeoutKey::Confirmation).unwrap();
        effects = m.handle(Input::Timer(fire));
        assert_eq!(spoken(&effects), vec![DialogKey::EnrollmentCancelled]);
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn test_no_confirmation_proceeds_after_delay() {
        let mut settings = MachineSettings::default();
        settings.confirmation_required = false;
        let mut m = EnrollmentMachine::new(settings, None, true);
        let effects = start(&mut m, "enroll my voice as Ann");
        assert!(armed(&effects, TimeoutKey::Confirmation).is_none());
        let fire = armed(&effects, TimeoutKey::ProceedDelay).unwrap();

        let effects = m.handle(Input::Timer(fire));
        assert_eq!(m.phase(), Phase::SampleCollection);
        assert!(matches!(emitted(&effects)[0], OutboundEvent::StartSession(_)));
    }

    #[test]
    fn test_sample_timeouts_then_abort() {
        let mut m = machine();
        let mut effects = into_samples(&mut m);
        let phrase = requested_sample(&effects).phrase;

        for _ in 0..2 {
            let fire = armed(&effects, TimeoutKey::SampleCollection).unwrap();
            effects = m.handle(Input::Timer(fire));
            assert_eq!(spoken(&effects), vec![DialogKey::RecordingTimeout, DialogKey::SamplePrompt]);
            assert_eq!(requested_sample(&effects).phrase, phrase);
        }

        let fire = armed(&effects, TimeoutKey::SampleCollection).unwrap();
        effects = m.handle(Input::Timer(fire));
        assert_eq!(
            spoken(&effects),
            vec![DialogKey::RecordingTimeout, DialogKey::SampleContinueOrAbort]
        );
        assert!(armed(&effects, TimeoutKey::RetryConfirmation).is_some());
        assert_eq!(m.session().unwrap().pending, Some(PendingPrompt::SampleContinueOrAbort));

        let session_id = m.session().unwrap().session_id.clone();
        let effects = say(&mut m, "abort");
        assert_eq!(m.phase(), Phase::Idle);
        match &emitted(&effects)[..] {
            [OutboundEvent::SessionExpired(e)] => assert_eq!(e.session_id, session_id),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_continue_prompt_timeout_aborts() {
        let mut m = machine();
        let mut effects = into_samples(&mut m);
        for _ in 0..3 {
            let fire = armed(&effects, TimeoutKey::SampleCollection).unwrap();
            effects = m.handle(Input::Timer(fire));
        }
        let fire = armed(&effects, TimeoutKey::RetryConfirmation).unwrap();
        let effects = m.handle(Input::Timer(fire));
        assert!(spoken(&effects).contains(&DialogKey::EnrollmentAborted));
        assert_eq!(m.phase(), Phase::Idle);
        assert_eq!(emitted(&effects).len(), 1);
    }

    #[test]
    fn test_stale_sample_timer_is_noop() {
        let mut m = machine();
        let effects = into_samples(&mut m);
        let stale = armed(&effects, TimeoutKey::SampleCollection).unwrap();
        let sample = requested_sample(&effects);
        sample_result(&mut m, &sample.sample_id, true);

        assert!(m.handle(Input::Timer(stale)).is_empty());
        assert_eq!(m.session().unwrap().samples.len(), 1);
    }

    #[test]
    fn test_poor_quality_retries_same_phrase() {
        let mut m = machine();
        let effects = into_samples(&mut m);
        let first = requested_sample(&effects);

        let effects = sample_result(&mut m, &first.sample_id, false);
        assert_eq!(spoken(&effects), vec![DialogKey::SampleQualityPoor, DialogKey::SamplePrompt]);
        let again = requested_sample(&effects);
        assert_eq!(again.phrase, first.phrase);
        assert_eq!(again.sample_number, 1);
        assert_ne!(again.sample_id, first.sample_id);
        assert!(m.session().unwrap().samples.is_empty());
    }

    #[test]
    fn test_mismatched_sample_id_dropped() {
        let mut m = machine();
        into_samples(&mut m);
        assert!(sample_result(&mut m, "not-in-flight", true).is_empty());
        assert!(m.session().unwrap().samples.is_empty());
    }

    #[test]
    fn test_skip_with_enough_samples_finishes_early() {
        let mut m = machine();
        let mut effects = into_samples(&mut m);
        for _ in 0..2 {
            let sample = requested_sample(&effects);
            effects = sample_result(&mut m, &sample.sample_id, true);
        }
        for _ in 0..3 {
            let fire = armed(&effects, TimeoutKey::SampleCollection).unwrap();
            effects = m.handle(Input::Timer(fire));
        }
        let effects = say(&mut m, "yes");
        assert!(spoken(&effects).contains(&DialogKey::EarlyFinish));
        assert_eq!(m.phase(), Phase::Processing);
        match emitted(&effects).last() {
            Some(OutboundEvent::SubmitEnrollment(s)) => assert_eq!(s.sample_count, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_skip_without_samples_uses_next_phrase() {
        let mut m = machine();
        let mut effects = into_samples(&mut m);
        for _ in 0..3 {
            let fire = armed(&effects, TimeoutKey::SampleCollection).unwrap();
            effects = m.handle(Input::Timer(fire));
        }
        let effects = say(&mut m, "continue");
        assert!(spoken(&effects).contains(&DialogKey::SampleSkipped));
        let sample = requested_sample(&effects);
        assert_eq!(sample.phrase, crate::config::DEFAULT_SAMPLE_PHRASES[1]);
        assert_eq!(sample.sample_number, 1);
        assert_eq!(m.session().unwrap().pending, None);
    }

    #[test]
    fn test_skip_with_no_phrases_left_fails() {
        let mut settings = MachineSettings::default();
        settings.sample_phrases = vec!["only phrase".to_string()];
        let mut m = EnrollmentMachine::new(settings, None, true);
        let mut effects = into_samples(&mut m);
        for _ in 0..3 {
            let fire = armed(&effects, TimeoutKey::SampleCollection).unwrap();
            effects = m.handle(Input::Timer(fire));
        }
        let effects = say(&mut m, "yes");
        assert_eq!(m.phase(), Phase::Failed);
        assert_eq!(
            m.snapshot().error_code,
            Some(ErrorCode::SampleCountInsufficient.as_str())
        );
        assert!(spoken(&effects).contains(&DialogKey::AskTryAgain));
    }

    #[test]
    fn test_foreign_success_after_failure_without_batch_ignored() {
        let mut settings = MachineSettings::default();
        settings.sample_phrases = vec!["only phrase".to_string()];
        let mut m = EnrollmentMachine::new(settings, None, true);
        let mut effects = into_samples(&mut m);
        for _ in 0..3 {
            let fire = armed(&effects, TimeoutKey::SampleCollection).unwrap();
            effects = m.handle(Input::Timer(fire));
        }
        say(&mut m, "yes");
        assert_eq!(m.phase(), Phase::Failed);
        assert!(m.session().unwrap().enrollment_request_id.is_none());

        let foreign = Input::Engine(InboundEvent::EnrollmentResult(EnrollmentResult {
            status: "success".to_string(),
            user_id: Some("Mallory".to_string()),
            enrollment_id: Some("from-another-session".to_string()),
            samples_processed: Some(3),
            message: None,
            error_code: None,
        }));
        assert!(m.handle(foreign).is_empty());
        assert!(m.handle(result("success", None, None)).is_empty());
        assert_eq!(m.phase(), Phase::Failed);

        // 拒绝重试时仍通知引擎结束已开始的会话
        let effects = say(&mut m, "no");
        assert!(matches!(&emitted(&effects)[..], [OutboundEvent::SessionExpired(_)]));
    }

    #[test]
    fn test_stop_requests_early_stop() {
        let mut m = machine();
        let effects = into_samples(&mut m);
        let sample = requested_sample(&effects);
        let effects = say(&mut m, "stop");
        match &emitted(&effects)[..] {
            [OutboundEvent::StopSample(s)] => assert_eq!(s.sample_id, sample.sample_id),
            other => panic!("unexpected {:?}", other),
        }
        // 提前停止后的回报与正常完成一样处理
        sample_result(&mut m, &sample.sample_id, true);
        assert_eq!(m.session().unwrap().samples.len(), 1);
    }

    #[test]
    fn test_pause_and_resume() {
        let mut m = machine();
        let effects = into_samples(&mut m);
        let sample = requested_sample(&effects);

        let effects = say(&mut m, "pause");
        assert_eq!(m.phase(), Phase::Paused);
        assert!(matches!(&emitted(&effects)[..], [OutboundEvent::StopSample(_)]));
        assert!(effects.contains(&Effect::CancelTimer(TimeoutKey::SampleCollection)));
        assert!(sample_result(&mut m, &sample.sample_id, true).is_empty());

        let effects = say(&mut m, "resume");
        assert_eq!(m.phase(), Phase::SampleCollection);
        assert_eq!(requested_sample(&effects).phrase, sample.phrase);
    }

    #[test]
    fn test_paused_timeout_expires_session() {
        let mut m = machine();
        into_samples(&mut m);
        let effects = say(&mut m, "hold on");
        let fire = armed(&effects, TimeoutKey::PausedSession).unwrap();
        let effects = m.handle(Input::Timer(fire));
        assert_eq!(m.phase(), Phase::Idle);
        match &emitted(&effects)[..] {
            [OutboundEvent::SessionExpired(e)] => assert_eq!(e.reason.as_deref(), Some("paused_timeout")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_new_flow_supersedes_active_session() {
        let mut m = machine();
        let effects = into_samples(&mut m);
        let old_id = m.session().unwrap().session_id.clone();
        let old_timer = armed(&effects, TimeoutKey::SampleCollection).unwrap();

        let effects = start(&mut m, "register my voice for Bob");
        assert!(effects.contains(&Effect::CancelAllTimers));
        match &emitted(&effects)[..] {
            [OutboundEvent::SessionExpired(e)] => {
                assert_eq!(e.session_id, old_id);
                assert_eq!(e.reason.as_deref(), Some("superseded"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let session = m.session().unwrap();
        assert_ne!(session.session_id, old_id);
        assert_eq!(session.user_name.as_deref(), Some("Bob"));
        assert_eq!(session.trigger, Trigger::FileIntent);
        assert!(session.samples.is_empty());
        assert_eq!(m.phase(), Phase::Confirmation);

        assert!(m.handle(Input::Timer(old_timer)).is_empty());
        assert_eq!(m.phase(), Phase::Confirmation);
    }

    #[test]
    fn test_cancel_takes_precedence_over_pending_prompt() {
        let mut m = machine();
        let mut effects = into_samples(&mut m);
        for _ in 0..3 {
            let fire = armed(&effects, TimeoutKey::SampleCollection).unwrap();
            effects = m.handle(Input::Timer(fire));
        }
        let effects = say(&mut m, "yes cancel");
        assert_eq!(spoken(&effects), vec![DialogKey::EnrollmentCancelled]);
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn test_restart_with_new_name() {
        let mut m = machine();
        into_samples(&mut m);
        let effects = say(&mut m, "start over as Bob");
        match &emitted(&effects)[..] {
            [OutboundEvent::SessionExpired(e)] => assert_eq!(e.reason.as_deref(), Some("restarted")),
            other => panic!("unexpected {:?}", other),
        }
        let session = m.session().unwrap();
        assert_eq!(session.trigger, Trigger::Restart);
        assert_eq!(session.user_name.as_deref(), Some("Bob"));
        assert_eq!(m.phase(), Phase::Confirmation);
    }

    #[test]
    fn test_restart_by_renaming() {
        let mut m = machine();
        into_samples(&mut m);
        say(&mut m, "change my name to Bob");
        let session = m.session().unwrap();
        assert_eq!(session.trigger, Trigger::Restart);
        assert_eq!(session.user_name.as_deref(), Some("Bob"));
        assert_eq!(m.phase(), Phase::Confirmation);
    }

    #[test]
    fn test_mismatched_enrollment_id_ignored() {
        let mut m = machine();
        let effects = into_samples(&mut m);
        collect_all(&mut m, effects);
        assert_eq!(m.phase(), Phase::Processing);

        assert!(m.handle(result("success", Some("someone-else"), None)).is_empty());
        assert!(m.handle(result("success", None, None)).is_empty());
        assert_eq!(m.phase(), Phase::Processing);
    }

    #[test]
    fn test_success_completes_and_resets() {
        let mut m = machine();
        let effects = into_samples(&mut m);
        collect_all(&mut m, effects);
        let id = enrollment_id(&m);

        let effects = m.handle(result("success", Some(&id), None));
        let success = dialog(&effects, DialogKey::EnrollmentSuccess);
        assert_eq!(success.param("name"), Some("Dr. Jean-Luc"));
        assert_eq!(success.param("samples"), Some("3"));
        assert!(effects.contains(&Effect::CancelAllTimers));
        assert_eq!(m.phase(), Phase::Idle);
        assert!(m.session().is_none());
    }

    #[test]
    fn test_engine_error_fails_and_retry_keeps_name() {
        let mut m = machine();
        let effects = into_samples(&mut m);
        collect_all(&mut m, effects);
        let id = enrollment_id(&m);

        let effects = m.handle(result("error", Some(&id), Some("Voice processor not initialized")));
        assert_eq!(m.phase(), Phase::Failed);
        assert_eq!(
            spoken(&effects),
            vec![DialogKey::ErrorPluginUnavailable, DialogKey::AskTryAgain]
        );
        assert_eq!(m.snapshot().error_code, Some("plugin_unavailable"));

        say(&mut m, "yes");
        let session = m.session().unwrap();
        assert_eq!(session.trigger, Trigger::Retry);
        assert_eq!(session.attempt, 2);
        assert_eq!(session.user_name.as_deref(), Some("Dr. Jean-Luc"));
        assert_eq!(m.phase(), Phase::Confirmation);
    }

    #[test]
    fn test_structured_error_code_preferred() {
        let mut m = machine();
        let effects = into_samples(&mut m);
        collect_all(&mut m, effects);
        let id = enrollment_id(&m);
        let mut input = result("error", Some(&id), Some("Voice processor not initialized"));
        if let Input::Engine(InboundEvent::EnrollmentResult(r)) = &mut input {
            r.error_code = Some("user_exists".to_string());
        }
        let effects = m.handle(input);
        assert!(spoken(&effects).contains(&DialogKey::ErrorUserExists));
    }

    #[test]
    fn test_try_again_declined_notifies_engine() {
        let mut m = machine();
        let effects = into_samples(&mut m);
        collect_all(&mut m, effects);
        let id = enrollment_id(&m);
        m.handle(result("error", Some(&id), Some("boom")));

        let effects = say(&mut m, "no");
        assert!(spoken(&effects).contains(&DialogKey::EnrollmentCancelled));
        assert!(matches!(&emitted(&effects)[..], [OutboundEvent::SessionExpired(_)]));
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn test_retries_stop_after_max_attempts() {
        let mut m = machine();
        start(&mut m, "enroll my voice as Ann");
        for attempt in 1..=3 {
            let effects = say(&mut m, "yes");
            assert_eq!(m.phase(), Phase::SampleCollection);
            let effects = collect_all(&mut m, effects);
            assert_eq!(m.phase(), Phase::Processing);
            let fire = armed(&effects, TimeoutKey::Processing).unwrap();
            let effects = m.handle(Input::Timer(fire));
            if attempt < 3 {
                assert!(spoken(&effects).contains(&DialogKey::AskTryAgain));
                say(&mut m, "yes");
                assert_eq!(m.phase(), Phase::Confirmation);
                assert_eq!(m.session().unwrap().attempt, attempt + 1);
            } else {
                assert!(spoken(&effects).contains(&DialogKey::TooManyAttempts));
                assert_eq!(m.phase(), Phase::Idle);
            }
        }
    }

    #[test]
    fn test_retry_expires_previous_engine_session() {
        let mut m = machine();
        let effects = into_samples(&mut m);
        let old_id = m.session().unwrap().session_id.clone();
        let effects = collect_all(&mut m, effects);
        let fire = armed(&effects, TimeoutKey::Processing).unwrap();
        m.handle(Input::Timer(fire));
        assert_eq!(m.phase(), Phase::Failed);

        let effects = say(&mut m, "yes");
        match &emitted(&effects)[..] {
            [OutboundEvent::SessionExpired(e)] => {
                assert_eq!(e.session_id, old_id);
                assert_eq!(e.reason.as_deref(), Some("retry"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(m.phase(), Phase::Confirmation);

        let effects = say(&mut m, "yes");
        match &emitted(&effects)[0] {
            OutboundEvent::StartSession(s) => assert_ne!(s.session_id, old_id),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_processing_timeout_then_late_success() {
        let mut m = machine();
        let effects = into_samples(&mut m);
        let effects = collect_all(&mut m, effects);
        let id = enrollment_id(&m);
        let fire = armed(&effects, TimeoutKey::Processing).unwrap();

        let effects = m.handle(Input::Timer(fire));
        assert_eq!(m.phase(), Phase::Failed);
        assert!(spoken(&effects).contains(&DialogKey::ErrorProcessingFailed));

        let effects = m.handle(result("success", Some(&id), None));
        assert!(spoken(&effects).contains(&DialogKey::EnrollmentSuccess));
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn test_session_timeout_continue_and_expire() {
        let mut m = machine();
        into_samples(&mut m);
        let overall = m.session().map(|s| TimerFire {
            key: TimeoutKey::OverallSession,
            session_id: s.session_id.clone(),
            correlation: None,
        });

        let effects = m.handle(Input::Timer(overall.clone().unwrap()));
        assert_eq!(spoken(&effects), vec![DialogKey::SessionTimeoutPrompt]);
        let effects = say(&mut m, "yes");
        assert_eq!(spoken(&effects), vec![DialogKey::SessionExtended]);
        assert!(armed(&effects, TimeoutKey::OverallSession).is_some());
        assert_eq!(m.phase(), Phase::SampleCollection);

        let effects = m.handle(Input::Timer(overall.unwrap()));
        let fire = armed(&effects, TimeoutKey::TimeoutConfirmation).unwrap();
        let effects = m.handle(Input::Timer(fire));
        assert_eq!(m.phase(), Phase::Idle);
        match &emitted(&effects)[..] {
            [OutboundEvent::SessionExpired(e)] => assert_eq!(e.reason.as_deref(), Some("expired")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bus_unavailable_degrades() {
        let mut m = EnrollmentMachine::new(MachineSettings::default(), None, false);
        let effects = start(&mut m, "enroll my voice");
        assert_eq!(spoken(&effects), vec![DialogKey::ErrorPluginUnavailable]);
        assert_eq!(m.phase(), Phase::Idle);
        let effects = m.handle(Input::ListUsers);
        assert_eq!(spoken(&effects), vec![DialogKey::ErrorPluginUnavailable]);
        assert!(emitted(&effects).is_empty());
    }

    #[test]
    fn test_idle_utterances_route_to_intents() {
        let mut m = machine();
        let effects = say(&mut m, "list enrolled voices");
        assert_eq!(emitted(&effects), vec![OutboundEvent::ListUsers]);
        assert_eq!(m.phase(), Phase::Idle);

        say(&mut m, "remember me");
        assert_eq!(m.session().unwrap().trigger, Trigger::Utterance);
        assert_eq!(m.phase(), Phase::Confirmation);
    }

    #[test]
    fn test_idle_request_for_relative_asks_their_name() {
        let mut m = machine();
        let effects = say(&mut m, "enroll my son");
        assert_eq!(m.phase(), Phase::ThirdPersonNameCollection);
        assert_eq!(
            dialog(&effects, DialogKey::RequestThirdPersonName).param("relationship"),
            Some("son")
        );
    }

    #[test]
    fn test_user_list_dialogs() {
        let mut m = machine();
        let list = |users: &[&str], total: Option<usize>| {
            Input::Engine(InboundEvent::UserList(UserList {
                status: "success".to_string(),
                users: users.iter().map(|s| s.to_string()).collect(),
                total_users: total,
                model_info: None,
                message: None,
            }))
        };

        assert_eq!(spoken(&m.handle(list(&[], None))), vec![DialogKey::NoEnrolledUsers]);
        let effects = m.handle(list(&["Ann"], None));
        assert_eq!(dialog(&effects, DialogKey::OneEnrolledUser).param("name"), Some("Ann"));
        let effects = m.handle(list(&["Ann", "Bob", "Cy"], None));
        assert_eq!(
            dialog(&effects, DialogKey::MultipleEnrolledUsers).param("users"),
            Some("Ann, Bob and Cy")
        );
        let effects = m.handle(list(&["Ann", "Bob"], Some(12)));
        assert_eq!(dialog(&effects, DialogKey::ManyEnrolledUsers).param("count"), Some("12"));
        assert_eq!(m.enrolled_users(), ["Ann".to_string(), "Bob".to_string()]);

        let effects = m.handle(Input::Engine(InboundEvent::UserList(UserList {
            status: "error".to_string(),
            users: vec![],
            total_users: None,
            model_info: None,
            message: Some("down".to_string()),
        })));
        assert_eq!(spoken(&effects), vec![DialogKey::ErrorCheckingUsers]);
    }

    #[test]
    fn test_shutdown_notifies_started_session() {
        let mut m = machine();
        assert_eq!(m.shutdown(), vec![Effect::CancelAllTimers]);

        into_samples(&mut m);
        let effects = m.shutdown();
        match &emitted(&effects)[..] {
            [OutboundEvent::SessionExpired(e)] => assert_eq!(e.reason.as_deref(), Some("shutdown")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(m.session().is_none());
    }

    #[test]
    fn test_name_hint_is_used() {
        let mut m = machine();
        m.handle(Input::Start {
            utterance: "enroll my voice".to_string(),
            trigger: Trigger::AdaptIntent,
            name_hint: Some("jean-luc".to_string()),
        });
        assert_eq!(m.session().unwrap().user_name.as_deref(), Some("Jean-Luc"));
    }
}
