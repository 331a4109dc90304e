//! 注册运行时：主事件循环
//!
//! 建立命令通道与状态通道，在后台任务中串行处理三类输入：宿主命令、总线入站消息、计时器到期。
//! 每个输入交给状态机，再按顺序执行返回的副作用。状态机只在这一个任务里被访问。

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::bridge::{decode, encode, BusMessage, DialogSink, MessageBus};
use crate::config::AppConfig;
use crate::core::timeouts::TimeoutRegistry;
use crate::enrollment::{Effect, EnrollmentMachine, Input, SessionSnapshot, TimeoutKey, TimerFire, Trigger};

/// 宿主发往运行时的命令
#[derive(Debug, Clone)]
pub enum Command {
    /// 意图命中，开始注册流程
    Start {
        utterance: String,
        trigger: Trigger,
        name_hint: Option<String>,
    },
    /// 用户说的一句话
    Utterance(String),
    /// 查询已注册用户
    ListUsers,
    /// 总线入站消息
    Bus(BusMessage),
    /// 结束会话并退出
    Quit,
}

type Timers = TimeoutRegistry<TimeoutKey, TimerFire>;

/// 创建运行时：返回命令发送端、状态接收端与后台任务句柄
pub fn create_runtime(
    cfg: &AppConfig,
    bus: Arc<dyn MessageBus>,
    speaker: Arc<dyn DialogSink>,
) -> (
    mpsc::UnboundedSender<Command>,
    watch::Receiver<SessionSnapshot>,
    JoinHandle<()>,
) {
    let bus_enabled = cfg.bus.enabled;
    if !bus_enabled {
        tracing::warn!("Voice ID bus disabled by config, enrollment will report unavailable");
    }
    let mut machine = EnrollmentMachine::from_config(cfg);
    machine.set_bus_available(bus_enabled && bus.is_connected());

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (state_tx, state_rx) = watch::channel(SessionSnapshot::default());

    let handle = tokio::spawn(async move {
        let (mut timers, mut fired_rx) = Timers::new();
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let input = match cmd {
                        Some(Command::Start { utterance, trigger, name_hint }) => Input::Start {
                            utterance,
                            trigger,
                            name_hint,
                        },
                        Some(Command::Utterance(text)) => Input::Utterance(text),
                        Some(Command::ListUsers) => Input::ListUsers,
                        Some(Command::Bus(message)) => match decode(&message) {
                            Ok(Some(event)) => Input::Engine(event),
                            Ok(None) => continue,
                            Err(e) => {
                                tracing::warn!("Dropping malformed bus message: {}", e);
                                continue;
                            }
                        },
                        Some(Command::Quit) | None => break,
                    };
                    machine.set_bus_available(bus_enabled && bus.is_connected());
                    let effects = machine.handle(input);
                    apply(effects, &mut timers, bus.as_ref(), speaker.as_ref()).await;
                }
                Some(fired) = fired_rx.recv() => {
                    if !timers.accept(&fired) {
                        continue;
                    }
                    tracing::debug!("Timer {} fired", fired.key.as_str());
                    let effects = machine.handle(Input::Timer(fired.payload));
                    apply(effects, &mut timers, bus.as_ref(), speaker.as_ref()).await;
                }
            }
            let _ = state_tx.send(machine.snapshot());
        }

        let effects = machine.shutdown();
        apply(effects, &mut timers, bus.as_ref(), speaker.as_ref()).await;
        let _ = state_tx.send(machine.snapshot());
        tracing::info!("Enrollment runtime stopped");
    });

    (cmd_tx, state_rx, handle)
}

/// 按顺序执行副作用；发送失败只记录，不影响后续副作用
async fn apply(
    effects: Vec<Effect>,
    timers: &mut Timers,
    bus: &dyn MessageBus,
    speaker: &dyn DialogSink,
) {
    for effect in effects {
        match effect {
            Effect::Emit(event) => match encode(&event) {
                Ok(message) => {
                    let topic = message.msg_type.clone();
                    if let Err(e) = bus.emit(message).await {
                        tracing::error!("Failed to emit '{}': {}", topic, e);
                    }
                }
                Err(e) => tracing::error!("Failed to encode {:?}: {}", event, e),
            },
            Effect::Speak(dialog) => speaker.speak(&dialog).await,
            Effect::ArmTimer { key, after, fire } => {
                timers.arm(key, after, fire);
            }
            Effect::CancelTimer(key) => {
                timers.cancel(&key);
            }
            Effect::CancelAllTimers => timers.cancel_all(),
        }
    }
}
