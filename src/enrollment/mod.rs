//! 注册流程：阶段、会话记录、对话提示与状态机

pub mod dialog;
pub mod effect;
pub mod machine;
pub mod phase;
pub mod session;

pub use dialog::{join_names, Dialog, DialogKey};
pub use effect::{Effect, Input, TimeoutKey, TimerFire};
pub use machine::{EnrollmentMachine, MachineSettings};
pub use phase::Phase;
pub use session::{PendingPrompt, Session, SessionSnapshot, Trigger};
