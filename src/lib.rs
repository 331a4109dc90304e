//! Voxenroll - 语音注册对话引擎
//!
//! 通过自然语言对话引导用户为声纹识别引擎录入语音样本。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、命名计时器、主事件循环
//! - **nlu**: 词表、回复分类、姓名提取与校验
//! - **enrollment**: 阶段、会话记录、对话提示、状态机
//! - **bridge**: 声纹引擎总线与对话输出
//! - **observability**: 日志初始化

pub mod bridge;
pub mod config;
pub mod core;
pub mod enrollment;
pub mod nlu;
pub mod observability;

pub use crate::core::{create_runtime, Command};
pub use enrollment::{EnrollmentMachine, Phase, SessionSnapshot};
