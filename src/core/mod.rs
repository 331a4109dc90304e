//! 核心层：错误类型、命名计时器、主事件循环

pub mod error;
pub mod runtime;
pub mod timeouts;

pub use error::{BusError, EnrollError, ErrorCode};
pub use runtime::{create_runtime, Command};
pub use timeouts::{Fired, TimeoutRegistry};
