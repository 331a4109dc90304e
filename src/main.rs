//! Voxenroll - 语音注册对话引擎
//!
//! 入口：初始化日志、加载配置、创建运行时，从标准输入逐行读取：
//! - `{...}`：总线入站消息（JSON）
//! - `/enroll [话语]`、`/enroll-as 姓名`、`/list`、`/quit`：宿主命令
//! - 其他：用户说的话
//!
//! 出站总线消息以 JSON Lines 写到标准输出，对话与日志写到标准错误。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use voxenroll::bridge::{BusMessage, ConsoleSpeaker, DisconnectedBus, MessageBus, StdoutBus};
use voxenroll::config::{load_config, AppConfig};
use voxenroll::core::{create_runtime, Command, EnrollError};
use voxenroll::enrollment::Trigger;
use voxenroll::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let bus: Arc<dyn MessageBus> = if cfg.bus.enabled {
        Arc::new(StdoutBus::new())
    } else {
        Arc::new(DisconnectedBus)
    };
    let (cmd_tx, mut state_rx, runtime) = create_runtime(&cfg, bus, Arc::new(ConsoleSpeaker));

    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let snapshot = state_rx.borrow().clone();
            tracing::debug!(
                "Phase {} ({}/{} samples)",
                snapshot.phase,
                snapshot.samples_collected,
                snapshot.target_samples
            );
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let cmd = match parse_line(line) {
            Ok(cmd) => cmd,
            Err(e) => {
                tracing::warn!("Ignoring input: {}", e);
                continue;
            }
        };
        let quit = matches!(cmd, Command::Quit);
        if cmd_tx.send(cmd).is_err() || quit {
            break;
        }
    }

    let _ = cmd_tx.send(Command::Quit);
    runtime.await.context("Runtime task failed")?;
    Ok(())
}

fn parse_line(line: &str) -> Result<Command, EnrollError> {
    if line.starts_with('{') {
        return Ok(Command::Bus(BusMessage::from_json(line)?));
    }
    let cmd = match line.split_once(' ').unwrap_or((line, "")) {
        ("/quit", _) => Command::Quit,
        ("/list", _) => Command::ListUsers,
        ("/enroll", rest) => Command::Start {
            utterance: rest.trim().to_string(),
            trigger: Trigger::FileIntent,
            name_hint: None,
        },
        ("/enroll-as", name) => Command::Start {
            utterance: String::new(),
            trigger: Trigger::AdaptIntent,
            name_hint: Some(name.trim().to_string()),
        },
        _ => Command::Utterance(line.to_string()),
    };
    Ok(cmd)
}
