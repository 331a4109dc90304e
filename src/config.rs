//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `VOXENROLL__*` 覆盖（双下划线表示嵌套，如 `VOXENROLL__ENROLLMENT__TARGET_SAMPLES=5`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::nlu::Vocabulary;

/// 默认的轮换朗读短语
pub const DEFAULT_SAMPLE_PHRASES: [&str; 10] = [
    "The quick brown fox jumps over the lazy dog",
    "She sells seashells by the seashore",
    "How much wood would a woodchuck chuck if a woodchuck could chuck wood",
    "Peter Piper picked a peck of pickled peppers",
    "A proper copper coffee pot",
    "Red leather, yellow leather",
    "Toy boat, toy boat, toy boat",
    "Unique New York, unique New York",
    "Sally sells seashells down by the seashore",
    "The thirty-three thieves thought that they thrilled the throne throughout Thursday",
];

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub enrollment: EnrollmentSection,
    #[serde(default)]
    pub locale: LocaleSection,
    #[serde(default)]
    pub bus: BusSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [enrollment] 段：样本数量、确认开关、重试上限、朗读短语
#[derive(Debug, Clone, Deserialize)]
pub struct EnrollmentSection {
    #[serde(default = "default_target_samples")]
    pub target_samples: u32,
    /// 开始前是否需要用户确认
    #[serde(default = "default_confirmation_required")]
    pub confirmation_required: bool,
    /// 各阶段的重试上限（确认 / 样本 / 姓名）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 跳过短语时，已采集样本达到该数量即可提前结束
    #[serde(default = "default_min_samples_for_early_finish")]
    pub min_samples_for_early_finish: u32,
    #[serde(default = "default_sample_phrases")]
    pub sample_phrases: Vec<String>,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
}

fn default_target_samples() -> u32 {
    3
}

fn default_confirmation_required() -> bool {
    true
}

fn default_max_retries() -> u32 {
    2
}

fn default_min_samples_for_early_finish() -> u32 {
    2
}

fn default_sample_phrases() -> Vec<String> {
    DEFAULT_SAMPLE_PHRASES.iter().map(|p| p.to_string()).collect()
}

impl Default for EnrollmentSection {
    fn default() -> Self {
        Self {
            target_samples: default_target_samples(),
            confirmation_required: default_confirmation_required(),
            max_retries: default_max_retries(),
            min_samples_for_early_finish: default_min_samples_for_early_finish(),
            sample_phrases: default_sample_phrases(),
            timeouts: TimeoutsSection::default(),
        }
    }
}

impl EnrollmentSection {
    /// 修正非法取值：样本数至少 1，短语列表为空时回退到默认列表
    pub fn sanitized(mut self) -> Self {
        if self.target_samples == 0 {
            tracing::warn!("enrollment.target_samples must be >= 1, using 1");
            self.target_samples = 1;
        }
        self.sample_phrases.retain(|p| !p.trim().is_empty());
        if self.sample_phrases.is_empty() {
            tracing::warn!("enrollment.sample_phrases is empty, using built-in phrases");
            self.sample_phrases = default_sample_phrases();
        }
        self
    }
}

/// [enrollment.timeouts] 段：各命名计时器的时长
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsSection {
    #[serde(default = "default_confirmation_secs")]
    pub confirmation_secs: u64,
    /// 单个样本等待引擎回报的时长
    #[serde(default = "default_sample_secs")]
    pub sample_collection_secs: u64,
    #[serde(default = "default_confirmation_secs")]
    pub retry_confirmation_secs: u64,
    #[serde(default = "default_confirmation_secs")]
    pub timeout_confirmation_secs: u64,
    /// 整个会话的总时长（默认 10 分钟）
    #[serde(default = "default_overall_session_secs")]
    pub overall_session_secs: u64,
    #[serde(default = "default_confirmation_secs")]
    pub name_collection_secs: u64,
    #[serde(default = "default_paused_session_secs")]
    pub paused_session_secs: u64,
    #[serde(default = "default_processing_secs")]
    pub processing_secs: u64,
    /// 无需确认时，开始提示与进入下一步之间的间隔（毫秒）
    #[serde(default = "default_proceed_delay_ms")]
    pub proceed_delay_ms: u64,
}

fn default_confirmation_secs() -> u64 {
    30
}

fn default_sample_secs() -> u64 {
    11
}

fn default_overall_session_secs() -> u64 {
    600
}

fn default_paused_session_secs() -> u64 {
    300
}

fn default_processing_secs() -> u64 {
    30
}

fn default_proceed_delay_ms() -> u64 {
    1500
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            confirmation_secs: default_confirmation_secs(),
            sample_collection_secs: default_sample_secs(),
            retry_confirmation_secs: default_confirmation_secs(),
            timeout_confirmation_secs: default_confirmation_secs(),
            overall_session_secs: default_overall_session_secs(),
            name_collection_secs: default_confirmation_secs(),
            paused_session_secs: default_paused_session_secs(),
            processing_secs: default_processing_secs(),
            proceed_delay_ms: default_proceed_delay_ms(),
        }
    }
}

impl TimeoutsSection {
    pub fn confirmation(&self) -> Duration {
        Duration::from_secs(self.confirmation_secs)
    }

    pub fn sample_collection(&self) -> Duration {
        Duration::from_secs(self.sample_collection_secs)
    }

    pub fn retry_confirmation(&self) -> Duration {
        Duration::from_secs(self.retry_confirmation_secs)
    }

    pub fn timeout_confirmation(&self) -> Duration {
        Duration::from_secs(self.timeout_confirmation_secs)
    }

    pub fn overall_session(&self) -> Duration {
        Duration::from_secs(self.overall_session_secs)
    }

    pub fn name_collection(&self) -> Duration {
        Duration::from_secs(self.name_collection_secs)
    }

    pub fn paused_session(&self) -> Duration {
        Duration::from_secs(self.paused_session_secs)
    }

    pub fn processing(&self) -> Duration {
        Duration::from_secs(self.processing_secs)
    }

    pub fn proceed_delay(&self) -> Duration {
        Duration::from_millis(self.proceed_delay_ms)
    }
}

/// [locale] 段：语言标识与可选词表（缺省时使用内置英文词表）
#[derive(Debug, Clone, Deserialize)]
pub struct LocaleSection {
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default)]
    pub vocabulary: Option<Vocabulary>,
}

fn default_lang() -> String {
    "en-us".to_string()
}

impl Default for LocaleSection {
    fn default() -> Self {
        Self {
            lang: default_lang(),
            vocabulary: None,
        }
    }
}

/// [bus] 段：是否连接外部声纹引擎
#[derive(Debug, Clone, Deserialize)]
pub struct BusSection {
    #[serde(default = "default_bus_enabled")]
    pub enabled: bool,
}

fn default_bus_enabled() -> bool {
    true
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            enabled: default_bus_enabled(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 VOXENROLL__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 VOXENROLL__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("VOXENROLL")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    let mut cfg: AppConfig = c.try_deserialize()?;
    cfg.enrollment = cfg.enrollment.sanitized();
    Ok(cfg)
}
