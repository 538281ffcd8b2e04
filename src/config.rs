//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PAYFLOW__*` 覆盖（双下划线表示嵌套，如 `PAYFLOW__DISTRIBUTION__TIMEOUT_SECS=120`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::delegation::IntervalLimits;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub delegation: DelegationSection,
    pub distribution: DistributionSection,
    pub scheduler: SchedulerSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 贡献记录等数据文件目录
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            data_dir: PathBuf::from("data"),
        }
    }
}

/// [delegation] 段：周期间隔上下限（秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DelegationSection {
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
}

impl Default for DelegationSection {
    fn default() -> Self {
        let limits = IntervalLimits::default();
        Self {
            min_interval_secs: limits.min_secs,
            max_interval_secs: limits.max_secs,
        }
    }
}

impl DelegationSection {
    pub fn limits(&self) -> IntervalLimits {
        IntervalLimits {
            min_secs: self.min_interval_secs,
            max_secs: self.max_interval_secs,
        }
    }
}

/// [distribution] 段：转账间隔、未就绪等待、批次超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DistributionSection {
    /// 相邻两笔转账之间的固定间隔，避免执行器侧 nonce 冲突
    pub inter_attempt_delay_ms: u64,
    /// 执行器重新初始化后的额外等待
    pub ready_wait_ms: u64,
    /// 整个批次的墙钟预算
    pub timeout_secs: u64,
}

impl Default for DistributionSection {
    fn default() -> Self {
        Self {
            inter_attempt_delay_ms: 1_500,
            ready_wait_ms: 1_000,
            timeout_secs: 300,
        }
    }
}

/// [scheduler] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub sweep_interval_secs: u64,
    /// 到期事件通道容量
    pub event_buffer: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            event_buffer: 64,
        }
    }
}

/// 从 config 目录加载配置，环境变量 PAYFLOW__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PAYFLOW__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PAYFLOW")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
