//! Board and run configuration. Everything board specific (physical ranges,
//! field offsets and masks, role bindings) comes from a TOML file; the DE1-SoC
//! layout ships in `boards/de1-soc.toml` and is the built-in default.
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    rt::{ClockKind, IsolationPolicy, Priority},
    soc::{
        device::{AccessMode, WindowRange},
        register::{FieldPath, FieldWidth, RegisterField},
    },
};

const BUILTIN_BOARD: &str = include_str!("../boards/de1-soc.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading board file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("parsing board configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoardConfig {
    #[serde(default = "default_device")]
    pub device: PathBuf,
    pub windows: BTreeMap<String, WindowConfig>,
    pub memory: MemoryConfig,
    pub roles: RoleConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub isolation: IsolationConfig,
}

fn default_device() -> PathBuf {
    PathBuf::from("/dev/mem")
}

impl BoardConfig {
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_toml_str(BUILTIN_BOARD)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: BoardConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let run = &self.run;
        if run.bound == 0 {
            return Err(ConfigError::Invalid("run.bound must be positive".into()));
        }
        if run.signal_every == 0 {
            return Err(ConfigError::Invalid("run.signal_every must be positive".into()));
        }
        if run.measurement_capacity == 0 {
            return Err(ConfigError::Invalid("run.measurement_capacity must be positive".into()));
        }
        if run.mapping.buffer_words == 0 {
            return Err(ConfigError::Invalid("run.mapping.buffer_words must be positive".into()));
        }
        if !self.windows.contains_key(&self.memory.window) {
            return Err(ConfigError::Invalid(format!(
                "memory window '{}' is not declared",
                self.memory.window
            )));
        }
        match self.isolation.priority.as_ref().and_then(PriorityValue::level) {
            Some(level) if level < 1 => Err(ConfigError::Invalid(format!(
                "isolation.priority {level} is not a real-time priority"
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowConfig {
    pub base: u64,
    pub length: usize,
    #[serde(default)]
    pub mode: ModeConfig,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldConfig>,
}

impl WindowConfig {
    pub fn range(&self) -> WindowRange {
        WindowRange {
            base: self.base,
            len: self.length,
            mode: self.mode.into(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeConfig {
    Read,
    Write,
    #[default]
    ReadWrite,
}

impl From<ModeConfig> for AccessMode {
    fn from(mode: ModeConfig) -> Self {
        match mode {
            ModeConfig::Read => AccessMode::READ,
            ModeConfig::Write => AccessMode::WRITE,
            ModeConfig::ReadWrite => AccessMode::READ_WRITE,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    pub offset: usize,
    pub mask: u32,
    #[serde(default)]
    pub width: FieldWidth,
}

impl FieldConfig {
    pub fn to_field(self, name: &str) -> RegisterField {
        RegisterField::new(name, self.offset, self.mask, self.width)
    }
}

/// Byte offsets subdividing the on-chip memory window.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    pub window: String,
    pub control_offset: usize,
    pub array_offset: usize,
    pub buffer_offset: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleConfig {
    pub producer: IoRoleConfig,
    pub consumer: IoRoleConfig,
    pub mapping: MappingRoleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IoRoleConfig {
    pub output: FieldPath,
    pub input: FieldPath,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingRoleConfig {
    pub indicator: FieldPath,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LifecycleConfig {
    pub startup_set: Vec<FieldPath>,
    pub startup_clear: Vec<FieldPath>,
    pub shutdown_clear: Vec<FieldPath>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub bound: u32,
    pub signal_every: u32,
    pub measurement_capacity: usize,
    pub clock: ClockKind,
    pub producer: BlinkConfig,
    pub consumer: BlinkConfig,
    pub mapping: MappingConfig,
    pub start: StartConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            bound: 30,
            signal_every: 5,
            measurement_capacity: 50,
            clock: ClockKind::Realtime,
            producer: BlinkConfig { on_ms: 250, off_ms: 250 },
            consumer: BlinkConfig { on_ms: 1000, off_ms: 0 },
            mapping: MappingConfig::default(),
            start: StartConfig::default(),
        }
    }
}

/// On/off phase lengths of an indicator toggle.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlinkConfig {
    pub on_ms: u64,
    pub off_ms: u64,
}

impl BlinkConfig {
    pub fn on(&self) -> Duration {
        Duration::from_millis(self.on_ms)
    }

    pub fn off(&self) -> Duration {
        Duration::from_millis(self.off_ms)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferTarget {
    #[default]
    Local,
    OnChip,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MappingConfig {
    pub on_ms: u64,
    pub off_ms: u64,
    pub buffer_words: usize,
    pub target: BufferTarget,
    pub seed: u16,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            on_ms: 100,
            off_ms: 100,
            buffer_words: 1024,
            target: BufferTarget::Local,
            seed: 0x7FFF,
        }
    }
}

impl MappingConfig {
    pub fn blink(&self) -> BlinkConfig {
        BlinkConfig {
            on_ms: self.on_ms,
            off_ms: self.off_ms,
        }
    }
}

/// Bounded wait the mapping context performs before its first iteration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StartConfig {
    pub settle_ms: u64,
    pub button: Option<FieldPath>,
    pub timeout_ms: u64,
    pub poll_ms: u64,
}

impl Default for StartConfig {
    fn default() -> Self {
        Self {
            settle_ms: 1000,
            button: None,
            timeout_ms: 10_000,
            poll_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IsolationConfig {
    pub priority: Option<PriorityValue>,
    pub lock_memory: bool,
    pub isolated_cpu: Option<usize>,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            priority: Some(PriorityValue::Named("max".into())),
            lock_memory: true,
            isolated_cpu: Some(1),
        }
    }
}

impl IsolationConfig {
    pub fn disabled() -> Self {
        Self {
            priority: None,
            lock_memory: false,
            isolated_cpu: None,
        }
    }

    pub fn policy(&self) -> Result<IsolationPolicy, ConfigError> {
        let priority = match &self.priority {
            None => None,
            Some(PriorityValue::Level(level)) => Some(Priority::Level(*level)),
            Some(PriorityValue::Named(name)) if name.eq_ignore_ascii_case("max") => Some(Priority::Max),
            Some(PriorityValue::Named(name)) => {
                return Err(ConfigError::Invalid(format!("unknown priority '{name}'")));
            }
        };
        Ok(IsolationPolicy {
            priority,
            lock_memory: self.lock_memory,
            processor: self.isolated_cpu,
        })
    }
}

/// `priority = "max"` or `priority = 80`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PriorityValue {
    Level(i32),
    Named(String),
}

impl PriorityValue {
    fn level(&self) -> Option<i32> {
        match self {
            PriorityValue::Level(level) => Some(*level),
            PriorityValue::Named(_) => None,
        }
    }
}
