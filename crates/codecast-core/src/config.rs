//! Configuration types for codecast.
//!
//! Loaded from YAML (`codecast.yml` by default). Every field has a default, so
//! an empty or missing file yields a working configuration.

use crate::device::GeneratorKind;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodecastConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub workspace: WorkspaceConfig,

    #[serde(default)]
    pub interpreter: InterpreterConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub recorder: RecorderConfig,
}

impl CodecastConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path_ref)?;
        let config = Self::parse_yaml(&content)?;
        debug!(
            bind = %config.server.bind,
            interpreter = %config.interpreter.command,
            store = %config.store.path.display(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise returns defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        if path_ref.exists() {
            Self::from_file(path_ref)
        } else {
            debug!(path = %path_ref.display(), "No configuration file; using defaults");
            Ok(Self::default())
        }
    }

    /// Parses configuration from a YAML string. Empty input yields defaults.
    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validates the configuration and returns any warnings.
    ///
    /// Settings that would make the server unusable are errors.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut warnings = Vec::new();

        if self.interpreter.command.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "interpreter.command".to_string(),
                message: "interpreter command must not be empty".to_string(),
            });
        }

        let entrypoint = &self.interpreter.entrypoint;
        if entrypoint.is_empty()
            || entrypoint.contains('/')
            || entrypoint.contains('\\')
            || entrypoint == "."
            || entrypoint == ".."
        {
            return Err(ConfigError::Invalid {
                field: "interpreter.entrypoint".to_string(),
                message: format!("'{entrypoint}' must be a plain file name"),
            });
        }

        if self.store.retry.max_attempts == 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "store.retry.max_attempts".to_string(),
                message: "0 attempts is treated as 1; store writes will not be retried"
                    .to_string(),
            });
        }

        if self.store.retry.base_delay_ms > self.store.retry.max_delay_ms {
            warnings.push(ConfigWarning::InvalidValue {
                field: "store.retry.base_delay_ms".to_string(),
                message: format!(
                    "base delay {}ms exceeds max delay {}ms; every retry waits {}ms",
                    self.store.retry.base_delay_ms,
                    self.store.retry.max_delay_ms,
                    self.store.retry.max_delay_ms
                ),
            });
        }

        if self.execution.timeout_secs == Some(0) {
            warnings.push(ConfigWarning::InvalidValue {
                field: "execution.timeout_secs".to_string(),
                message: "timeout of 0 kills every program immediately".to_string(),
            });
        }

        if self.audio.sample_rate == 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "audio.sample_rate".to_string(),
                message: "sample rate of 0 disables audio capture".to_string(),
            });
        }

        Ok(warnings)
    }
}

/// Configuration warnings emitted during validation.
#[derive(Debug, Clone)]
pub enum ConfigWarning {
    /// Field has a suspicious value.
    InvalidValue { field: String, message: String },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::InvalidValue { field, message } => {
                write!(f, "Warning [{}]: {}", field, message)
            }
        }
    }
}

/// Execution server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the execution server listens on.
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Per-session working directory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Directory holding one subdirectory per session id.
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("./workspaces")
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
        }
    }
}

/// Interpreter used to run submitted source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Interpreter executable.
    #[serde(default = "default_interpreter_command")]
    pub command: String,

    /// Arguments placed before the entrypoint file.
    #[serde(default)]
    pub args: Vec<String>,

    /// File name the source is written to inside the session directory.
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,

    /// Extra environment for the interpreter, applied on top of the
    /// inherited allowlist.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_interpreter_command() -> String {
    "python3".to_string()
}

fn default_entrypoint() -> String {
    "main.py".to_string()
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            command: default_interpreter_command(),
            args: Vec::new(),
            entrypoint: default_entrypoint(),
            env: BTreeMap::new(),
        }
    }
}

/// Limits applied to running programs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Kill a program after this many seconds. Unset means no limit.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Time between SIGTERM and SIGKILL when killing a program.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

fn default_kill_grace_ms() -> u64 {
    500
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

/// Event store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSONL journal backing the store.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".codecast/store.jsonl")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Audio capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Software device used by the CLI recorder.
    #[serde(default = "default_device")]
    pub device: GeneratorKind,
}

fn default_sample_rate() -> u32 {
    44_100
}

fn default_channels() -> u16 {
    1
}

fn default_device() -> GeneratorKind {
    GeneratorKind::Silence
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            device: default_device(),
        }
    }
}

/// Recorder identity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Identity written as the session owner.
    #[serde(default = "default_owner")]
    pub owner: String,
}

fn default_owner() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            owner: default_owner(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for '{field}': {message}")]
    Invalid { field: String, message: String },
}
