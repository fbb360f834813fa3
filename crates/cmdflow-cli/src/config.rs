//! Settings and data-directory resolution
//!
//! ```text
//! --data-dir  >  $CMDFLOW_HOME  >  $HOME/.cmdflow  >  %USERPROFILE%\.cmdflow
//!
//! <data>/config.toml          Settings (every key optional)
//! <data>/logs/history.log     LogStore
//! <data>/*.json               Catalogs
//! ```
//!
//! Environment variables override the file: `CMDFLOW_SCRIPT_TYPE` and
//! `CMDFLOW_ALLOW_FUNCTION_GENERATORS`.

use cmdflow_script::{Compiler, ScriptType};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Data directory override
pub const HOME_ENV: &str = "CMDFLOW_HOME";
/// Default script type override
pub const SCRIPT_TYPE_ENV: &str = "CMDFLOW_SCRIPT_TYPE";
/// Function-generator opt-in override
pub const ALLOW_FUNCTIONS_ENV: &str = "CMDFLOW_ALLOW_FUNCTION_GENERATORS";
/// Settings file name inside the data directory
pub const CONFIG_FILE: &str = "config.toml";
/// Log store directory inside the data directory
pub const LOGS_DIR: &str = "logs";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Settings file exists but could not be read
    #[error("io error on {path}: {source}")]
    Io {
        /// Settings file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Settings file is not valid TOML of the expected shape
    #[error("invalid config {path}: {source}")]
    Parse {
        /// Settings file
        path: PathBuf,
        /// Parser error
        #[source]
        source: toml::de::Error,
    },

    /// Environment override has an unusable value
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv {
        /// Variable name
        var: &'static str,
        /// Offending value
        value: String,
    },

    /// Nothing to derive a data directory from
    #[error("no data directory: pass --data-dir or set {HOME_ENV}")]
    NoDataDir,
}

/// Result type for configuration
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Contents of `config.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Script type used when a workflow does not declare one
    pub default_script_type: ScriptType,
    /// Token that splits a composite command line into a batch
    pub batch_separator: String,
    /// Command name generated scripts use to call back into cmdflow
    pub invoker: String,
    /// Execute function-form generators
    pub allow_function_generators: bool,
    /// Shell program override for running commands and scripts
    pub shell: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_script_type: ScriptType::default(),
            batch_separator: "+".to_string(),
            invoker: cmdflow_script::DEFAULT_INVOKER.to_string(),
            allow_function_generators: false,
            shell: None,
        }
    }
}

impl Settings {
    /// Read a settings file; a missing file gives the defaults
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(SCRIPT_TYPE_ENV).filter(|v| !v.trim().is_empty()) {
            self.default_script_type =
                value.parse().map_err(|_| ConfigError::InvalidEnv {
                    var: SCRIPT_TYPE_ENV,
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup(ALLOW_FUNCTIONS_ENV) {
            self.allow_function_generators =
                parse_bool(&value).ok_or(ConfigError::InvalidEnv {
                    var: ALLOW_FUNCTIONS_ENV,
                    value,
                })?;
        }
        Ok(())
    }

    /// Generator compiler honouring the function-form opt-in
    #[inline]
    #[must_use]
    pub fn compiler(&self) -> Compiler {
        Compiler::new(self.allow_function_generators)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Pick the data directory
pub fn resolve_data_dir<F>(flag: Option<&Path>, lookup: F) -> ConfigResult<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = flag {
        return Ok(dir.to_path_buf());
    }
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    if let Some(home) = non_empty(HOME_ENV) {
        return Ok(PathBuf::from(home));
    }
    non_empty("HOME")
        .or_else(|| non_empty("USERPROFILE"))
        .map(|home| PathBuf::from(home).join(".cmdflow"))
        .ok_or(ConfigError::NoDataDir)
}

/// Resolved data directory plus its settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root of every file cmdflow reads or writes
    pub data_dir: PathBuf,
    /// Effective settings
    pub settings: Settings,
}

impl Config {
    /// Resolve from the process environment
    pub fn load(flag: Option<&Path>) -> ConfigResult<Self> {
        Self::load_with(flag, |name| std::env::var(name).ok())
    }

    /// Resolve with an explicit environment
    pub fn load_with<F>(flag: Option<&Path>, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = resolve_data_dir(flag, &lookup)?;
        let mut settings = Settings::load(&data_dir.join(CONFIG_FILE))?;
        settings.apply_env(&lookup)?;
        tracing::debug!(data_dir = %data_dir.display(), ?settings, "configuration loaded");
        Ok(Self { data_dir, settings })
    }

    /// Directory holding the log store
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join(LOGS_DIR)
    }
}
