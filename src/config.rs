use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::scanner::{Schedule, DEFAULT_BATCH_SIZE};
use crate::error::ValidationError;
use crate::types::{DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS};

pub const DEFAULT_CONFIG_FILE: &str = "portsweep.yaml";
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_UI_DIR: &str = "ui";

/// Optional YAML config file. Every field falls back to a built-in default;
/// command-line flags override whatever is set here.
///
/// ```yaml
/// bind: 0.0.0.0:8080
/// ui_dir: ./ui
/// batch_size: 100
/// timeout_ms: 800
/// ```
#[derive(Debug, Default, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub ui_dir: Option<PathBuf>,
    pub batch_size: Option<usize>,
    /// Switches to the worker-pool schedule when set.
    pub workers: Option<usize>,
    pub timeout_ms: Option<u64>,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind: String,
    pub ui_dir: PathBuf,
    pub schedule: Schedule,
    pub timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            ui_dir: PathBuf::from(DEFAULT_UI_DIR),
            schedule: Schedule::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// Explicit overrides, usually from the command line.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub bind: Option<String>,
    pub ui_dir: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub workers: Option<usize>,
    pub timeout_ms: Option<u64>,
}

impl Settings {
    /// Layer defaults < config file < overrides. A worker count at either
    /// layer selects the pooled schedule; a batch size given as an override
    /// wins over a file-level worker count. The resulting timeout must lie
    /// in the same range a scan request accepts.
    pub fn resolve(file: Option<FileConfig>, overrides: Overrides) -> Result<Self, ValidationError> {
        let file = file.unwrap_or_default();
        let defaults = Settings::default();

        let schedule = match (overrides.workers, overrides.batch_size, file.workers, file.batch_size) {
            (Some(w), _, _, _) => Schedule::Pooled { workers: w },
            (None, Some(b), _, _) => Schedule::Batched { batch_size: b },
            (None, None, Some(w), _) => Schedule::Pooled { workers: w },
            (None, None, None, b) => Schedule::Batched {
                batch_size: b.unwrap_or(DEFAULT_BATCH_SIZE),
            },
        };

        let timeout_ms = overrides
            .timeout_ms
            .or(file.timeout_ms)
            .unwrap_or(defaults.timeout_ms);
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&timeout_ms) {
            return Err(ValidationError::TimeoutOutOfRange(timeout_ms));
        }

        Ok(Settings {
            bind: overrides.bind.or(file.bind).unwrap_or(defaults.bind),
            ui_dir: overrides.ui_dir.or(file.ui_dir).unwrap_or(defaults.ui_dir),
            schedule,
            timeout_ms,
        })
    }
}

/// Load the config file at `path`, or `./portsweep.yaml` if no path is given
/// and that file exists. An explicitly named file must exist and parse.
pub fn load_config(path: Option<&Path>) -> Result<Option<FileConfig>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG_FILE);
            if p.exists() {
                p.to_path_buf()
            } else {
                return Ok(None);
            }
        }
    };
    let s = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let cfg = parse_config(&s)
        .with_context(|| format!("invalid config file: {}", path.display()))?;
    Ok(Some(cfg))
}

pub fn parse_config(s: &str) -> Result<FileConfig> {
    Ok(serde_yaml::from_str(s)?)
}
