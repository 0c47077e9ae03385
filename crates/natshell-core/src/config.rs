use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },
    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnginePreference {
    #[default]
    Auto,
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SafetyMode {
    /// Default: Confirm verdicts require interactive approval.
    #[default]
    Confirm,
    /// Confirm verdicts are downgraded to Safe but annotated with a warning.
    Warn,
    /// Confirm verdicts are silently downgraded to Safe. Blocked is never
    /// downgraded by any mode.
    Yolo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub path: Option<PathBuf>,
    pub n_ctx: u32,
    pub n_gpu_layers: i32,
    pub main_gpu: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: None,
            n_ctx: 4096,
            n_gpu_layers: 0,
            main_gpu: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RemoteConfig {
    pub url: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub preferred: EnginePreference,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preferred: EnginePreference::Auto,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub max_steps: Option<u32>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: None,
            temperature: 0.2,
            max_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SafetyConfig {
    pub mode: SafetyMode,
    #[serde(default)]
    pub always_confirm: Vec<String>,
    #[serde(default)]
    pub blocked: Vec<String>,
    #[serde(default)]
    pub sensitive_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    pub dir: Option<PathBuf>,
    pub max_per_file: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_per_file: 10,
        }
    }
}

/// Top-level, on-disk configuration document. Grounded on
/// `deepseek_core::AppConfig`'s load/ensure/save trio: `load` is a pure
/// read-or-default, `ensure` creates the directory and default file on
/// first run, `save` is the only path that ever writes and always does so
/// atomically.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

impl Config {
    pub fn config_path(config_root: &Path) -> PathBuf {
        config_root.join("config.toml")
    }

    /// Read the config file if it exists, otherwise return defaults. Never
    /// writes anything.
    pub fn load(config_root: &Path) -> Result<Self, ConfigError> {
        let path = Self::config_path(config_root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let cfg: Config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source: Box::new(source),
        })?;
        warn_if_api_key_world_readable(&cfg, &path);
        Ok(cfg)
    }

    /// Create `config_root` and a default config file if nothing exists
    /// yet. Idempotent.
    pub fn ensure(config_root: &Path) -> Result<Self, ConfigError> {
        fs::create_dir_all(config_root).map_err(|source| ConfigError::Read {
            path: config_root.to_path_buf(),
            source,
        })?;
        let path = Self::config_path(config_root);
        if path.exists() {
            return Self::load(config_root);
        }
        let cfg = Self::default();
        cfg.save(config_root)?;
        Ok(cfg)
    }

    /// Atomically persist this config: write to a temp file in the same
    /// directory, then rename over the target. Grounded on
    /// `danielchristiancazares-forge`'s `atomic_write` temp-file-then-rename
    /// pattern.
    pub fn save(&self, config_root: &Path) -> Result<(), ConfigError> {
        fs::create_dir_all(config_root).map_err(|source| ConfigError::Write {
            path: config_root.to_path_buf(),
            source,
        })?;
        let path = Self::config_path(config_root);
        let body = toml::to_string_pretty(self)?;

        let mut tmp = tempfile::NamedTempFile::new_in(config_root).map_err(|source| {
            ConfigError::Write {
                path: path.clone(),
                source,
            }
        })?;
        use std::io::Write;
        tmp.write_all(body.as_bytes())
            .map_err(|source| ConfigError::Write {
                path: path.clone(),
                source,
            })?;
        tmp.persist(&path)
            .map_err(|e| ConfigError::Write {
                path: path.clone(),
                source: e.error,
            })?;
        Ok(())
    }
}

fn warn_if_api_key_world_readable(cfg: &Config, path: &Path) {
    let Some(key) = cfg.remote.api_key.as_ref() else {
        return;
    };
    if key.is_empty() {
        return;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = fs::metadata(path) {
            let mode = meta.permissions().mode() & 0o777;
            if mode & 0o077 != 0 {
                eprintln!(
                    "warning: {} contains an API key and is group/world readable (mode {:o})",
                    path.display(),
                    mode
                );
            }
        }
    }
}
