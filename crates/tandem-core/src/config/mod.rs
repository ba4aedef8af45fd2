use crate::error::{Result, TandemError};
use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TandemConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    /// Custom path for SQLite database. Defaults to `~/.config/tandem/tandem.db`.
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_port")]
    pub port: u16,
    #[serde(default = "default_web_host")]
    pub host: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: default_web_port(),
            host: default_web_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_duration_minutes")]
    pub default_duration_minutes: u32,
    /// Minutes after `scheduled_at` during which presence may still be marked.
    #[serde(default = "default_attendance_window_minutes")]
    pub attendance_window_minutes: u32,
    /// Re-read attempts when a same-status write loses to a concurrent one.
    #[serde(default = "default_max_write_retries")]
    pub max_write_retries: usize,
}

impl SessionsConfig {
    pub fn attendance_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.attendance_window_minutes))
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            default_duration_minutes: default_duration_minutes(),
            attendance_window_minutes: default_attendance_window_minutes(),
            max_write_retries: default_max_write_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Custom path for the JSONL audit log. Defaults to `~/.config/tandem/history.jsonl`.
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Valid storage backend names.
pub const VALID_STORAGE_BACKENDS: &[&str] = &["sqlite", "memory"];

// -- Defaults --

fn default_storage_backend() -> String {
    "sqlite".to_string()
}
fn default_web_port() -> u16 {
    37740
}
fn default_web_host() -> String {
    "127.0.0.1".to_string()
}
fn default_duration_minutes() -> u32 {
    crate::model::DEFAULT_DURATION_MINUTES
}
fn default_attendance_window_minutes() -> u32 {
    10
}
fn default_max_write_retries() -> usize {
    3
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

impl TandemConfig {
    /// Merge the TOML layers that exist, later ones winning:
    /// global `~/.config/tandem/config.toml`, then `.tandem/config.toml` and
    /// `.tandem/config.local.toml` under `project_dir`.
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut layers: Vec<PathBuf> = global_config_path().into_iter().collect();
        if let Some(dir) = project_dir {
            let project = dir.join(".tandem");
            layers.push(project.join("config.toml"));
            layers.push(project.join("config.local.toml"));
        }

        let builder = layers
            .into_iter()
            .filter(|path| path.exists())
            .fold(Config::builder(), |builder, path| {
                tracing::debug!(path = %path.display(), "loading config layer");
                builder.add_source(File::from(path).required(false))
            });

        let config = builder
            .build()
            .map_err(|e| TandemError::Config(e.to_string()))?;

        let mut cfg: Self = config
            .try_deserialize()
            .map_err(|e| TandemError::Config(e.to_string()))?;

        cfg.validate();
        Ok(cfg)
    }

    /// Built-in defaults, ignoring any files on disk.
    pub fn default_config() -> Self {
        Self {
            storage: StorageConfig::default(),
            web: WebConfig::default(),
            sessions: SessionsConfig::default(),
            sweeper: SweeperConfig::default(),
            history: HistoryConfig::default(),
        }
    }

    /// Clamp out-of-range values in place. Returns one warning per fix; each
    /// is also logged.
    pub fn validate(&mut self) -> Vec<String> {
        use crate::model::{MAX_DURATION_MINUTES, MIN_DURATION_MINUTES};

        let mut warnings = Vec::new();

        if !VALID_STORAGE_BACKENDS.contains(&self.storage.backend.as_str()) {
            warnings.push(format!(
                "unknown storage backend '{}', valid: {}",
                self.storage.backend,
                VALID_STORAGE_BACKENDS.join(", ")
            ));
        }

        let duration = &mut self.sessions.default_duration_minutes;
        if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(duration) {
            let clamped = (*duration).clamp(MIN_DURATION_MINUTES, MAX_DURATION_MINUTES);
            warnings.push(format!(
                "sessions.default_duration_minutes = {duration} out of range \
                 [{MIN_DURATION_MINUTES}, {MAX_DURATION_MINUTES}], clamping to {clamped}"
            ));
            *duration = clamped;
        }

        if self.sessions.attendance_window_minutes == 0 {
            warnings.push("sessions.attendance_window_minutes = 0, setting to 1".to_string());
            self.sessions.attendance_window_minutes = 1;
        }
        if self.sessions.max_write_retries == 0 {
            warnings.push("sessions.max_write_retries = 0, setting to 1".to_string());
            self.sessions.max_write_retries = 1;
        }
        if self.sweeper.interval_secs == 0 {
            warnings.push("sweeper.interval_secs = 0, setting to 1".to_string());
            self.sweeper.interval_secs = 1;
        }

        for w in &warnings {
            tracing::warn!("config: {w}");
        }

        warnings
    }
}

fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tandem").join("config.toml"))
}
