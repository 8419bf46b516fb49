use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

use crate::passes::codes::DEFAULT_CODE_PREFIX;

pub const DATA_DIR_ENV: &str = "CAREPASS_DATA_DIR";
pub const DEBUG_ENV: &str = "CAREPASS_DEBUG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Prefix of generated pass codes, e.g. `CP` in `CP-7Q2K`.
    pub code_prefix: String,
    pub poll_interval_secs: u64,
    /// Window in which a second pending request from the same phone is
    /// treated as a duplicate.
    pub duplicate_window_mins: i64,
    pub max_code_attempts: u32,
    pub max_entries_cap: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            code_prefix: DEFAULT_CODE_PREFIX.into(),
            poll_interval_secs: 5,
            duplicate_window_mins: 30,
            max_code_attempts: 16,
            max_entries_cap: 100,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.code_prefix.trim().is_empty() {
            return Err(anyhow!("code_prefix must not be empty"));
        }
        if self.poll_interval_secs == 0 {
            return Err(anyhow!("poll_interval_secs must be greater than zero"));
        }
        if self.max_entries_cap == 0 {
            return Err(anyhow!("max_entries_cap must be greater than zero"));
        }
        Ok(())
    }

    /// Watcher poll interval; debug mode polls every second.
    pub fn poll_interval(&self) -> Duration {
        if debug_mode() {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(self.poll_interval_secs.max(1))
        }
    }

    pub fn duplicate_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.duplicate_window_mins.max(0))
    }
}

pub fn debug_mode() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// `--data-dir` wins over `CAREPASS_DATA_DIR`, which wins over the
/// per-user platform data directory.
pub fn resolve_data_dir(cli: Option<PathBuf>) -> PathBuf {
    cli.or_else(|| std::env::var_os(DATA_DIR_ENV).map(PathBuf::from))
        .unwrap_or_else(default_data_dir)
}

/// Platform data directory, e.g. `~/.local/share/carepass` on Linux.
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("com", "carepass", "carepass")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(dirs_fallback)
}

fn dirs_fallback() -> PathBuf {
    let base = std::env::var_os("HOME")
        .map(PathBuf::from)
        .filter(|home| home.is_absolute())
        .unwrap_or_else(std::env::temp_dir);
    base.join(".local").join("share").join("carepass")
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            Settings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Settings {
        self.data
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn update(&self, settings: Settings) -> Result<()> {
        settings.validate()?;
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
