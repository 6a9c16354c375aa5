use crate::chronos::retention::RetentionPolicy;
use crate::chronos::trigger::SaveTrigger;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_FILE_SIZE_LIMIT: u64 = 4 * 1024 * 1024;
pub const DEFAULT_MAX_SNAPSHOT_COUNT: usize = 50;
pub const LOCAL_CONFIG_FILE: &str = ".lhist.toml";

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub history: HistoryConfig,
    pub watcher: WatcherConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    pub history_root: PathBuf,
    pub file_size_limit_bytes: u64,
    /// 0 = unlimited.
    pub max_snapshot_count: usize,
    /// 0 = unlimited.
    pub max_age_days: u32,
    pub save_trigger: SaveTrigger,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct WatcherConfig {
    /// Save worker threads.
    pub workers: usize,
    /// Regexes matched against `/`-separated paths; matches are not saved.
    pub ignore_patterns: Vec<String>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            history_root: default_history_root(),
            file_size_limit_bytes: DEFAULT_FILE_SIZE_LIMIT,
            max_snapshot_count: DEFAULT_MAX_SNAPSHOT_COUNT,
            max_age_days: 0,
            save_trigger: SaveTrigger::default(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            ignore_patterns: vec![
                r"(^|/)\.git(/|$)".to_string(),
                r"(^|/)target(/|$)".to_string(),
                // tempfile's `.tmpXXXXXX` and editor swap/backup files
                r"(^|/)\.tmp[^/]*$".to_string(),
                r"\.sw[po]$".to_string(),
                r"~$".to_string(),
            ],
        }
    }
}

impl HistoryConfig {
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.max_snapshot_count, self.max_age_days)
    }
}

fn default_history_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("lhist").join("history"))
        .unwrap_or_else(|| PathBuf::from(".lhist-history"))
}

impl Config {
    /// Defaults, then `<config_dir>/lhist/config.toml`, then `.lhist.toml`
    /// in the working directory.
    pub fn load() -> Result<Self> {
        let global = dirs::config_dir().map(|dir| dir.join("lhist/config.toml"));
        Self::load_from(global.as_deref(), Path::new(LOCAL_CONFIG_FILE))
    }

    pub fn load_from(global: Option<&Path>, local: &Path) -> Result<Self> {
        let mut config = Config::default();

        // 1. Global config replaces the defaults it names.
        if let Some(global_path) = global.filter(|p| p.exists()) {
            match read_toml::<Config>(global_path) {
                Ok(global_config) => config = global_config,
                Err(e) => warn!(path = %global_path.display(), error = %e, "Ignoring global config"),
            }
        }

        // 2. Local config overrides field by field; ignore patterns add up.
        if local.exists() {
            match read_toml::<PartialConfig>(local) {
                Ok(partial) => config.merge(partial),
                Err(e) => warn!(path = %local.display(), error = %e, "Ignoring local config"),
            }
        }

        Ok(config)
    }

    fn merge(&mut self, partial: PartialConfig) {
        if let Some(h) = partial.history {
            if let Some(root) = h.history_root {
                self.history.history_root = root;
            }
            if let Some(limit) = h.file_size_limit_bytes {
                self.history.file_size_limit_bytes = limit;
            }
            if let Some(count) = h.max_snapshot_count {
                self.history.max_snapshot_count = count;
            }
            if let Some(days) = h.max_age_days {
                self.history.max_age_days = days;
            }
            if let Some(trigger) = h.save_trigger {
                self.history.save_trigger = trigger;
            }
        }
        if let Some(w) = partial.watcher {
            if let Some(workers) = w.workers {
                self.watcher.workers = workers;
            }
            if let Some(patterns) = w.ignore_patterns {
                self.watcher.ignore_patterns.extend(patterns);
                self.watcher.ignore_patterns.sort();
                self.watcher.ignore_patterns.dedup();
            }
        }
    }
}

#[derive(Deserialize)]
struct PartialConfig {
    history: Option<PartialHistoryConfig>,
    watcher: Option<PartialWatcherConfig>,
}

#[derive(Deserialize)]
struct PartialHistoryConfig {
    history_root: Option<PathBuf>,
    file_size_limit_bytes: Option<u64>,
    max_snapshot_count: Option<usize>,
    max_age_days: Option<u32>,
    save_trigger: Option<SaveTrigger>,
}

#[derive(Deserialize)]
struct PartialWatcherConfig {
    workers: Option<usize>,
    ignore_patterns: Option<Vec<String>>,
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}
