//! Process settings: where the configuration document, downloads and history live.
//!
//! Read from `TG_MIRROR_*` environment variables (a `.env` file is honoured) and,
//! optionally, the settings file named by `TG_MIRROR_SETTINGS`.

use crate::usecases::sync_service::DEFAULT_PAGINATION_LIMIT;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

pub const ENV_PREFIX: &str = "TG_MIRROR";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const DEFAULT_DOWNLOAD_ROOT: &str = "./downloads";
pub const DEFAULT_HISTORY_PATH: &str = "./data/history.jsonl";

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct AppConfig {
    /// YAML downloader document with chats and checkpoints. Read from TG_MIRROR_CONFIG_PATH.
    #[serde(default)]
    pub config_path: Option<PathBuf>,

    /// Root for chats without their own directory. Read from TG_MIRROR_DOWNLOAD_ROOT.
    #[serde(default)]
    pub download_root: Option<PathBuf>,

    /// JSON Lines download log. Read from TG_MIRROR_HISTORY_PATH.
    #[serde(default)]
    pub history_path: Option<PathBuf>,

    /// Messages per batch. Read from TG_MIRROR_PAGINATION_LIMIT.
    #[serde(default)]
    pub pagination_limit: Option<usize>,

    /// Per-file progress bars. Read from TG_MIRROR_SHOW_PROGRESS.
    #[serde(default)]
    pub show_progress: Option<bool>,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();
        let mut c = config::Config::builder();
        if let Ok(path) = std::env::var(format!("{}_SETTINGS", ENV_PREFIX)) {
            c = c.add_source(config::File::with_name(&path));
        }
        c = c.add_source(config::Environment::with_prefix(ENV_PREFIX));
        c.build()?.try_deserialize()
    }

    /// Build from an explicit variable map instead of the process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).source(Some(vars)))
            .build()?
            .try_deserialize()
    }

    pub fn config_path_or_default(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn download_root_or_default(&self) -> PathBuf {
        self.download_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_ROOT))
    }

    pub fn history_path_or_default(&self) -> PathBuf {
        self.history_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_PATH))
    }

    /// Defaults to 100; 0 is treated as unset.
    pub fn pagination_limit_or_default(&self) -> usize {
        self.pagination_limit
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_PAGINATION_LIMIT)
    }

    pub fn show_progress_or_default(&self) -> bool {
        self.show_progress.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::from_vars(HashMap::new()).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.config_path_or_default(), PathBuf::from("config.yaml"));
        assert_eq!(cfg.download_root_or_default(), PathBuf::from("./downloads"));
        assert_eq!(cfg.history_path_or_default(), PathBuf::from("./data/history.jsonl"));
        assert_eq!(cfg.pagination_limit_or_default(), 100);
        assert!(cfg.show_progress_or_default());
    }

    #[test]
    fn test_prefixed_variables() {
        let cfg = AppConfig::from_vars(vars(&[
            ("TG_MIRROR_CONFIG_PATH", "/etc/mirror/config.yaml"),
            ("TG_MIRROR_PAGINATION_LIMIT", "25"),
            ("TG_MIRROR_SHOW_PROGRESS", "false"),
            ("OTHER_DOWNLOAD_ROOT", "/ignored"),
        ]))
        .unwrap();
        assert_eq!(cfg.config_path_or_default(), PathBuf::from("/etc/mirror/config.yaml"));
        assert_eq!(cfg.pagination_limit_or_default(), 25);
        assert!(!cfg.show_progress_or_default());
        assert_eq!(cfg.download_root, None);
    }

    #[test]
    fn test_zero_pagination_limit() {
        let cfg = AppConfig::from_vars(vars(&[("TG_MIRROR_PAGINATION_LIMIT", "0")])).unwrap();
        assert_eq!(cfg.pagination_limit_or_default(), DEFAULT_PAGINATION_LIMIT);
    }
}
