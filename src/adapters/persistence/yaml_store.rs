//! Implements ConfigStore using a YAML file.
//!
//! The whole document is rewritten on every save, so writes go through a temp
//! file and a rename.

use crate::domain::{DomainError, DownloaderConfig};
use crate::ports::ConfigStore;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// YAML file-based configuration store.
pub struct YamlConfigStore {
    path: PathBuf,
}

impl YamlConfigStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "config.yaml".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait::async_trait]
impl ConfigStore for YamlConfigStore {
    async fn load(&self) -> Result<DownloaderConfig, DomainError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DomainError::Store(format!(
                    "configuration file {} not found",
                    self.path.display()
                )));
            }
            Err(e) => return Err(DomainError::Store(format!("read {}: {}", self.path.display(), e))),
        };
        if text.trim().is_empty() {
            return Ok(DownloaderConfig::default());
        }
        serde_yaml::from_str(&text)
            .map_err(|e| DomainError::Store(format!("parse {}: {}", self.path.display(), e)))
    }

    /// Write-replace: temp file, `sync_all`, rename over the target.
    async fn save(&self, config: &DownloaderConfig) -> Result<(), DomainError> {
        let yaml = serde_yaml::to_string(config).map_err(|e| DomainError::Store(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DomainError::Store(format!("create dir: {}", e)))?;
        }

        let temp_path = self.temp_path();
        let mut f = fs::File::create(&temp_path)
            .await
            .map_err(|e| DomainError::Store(format!("create temp file: {}", e)))?;
        f.write_all(yaml.as_bytes())
            .await
            .map_err(|e| DomainError::Store(format!("write temp file: {}", e)))?;
        f.sync_all()
            .await
            .map_err(|e| DomainError::Store(format!("sync temp file: {}", e)))?;
        drop(f);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| DomainError::Store(format!("atomic rename failed: {}", e)))?;
        Ok(())
    }
}
