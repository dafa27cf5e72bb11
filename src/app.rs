//! Wiring & DI. Bootstraps adapters around a host-supplied remote client and runs.
//! No business logic here.

use crate::adapters::persistence::{JsonlHistory, YamlConfigStore};
use crate::adapters::ui::IndicatifProgress;
use crate::domain::{DomainError, DownloadRecord};
use crate::ports::{ConfigStore, HistoryPort, RemoteClient};
use crate::shared::config::AppConfig;
use crate::shared::logging::init_tracing;
use crate::shared::shutdown::install_signal_handler;
use crate::usecases::{DownloadDriver, MediaWorker, RunReport, SyncService};
use std::sync::Arc;
use tracing::{info, warn};

/// Assemble the driver: YAML document, JSONL history, optional progress bars.
pub fn build_driver(cfg: &AppConfig, client: Arc<dyn RemoteClient>) -> DownloadDriver {
    let config_path = cfg.config_path_or_default();
    let history_path = cfg.history_path_or_default();
    let download_root = cfg.download_root_or_default();
    info!(
        config = %config_path.display(),
        history = %history_path.display(),
        downloads = %download_root.display(),
        pagination_limit = cfg.pagination_limit_or_default(),
        "paths"
    );

    let history: Arc<dyn HistoryPort> = Arc::new(JsonlHistory::new(history_path));
    let mut worker = MediaWorker::new(Arc::clone(&client)).with_history(history);
    if cfg.show_progress_or_default() {
        worker = worker.with_progress(Arc::new(IndicatifProgress::new()));
    }
    let sync = SyncService::new(client, Arc::new(worker), cfg.pagination_limit_or_default());
    let store: Arc<dyn ConfigStore> = Arc::new(YamlConfigStore::new(config_path));
    DownloadDriver::new(sync, store, download_root)
}

/// Newest-first entries of the download history at the configured path.
pub async fn recent_downloads(cfg: &AppConfig, limit: usize) -> Result<Vec<DownloadRecord>, DomainError> {
    JsonlHistory::new(cfg.history_path_or_default()).recent(limit).await
}

/// Entry point for a host binary: tracing, settings, signal handling, then the refresh loop.
pub async fn run(client: Arc<dyn RemoteClient>) -> Result<RunReport, DomainError> {
    init_tracing();
    let cfg = AppConfig::load().map_err(|e| DomainError::Config(e.to_string()))?;
    let cancel = install_signal_handler();

    let report = build_driver(&cfg, client).run_with_refresh(&cancel).await?;

    let failed = report.failed_count();
    if failed > 0 {
        warn!(failed, "{} downloads failed; they stay in ids_to_retry for the next run", failed);
    }
    if report.cancelled {
        info!("stopped early; progress has been saved");
    }
    Ok(report)
}
