//! Implements HistoryPort. One JSON object per successful download, appended to a single file.
//! Newest-first reads scan backwards from EOF in fixed-size blocks.

use crate::domain::{DomainError, DownloadRecord};
use crate::ports::HistoryPort;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

const REVERSE_READ_BLOCK: u64 = 4096;

/// JSON Lines download history.
pub struct JsonlHistory {
    path: PathBuf,
    /// Serializes appends from concurrent downloads.
    write_lock: Mutex<()>,
}

impl JsonlHistory {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Up to `max_lines` lines from the end of the file, last line first.
    async fn read_lines_reverse(path: &Path, max_lines: usize) -> Result<Vec<String>, DomainError> {
        let mut f = match fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(DomainError::History(e.to_string())),
        };
        let len = f
            .metadata()
            .await
            .map_err(|e| DomainError::History(e.to_string()))?
            .len();

        let mut lines: Vec<String> = Vec::with_capacity(max_lines.min(1024));
        let mut pending: Vec<u8> = Vec::new();
        let mut pos = len;

        while lines.len() < max_lines && pos > 0 {
            let read_start = pos.saturating_sub(REVERSE_READ_BLOCK);
            let mut block = vec![0u8; (pos - read_start) as usize];
            f.seek(SeekFrom::Start(read_start))
                .await
                .map_err(|e| DomainError::History(e.to_string()))?;
            f.read_exact(&mut block)
                .await
                .map_err(|e| DomainError::History(e.to_string()))?;
            pos = read_start;

            // block sits before pending in file order
            block.append(&mut pending);
            let mut buf = block;
            while lines.len() < max_lines {
                let Some(last_nl) = buf.iter().rposition(|&b| b == b'\n') else {
                    break;
                };
                let line = buf.split_off(last_nl + 1);
                buf.pop();
                if !line.is_empty() {
                    lines.push(String::from_utf8_lossy(&line).into_owned());
                }
            }
            pending = buf;
        }

        if lines.len() < max_lines && !pending.is_empty() {
            lines.push(String::from_utf8_lossy(&pending).into_owned());
        }
        Ok(lines)
    }
}

#[async_trait::async_trait]
impl HistoryPort for JsonlHistory {
    async fn record(&self, record: &DownloadRecord) -> Result<(), DomainError> {
        let mut line = serde_json::to_string(record).map_err(|e| DomainError::History(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DomainError::History(e.to_string()))?;
        }
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| DomainError::History(e.to_string()))?;
        f.write_all(line.as_bytes())
            .await
            .map_err(|e| DomainError::History(e.to_string()))?;
        f.flush()
            .await
            .map_err(|e| DomainError::History(e.to_string()))?;
        debug!(chat_id = record.chat_id, msg_id = record.message_id, "recorded download");
        Ok(())
    }

    /// Unparseable lines are skipped.
    async fn recent(&self, limit: usize) -> Result<Vec<DownloadRecord>, DomainError> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let lines = Self::read_lines_reverse(&self.path, limit).await?;
        Ok(lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}
