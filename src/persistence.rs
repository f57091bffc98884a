//! Resumable scan state
//!
//! The only durable record is the list of targets still waiting for a scan.
//! Saves replace the file atomically: the new content is written and synced
//! to a sibling temp file which is then renamed over the state file, so a
//! crash leaves either the previous or the new checkpoint, never a torn one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{fs, io::AsyncWriteExt};

use crate::{
    config::AppConfig,
    error::{Result, ScannerError},
    logging::ScanLogger,
    target::Target,
};

/// Default state file, relative to the working directory
pub const DEFAULT_STATE_FILE: &str = "scan_state.json";

/// Persisted checkpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanState {
    #[serde(rename = "pending_ips", default)]
    pub pending_targets: Vec<Target>,
}

impl ScanState {
    pub fn new(pending_targets: Vec<Target>) -> Self {
        Self { pending_targets }
    }

    pub fn is_empty(&self) -> bool {
        self.pending_targets.is_empty()
    }
}

/// Storage for the resumable checkpoint
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Replace the stored checkpoint
    async fn save(&self, state: &ScanState) -> Result<()>;

    /// Read the stored checkpoint, `None` when nothing has been saved yet
    async fn load(&self) -> Result<Option<ScanState>>;
}

/// JSON file implementation of [`StateStore`]
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
    log: ScanLogger,
}

impl FileStateStore {
    pub fn new<P: Into<PathBuf>>(path: P, log: ScanLogger) -> Self {
        Self { path: path.into(), log }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| DEFAULT_STATE_FILE.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn write_temp(&self, temp: &Path, contents: &[u8]) -> Result<()> {
        let io_error = |op: &str, e: std::io::Error| ScannerError::persistence_io(op, temp, e.to_string());

        let mut file = fs::File::create(temp).await.map_err(|e| io_error("create", e))?;
        file.write_all(contents).await.map_err(|e| io_error("write", e))?;
        file.sync_all().await.map_err(|e| io_error("sync", e))?;
        Ok(())
    }
}

pub fn create_state_store(config: &AppConfig, log: &ScanLogger) -> Arc<dyn StateStore> {
    Arc::new(FileStateStore::new(
        config.persistence.state_file.clone(),
        log.component("persistence"),
    ))
}

impl Default for FileStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_FILE, ScanLogger::detached())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save(&self, state: &ScanState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| ScannerError::persistence_io("serialize", &self.path, e.to_string()))?;
        let temp = self.temp_path();

        let written = match self.write_temp(&temp, json.as_bytes()).await {
            Ok(()) => fs::rename(&temp, &self.path)
                .await
                .map_err(|e| ScannerError::persistence_io("rename", &self.path, e.to_string())),
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }

        tracing::debug!(
            parent: self.log.span(),
            path = %self.path.display(),
            pending = state.pending_targets.len(),
            "Saved scan state"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<ScanState>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ScannerError::persistence_io("read", &self.path, e.to_string())),
        };

        let text = std::str::from_utf8(&bytes)
            .map_err(|e| ScannerError::corrupted_state(&self.path, e.to_string()))?;
        let state: ScanState = serde_json::from_str(text)
            .map_err(|e| ScannerError::corrupted_state(&self.path, e.to_string()))?;

        tracing::debug!(
            parent: self.log.span(),
            path = %self.path.display(),
            pending = state.pending_targets.len(),
            "Loaded scan state"
        );
        Ok(Some(state))
    }
}
