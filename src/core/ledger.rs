//! Completion ledger
//!
//! Records every completed download so the result survives the process.
//! The default store appends one JSON object per line.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::error_handling::{errors, AppResult};
use crate::core::models::DownloadSession;

/// What gets persisted for one completed session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub session_id: String,
    pub source_url: String,
    pub format_id: String,
    pub result_location: String,
    pub file_name: Option<String>,
    pub title: Option<String>,
    pub endpoint: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl CompletionRecord {
    /// Build from a session and the location it is about to complete with
    pub fn new(
        session: &DownloadSession,
        result_location: &str,
        file_name: Option<&str>,
        title: Option<&str>,
    ) -> Self {
        Self {
            session_id: session.id.clone(),
            source_url: session.source_url.to_string(),
            format_id: session.format_id.clone(),
            result_location: result_location.to_string(),
            file_name: file_name.map(str::to_string),
            title: title.map(str::to_string),
            endpoint: session.endpoint.clone(),
            completed_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait CompletionStore: Send + Sync {
    async fn record(&self, record: &CompletionRecord) -> AppResult<()>;
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

#[async_trait]
impl CompletionStore for NoopStore {
    async fn record(&self, _record: &CompletionRecord) -> AppResult<()> {
        Ok(())
    }
}

/// Append-only JSON lines file
#[derive(Debug)]
pub struct JsonLedgerStore {
    path: PathBuf,
    // Serializes appends from concurrent sessions
    write_lock: Mutex<()>,
}

impl JsonLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every record in the ledger, oldest first. Unreadable lines are skipped.
    pub async fn read_all(&self) -> AppResult<Vec<CompletionRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let records = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping unreadable ledger line in {:?}: {}", self.path, e);
                    None
                }
            })
            .collect();
        Ok(records)
    }
}

#[async_trait]
impl CompletionStore for JsonLedgerStore {
    async fn record(&self, record: &CompletionRecord) -> AppResult<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| errors::storage(format!("Failed to encode completion record: {e}")))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                errors::storage(format!("Failed to create ledger directory {:?}: {e}", parent))
            })?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| errors::storage(format!("Failed to open ledger {:?}: {e}", self.path)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| errors::storage(format!("Failed to append to ledger {:?}: {e}", self.path)))?;
        file.flush().await?;

        debug!("Recorded completion of session {} in {:?}", record.session_id, self.path);
        Ok(())
    }
}
