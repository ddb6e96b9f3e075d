//! JSON file store for reported incidents
//!
//! The log is a single document `{"Logs": [...]}`. Every read-modify-write
//! goes through a [`LogTransaction`], which holds the store's lock from the
//! read until the write completes, so concurrent reporters cannot drop each
//! other's entries.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::models::IncidentLog;

/// Default time to wait for the log lock before giving up
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum LogStoreError {
    #[error("failed to read incident log {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write incident log {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode incident log {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode incident log: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("timed out after {0:?} waiting for the incident log lock")]
    LockTimeout(Duration),
}

/// On-disk layout of the incident log
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncidentLogDocument {
    #[serde(rename = "Logs", default)]
    pub logs: Vec<IncidentLog>,
}

/// File-backed, append-only incident log
pub struct IncidentLogStore {
    path: PathBuf,
    lock: Mutex<()>,
    lock_timeout: Duration,
}

impl IncidentLogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry. A missing file is an empty log.
    pub async fn load(&self) -> Result<Vec<IncidentLog>, LogStoreError> {
        Ok(read_document(&self.path).await?.logs)
    }

    /// Read the entries of one site and detection method
    pub async fn load_for(
        &self,
        site_id: &str,
        method: &str,
    ) -> Result<Vec<IncidentLog>, LogStoreError> {
        let logs = self.load().await?;
        Ok(logs
            .into_iter()
            .filter(|l| l.belongs_to(site_id, method))
            .collect())
    }

    /// Lock the log and read its current contents
    pub async fn begin(&self) -> Result<LogTransaction<'_>, LogStoreError> {
        let guard = tokio::time::timeout(self.lock_timeout, self.lock.lock())
            .await
            .map_err(|_| LogStoreError::LockTimeout(self.lock_timeout))?;

        let document = read_document(&self.path).await?;

        Ok(LogTransaction {
            path: &self.path,
            _guard: guard,
            document,
            appended: 0,
        })
    }
}

/// Exclusive read-modify-write access to the log
pub struct LogTransaction<'a> {
    path: &'a Path,
    _guard: MutexGuard<'a, ()>,
    document: IncidentLogDocument,
    appended: usize,
}

impl LogTransaction<'_> {
    /// Entries as of the start of the transaction plus anything appended since
    pub fn entries(&self) -> &[IncidentLog] {
        &self.document.logs
    }

    pub fn append(&mut self, log: IncidentLog) {
        self.document.logs.push(log);
        self.appended += 1;
    }

    /// Write the document back if anything was appended, then release the lock
    pub async fn commit(self) -> Result<usize, LogStoreError> {
        if self.appended > 0 {
            write_document(self.path, &self.document).await?;
            debug!(
                path = %self.path.display(),
                appended = self.appended,
                total = self.document.logs.len(),
                "Incident log written"
            );
        }
        Ok(self.appended)
    }
}

async fn read_document(path: &Path) -> Result<IncidentLogDocument, LogStoreError> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(IncidentLogDocument::default()),
        Err(source) => {
            return Err(LogStoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(IncidentLogDocument::default());
    }

    serde_json::from_slice(&data).map_err(|source| LogStoreError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

async fn write_document(path: &Path, document: &IncidentLogDocument) -> Result<(), LogStoreError> {
    let write_err = |source| LogStoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let json = serde_json::to_vec_pretty(document).map_err(LogStoreError::Encode)?;

    // Write to a sibling temp file and rename so readers never see a partial document
    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, &json)
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(write_err)?;

    Ok(())
}
