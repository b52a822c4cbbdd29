//! Snapshot producers.
//!
//! Both dumpers share one catalog lifecycle: reserve a file, create an
//! `in_progress` record, produce the file while holding a read guard on
//! production, measure it, then conclude the record exactly once.

pub mod full;
pub mod script;
pub mod tenant;

pub use full::FullDumper;
pub use tenant::TenantDumper;

use crate::error::{BackupError, Result};
use crate::models::backup_record::{BackupOutcome, BackupType, NewBackupRecord};
use crate::services::catalog::BackupCatalog;
use crate::services::retention::{RetentionReaper, BACKUP_FILE_PREFIX, BACKUP_FILE_SUFFIX};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Readers are backups of production; the writer is a promotion replacing it.
pub type ProductionGate = Arc<RwLock<()>>;

const MAX_NAME_ATTEMPTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpScope {
    Full,
    Tenant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpRequest {
    pub tenant_id: Option<i64>,
    pub created_by: Option<i64>,
    pub automatic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DumpArtifact {
    pub backup_id: i64,
    pub filename: String,
    pub filepath: PathBuf,
    pub size_bytes: u64,
}

#[async_trait]
pub trait Dumper: Send + Sync {
    fn scope(&self) -> DumpScope;

    async fn run(&self, request: DumpRequest) -> Result<DumpArtifact>;
}

/// Keeps labels filesystem-safe; anything unusual becomes `-`.
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "unnamed".into()
    } else {
        cleaned
    }
}

/// `backup_<label>_<YYYY-MM-DD_HH-mm-ss>.sql`, with `-<n>` before the
/// extension when the same second is already taken.
pub fn backup_filename(label: &str, at: NaiveDateTime, attempt: usize) -> String {
    let stamp = at.format("%Y-%m-%d_%H-%M-%S");
    let label = sanitize_label(label);
    if attempt == 0 {
        format!("{BACKUP_FILE_PREFIX}{label}_{stamp}{BACKUP_FILE_SUFFIX}")
    } else {
        format!("{BACKUP_FILE_PREFIX}{label}_{stamp}-{attempt}{BACKUP_FILE_SUFFIX}")
    }
}

pub(crate) async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

#[derive(Clone)]
pub struct DumpLifecycle {
    catalog: BackupCatalog,
    reaper: RetentionReaper,
    backups_dir: PathBuf,
    gate: ProductionGate,
    timeout: Duration,
}

impl DumpLifecycle {
    pub fn new(
        catalog: BackupCatalog,
        reaper: RetentionReaper,
        backups_dir: PathBuf,
        gate: ProductionGate,
        timeout: Duration,
    ) -> Self {
        Self { catalog, reaper, backups_dir, gate, timeout }
    }

    /// Creates the target file atomically so concurrent dumps never share one.
    async fn reserve_file(&self, label: &str) -> Result<(String, PathBuf)> {
        tokio::fs::create_dir_all(&self.backups_dir).await?;
        let now = chrono::Local::now().naive_local();
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let filename = backup_filename(label, now, attempt);
            let path = self.backups_dir.join(&filename);
            match tokio::fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(_) => return Ok((filename, path)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(BackupError::Validation(format!(
            "no free backup file name for label '{label}' in {}",
            self.backups_dir.display()
        )))
    }

    /// Runs `produce` against a freshly catalogued file and concludes the
    /// record with the result.
    pub async fn execute<F, Fut>(&self, request: &DumpRequest, label: &str, produce: F) -> Result<DumpArtifact>
    where
        F: FnOnce(PathBuf) -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        let (filename, filepath) = self.reserve_file(label).await?;
        let created = self
            .catalog
            .create(NewBackupRecord {
                tenant_id: request.tenant_id,
                filename: filename.clone(),
                filepath: filepath.to_string_lossy().to_string(),
                backup_type: if request.automatic { BackupType::Automatic } else { BackupType::Manual },
                created_by: request.created_by,
            })
            .await;
        let backup_id = match created {
            Ok(id) => id,
            Err(e) => {
                let _ = tokio::fs::remove_file(&filepath).await;
                return Err(e);
            }
        };

        let produced = {
            let _reading = self.gate.read().await;
            match tokio::time::timeout(self.timeout, produce(filepath.clone())).await {
                Ok(result) => result,
                Err(_) => Err(BackupError::ExternalTool(format!(
                    "dump timed out after {}s",
                    self.timeout.as_secs()
                ))),
            }
        };

        let measured = match produced {
            Ok(()) => match file_size(&filepath).await {
                0 => Err(BackupError::Integrity(format!("{filename} is empty"))),
                size => Ok(size),
            },
            Err(e) => Err(e),
        };

        match measured {
            Ok(size_bytes) => {
                let concluded = self
                    .catalog
                    .update_status(backup_id, BackupOutcome::Success { size_bytes })
                    .await;
                if let Err(e) = concluded {
                    tracing::error!(backup_id, error = %e, "Could not mark backup as successful");
                    self.mark_failed(backup_id, &e).await;
                    return Err(e);
                }
                tracing::info!(backup_id, path = %filepath.display(), size_bytes, "Backup completed");
                self.sweep_retention().await;
                Ok(DumpArtifact { backup_id, filename, filepath, size_bytes })
            }
            Err(e) => {
                tracing::error!(backup_id, path = %filepath.display(), error = %e, "Backup failed");
                self.mark_failed(backup_id, &e).await;
                Err(e)
            }
        }
    }

    /// Best effort; the record stays `in_progress` only if this fails too.
    async fn mark_failed(&self, backup_id: i64, cause: &BackupError) {
        let failed = BackupOutcome::Failed { message: cause.to_string() };
        if let Err(e) = self.catalog.update_status(backup_id, failed).await {
            tracing::error!(backup_id, error = %e, "Could not mark backup as failed");
        }
    }

    async fn sweep_retention(&self) {
        let reaper = self.reaper.clone();
        match tokio::task::spawn_blocking(move || reaper.sweep()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Retention sweep failed"),
            Err(e) => tracing::warn!(error = %e, "Retention sweep panicked"),
        }
    }
}
