//! Two-phase restore: load a catalogued backup into the staging database,
//! then replace production with it behind a safety backup.
//!
//! Every operation holds the session lock for its whole duration, so
//! restores never interleave with each other. Promotion also takes the
//! production gate for writing, which waits for running backups to finish.
//! Each phase runs against a deadline so a stuck server cannot hold the
//! session lock and the gate forever.

use crate::config::{DatabaseConfig, PromotionStrategy};
use crate::error::{BackupError, Result};
use crate::models::backup_record::{BackupStatus, TenantScope};
use crate::platform::{CredentialVerifier, DatabaseAdmin};
use crate::services::catalog::BackupCatalog;
use crate::services::dumper::{file_size, ProductionGate};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const SAFETY_BACKUP_PREFIX: &str = "restauracion-backup-seguridad_";
pub const PROMOTION_TEMP_PREFIX: &str = "temp_restauracion_";
pub const DEFAULT_RESTORE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Proof of identity for destructive operations.
#[derive(Clone)]
pub struct AdminCredential {
    pub user_id: i64,
    pub password: String,
}

impl AdminCredential {
    pub fn new(user_id: i64, password: impl Into<String>) -> Self {
        Self { user_id, password: password.into() }
    }
}

impl fmt::Debug for AdminCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredential")
            .field("user_id", &self.user_id)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RestoreSession {
    pub backup_id: i64,
    pub tenant_id: Option<i64>,
    pub table_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestorePhase {
    #[default]
    NoSession,
    Staged(RestoreSession),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionReport {
    pub backup_id: i64,
    pub safety_backup: PathBuf,
    pub table_count: usize,
}

pub struct RestoreOrchestrator {
    catalog: BackupCatalog,
    admin: Arc<dyn DatabaseAdmin>,
    credentials: Arc<dyn CredentialVerifier>,
    databases: DatabaseConfig,
    backups_dir: PathBuf,
    strategy: PromotionStrategy,
    gate: ProductionGate,
    timeout: Duration,
    phase: Mutex<RestorePhase>,
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Could not remove file"),
    }
}

impl RestoreOrchestrator {
    pub fn new(
        catalog: BackupCatalog,
        admin: Arc<dyn DatabaseAdmin>,
        credentials: Arc<dyn CredentialVerifier>,
        databases: DatabaseConfig,
        backups_dir: PathBuf,
        strategy: PromotionStrategy,
        gate: ProductionGate,
    ) -> Self {
        Self {
            catalog,
            admin,
            credentials,
            databases,
            backups_dir,
            strategy,
            gate,
            timeout: DEFAULT_RESTORE_TIMEOUT,
            phase: Mutex::new(RestorePhase::NoSession),
        }
    }

    /// Upper bound for staging, for promotion once the gate is held, and for
    /// dropping staging.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.timeout
    }

    async fn within<T>(&self, deadline: Instant, step: &str, work: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout_at(deadline, work).await {
            Ok(result) => result,
            Err(_) => Err(BackupError::ExternalTool(format!(
                "{step} did not finish within the restore timeout of {:?}",
                self.timeout
            ))),
        }
    }

    pub async fn phase(&self) -> RestorePhase {
        *self.phase.lock().await
    }

    /// Loads backup `backup_id` into the staging database and returns the
    /// number of tables it produced.
    pub async fn restore_to_staging(&self, backup_id: i64, scope: TenantScope) -> Result<usize> {
        if backup_id <= 0 {
            return Err(BackupError::Validation(format!("invalid backup id {backup_id}")));
        }
        let mut phase = self.phase.lock().await;
        *phase = RestorePhase::NoSession;

        let record = self
            .catalog
            .get(backup_id, scope)
            .await?
            .ok_or_else(|| BackupError::NotFound(format!("backup {backup_id} not found")))?;
        if record.status != BackupStatus::Success {
            return Err(BackupError::Validation(format!(
                "backup {backup_id} is {} and cannot be restored",
                record.status
            )));
        }
        let path = PathBuf::from(&record.filepath);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(BackupError::NotFound(format!(
                "file of backup {backup_id} is missing: {}",
                path.display()
            )));
        }

        let staging = &self.databases.staging;
        tracing::info!(backup_id, staging = %staging, "Restoring backup into staging");
        let table_count = self
            .within(self.deadline(), "staging restore", async {
                self.admin.drop_database(staging).await?;
                self.admin.create_database(staging).await?;
                self.admin.load_script(staging, &path).await?;
                Ok(self.admin.list_tables(staging).await?.len())
            })
            .await?;
        if table_count == 0 {
            return Err(BackupError::Integrity(format!(
                "staging database {staging} has no tables after loading backup {backup_id}"
            )));
        }

        *phase = RestorePhase::Staged(RestoreSession {
            backup_id,
            tenant_id: record.tenant_id,
            table_count,
        });
        tracing::info!(backup_id, table_count, "Backup staged");
        Ok(table_count)
    }

    /// Replaces production with the staged dataset.
    ///
    /// Nothing in production changes until a non-empty safety backup of it
    /// exists. Failures after that point carry the safety backup path.
    pub async fn promote_to_production(&self, credential: &AdminCredential) -> Result<PromotionReport> {
        let mut phase = self.phase.lock().await;
        let RestorePhase::Staged(session) = *phase else {
            return Err(BackupError::State("no restore has been staged".into()));
        };
        if !self.credentials.verify(credential.user_id, &credential.password).await? {
            tracing::warn!(user_id = credential.user_id, "Promotion rejected: wrong password");
            return Err(BackupError::Credential("password verification failed".into()));
        }

        let _writing = self.gate.write().await;
        let deadline = self.deadline();
        tokio::fs::create_dir_all(&self.backups_dir).await?;
        let stamp = timestamp();
        let production = &self.databases.production;
        let staging = &self.databases.staging;

        let safety = self.backups_dir.join(format!("{SAFETY_BACKUP_PREFIX}{stamp}.sql"));
        if let Err(e) = self
            .within(deadline, "safety backup", self.dump_checked(production, &safety))
            .await
        {
            remove_quietly(&safety).await;
            tracing::error!(error = %e, "Safety backup failed, production left untouched");
            return Err(BackupError::ExternalTool(format!("safety backup of {production} failed: {e}")));
        }
        tracing::info!(path = %safety.display(), "Safety backup written");

        let temp = self.backups_dir.join(format!("{PROMOTION_TEMP_PREFIX}{stamp}.sql"));
        if let Err(e) = self
            .within(deadline, "staging dump", self.dump_checked(staging, &temp))
            .await
        {
            remove_quietly(&temp).await;
            tracing::error!(error = %e, safety_backup = %safety.display(), "Could not dump staging for promotion");
            return Err(BackupError::Promotion { safety_backup: safety, source: Box::new(e) });
        }

        if let Err(e) = self
            .within(deadline, "production replacement", self.replace_production(&temp))
            .await
        {
            remove_quietly(&temp).await;
            tracing::error!(error = %e, safety_backup = %safety.display(), "Promotion failed");
            return Err(BackupError::Promotion { safety_backup: safety, source: Box::new(e) });
        }

        remove_quietly(&temp).await;
        let dropped = self.within(self.deadline(), "staging drop", self.admin.drop_database(staging));
        if let Err(e) = dropped.await {
            tracing::warn!(staging = %staging, error = %e, "Could not drop staging after promotion");
        }
        *phase = RestorePhase::NoSession;
        tracing::info!(backup_id = session.backup_id, "Production replaced with staged backup");

        Ok(PromotionReport {
            backup_id: session.backup_id,
            safety_backup: safety,
            table_count: session.table_count,
        })
    }

    /// Drops the staging database whether or not it exists.
    pub async fn delete_staging(&self) -> Result<()> {
        let mut phase = self.phase.lock().await;
        self.within(self.deadline(), "staging drop", self.admin.drop_database(&self.databases.staging))
            .await?;
        *phase = RestorePhase::NoSession;
        tracing::info!(staging = %self.databases.staging, "Staging database deleted");
        Ok(())
    }

    /// Dumps `database` into `dest` and requires a non-empty result.
    async fn dump_checked(&self, database: &str, dest: &Path) -> Result<u64> {
        let report = self.admin.dump_database(database, dest).await?;
        let size = file_size(dest).await;
        if size == 0 {
            let detail = if report.success { "empty output".to_string() } else { report.describe() };
            return Err(BackupError::ExternalTool(format!("dump of {database} failed: {detail}")));
        }
        if !report.success {
            tracing::warn!(database, detail = %report.describe(), "Dump finished with warnings");
        }
        Ok(size)
    }

    async fn replace_production(&self, script: &Path) -> Result<()> {
        let production = &self.databases.production;
        match self.strategy {
            PromotionStrategy::DropRecreate => {
                self.admin.drop_database(production).await?;
                self.admin.create_database(production).await?;
                self.admin.load_script(production, script).await
            }
            PromotionStrategy::ShadowSwap => {
                let shadow = self.databases.shadow();
                let retired = self.databases.retired();
                self.admin.drop_database(&shadow).await?;
                self.admin.create_database(&shadow).await?;
                self.admin.load_script(&shadow, script).await?;
                if self.admin.list_tables(&shadow).await?.is_empty() {
                    return Err(BackupError::Integrity(format!("{shadow} has no tables after loading")));
                }
                self.admin.swap_tables(production, &shadow, &retired).await?;
                for leftover in [&retired, &shadow] {
                    if let Err(e) = self.admin.drop_database(leftover).await {
                        tracing::warn!(database = %leftover, error = %e, "Could not drop promotion leftover");
                    }
                }
                Ok(())
            }
        }
    }
}
