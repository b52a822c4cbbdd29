use crate::db::connection::DbPool;
use crate::error::{BackupError, Result};
use crate::models::backup_record::{
    self, BackupFilter, BackupOutcome, BackupRecord, NewBackupRecord, PageRequest, TenantScope,
};
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct BackupPage {
    pub records: Vec<BackupRecord>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

/// Durable record of every backup attempt. Every read and delete is filtered
/// by the caller's `TenantScope` here, never by the caller.
#[derive(Clone)]
pub struct BackupCatalog {
    db: DbPool,
}

impl BackupCatalog {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        Ok(tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            f(&conn)
        })
        .await??)
    }

    pub async fn create(&self, record: NewBackupRecord) -> Result<i64> {
        let path = record.filepath.clone();
        let id = self.with_conn(move |conn| backup_record::create(conn, &record)).await?;
        match id {
            Some(id) => {
                tracing::info!(backup_id = id, path = %path, "Backup record created");
                Ok(id)
            }
            None => Err(BackupError::Validation(format!("backup path {path} is already catalogued"))),
        }
    }

    pub async fn get(&self, id: i64, scope: TenantScope) -> Result<Option<BackupRecord>> {
        self.with_conn(move |conn| backup_record::find_by_id(conn, id, scope)).await
    }

    pub async fn list(&self, filter: BackupFilter, scope: TenantScope, page: PageRequest) -> Result<BackupPage> {
        let (records, total) = self
            .with_conn(move |conn| {
                let records = backup_record::find_page(conn, &filter, scope, page)?;
                let total = backup_record::count(conn, &filter, scope)?;
                Ok((records, total))
            })
            .await?;
        Ok(BackupPage {
            records,
            total,
            page: page.page.max(1),
            per_page: page.per_page.clamp(1, backup_record::MAX_PER_PAGE),
        })
    }

    pub async fn count(&self, filter: BackupFilter, scope: TenantScope) -> Result<i64> {
        self.with_conn(move |conn| backup_record::count(conn, &filter, scope)).await
    }

    /// Concludes an `in_progress` record. A record can be concluded once.
    pub async fn update_status(&self, id: i64, outcome: BackupOutcome) -> Result<()> {
        let status = match &outcome {
            BackupOutcome::Success { .. } => "success",
            BackupOutcome::Failed { .. } => "failed",
        };
        let (changed, current) = self
            .with_conn(move |conn| {
                let changed = backup_record::conclude(conn, id, &outcome)?;
                let current = if changed {
                    None
                } else {
                    backup_record::find_by_id(conn, id, TenantScope::Instance)?
                };
                Ok((changed, current))
            })
            .await?;

        if changed {
            tracing::info!(backup_id = id, status, "Backup record concluded");
            return Ok(());
        }
        match current {
            Some(record) => Err(BackupError::State(format!(
                "backup {id} is already {} and cannot become {status}",
                record.status
            ))),
            None => Err(BackupError::NotFound(format!("backup {id} not found"))),
        }
    }

    pub async fn delete(&self, id: i64, scope: TenantScope) -> Result<bool> {
        self.with_conn(move |conn| backup_record::delete(conn, id, scope)).await
    }

    pub async fn last_successful(&self, scope: TenantScope) -> Result<Option<BackupRecord>> {
        self.with_conn(move |conn| backup_record::find_last_successful(conn, scope)).await
    }
}
