use crate::error::{BackupError, Result};
use crate::models::backup_record::{BackupFilter, BackupRecord, BackupStatus, PageRequest, TenantScope};
use crate::platform::CredentialVerifier;
use crate::services::catalog::{BackupCatalog, BackupPage};
use crate::services::dumper::{DumpArtifact, DumpRequest, DumpScope, Dumper};
use crate::services::restore::AdminCredential;
use std::path::PathBuf;
use std::sync::Arc;

/// Backup operations as seen by the HTTP layer.
pub struct BackupService {
    catalog: BackupCatalog,
    dumpers: Vec<Arc<dyn Dumper>>,
    credentials: Arc<dyn CredentialVerifier>,
}

impl BackupService {
    pub fn new(
        catalog: BackupCatalog,
        dumpers: Vec<Arc<dyn Dumper>>,
        credentials: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self { catalog, dumpers, credentials }
    }

    /// Manual backup on behalf of `created_by`, run by the dumper serving `kind`.
    pub async fn create_backup(
        &self,
        kind: DumpScope,
        tenant_id: Option<i64>,
        created_by: Option<i64>,
    ) -> Result<DumpArtifact> {
        let dumper = self
            .dumpers
            .iter()
            .find(|d| d.scope() == kind)
            .ok_or_else(|| BackupError::Validation(format!("no dumper configured for {kind:?} backups")))?;
        dumper
            .run(DumpRequest { tenant_id, created_by, automatic: false })
            .await
    }

    pub async fn list(&self, filter: BackupFilter, scope: TenantScope, page: PageRequest) -> Result<BackupPage> {
        self.catalog.list(filter, scope, page).await
    }

    pub async fn get(&self, id: i64, scope: TenantScope) -> Result<BackupRecord> {
        if id <= 0 {
            return Err(BackupError::Validation(format!("invalid backup id {id}")));
        }
        self.catalog
            .get(id, scope)
            .await?
            .ok_or_else(|| BackupError::NotFound(format!("backup {id} not found")))
    }

    pub async fn last_successful(&self, scope: TenantScope) -> Result<Option<BackupRecord>> {
        self.catalog.last_successful(scope).await
    }

    /// Path of the file to stream back to the caller.
    pub async fn download(&self, id: i64, scope: TenantScope) -> Result<PathBuf> {
        let record = self.get(id, scope).await?;
        if record.status != BackupStatus::Success {
            return Err(BackupError::Validation(format!("backup {id} is {} and has no file", record.status)));
        }
        let path = PathBuf::from(&record.filepath);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(BackupError::NotFound(format!("file of backup {id} no longer exists")));
        }
        Ok(path)
    }

    /// Removes a backup's file and then its record. Only failed backups may
    /// be deleted without re-entering a password.
    pub async fn delete(&self, id: i64, scope: TenantScope, credential: Option<&AdminCredential>) -> Result<()> {
        let record = self.get(id, scope).await?;
        match record.status {
            BackupStatus::InProgress => {
                return Err(BackupError::State(format!("backup {id} is still in progress")));
            }
            BackupStatus::Failed => {}
            BackupStatus::Success => {
                let credential =
                    credential.ok_or_else(|| BackupError::Credential("password required to delete a backup".into()))?;
                if !self.credentials.verify(credential.user_id, &credential.password).await? {
                    tracing::warn!(backup_id = id, user_id = credential.user_id, "Backup deletion rejected: wrong password");
                    return Err(BackupError::Credential("password verification failed".into()));
                }
            }
        }

        match tokio::fs::remove_file(&record.filepath).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if !self.catalog.delete(id, scope).await? {
            return Err(BackupError::NotFound(format!("backup {id} not found")));
        }
        tracing::info!(backup_id = id, path = %record.filepath, "Backup deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::backup_record::BackupOutcome;
    use crate::services::dumper::{FullDumper, TenantDumper};
    use crate::testing::{lifecycle_in, product_row, FakeServer, FakeTenants};
    use std::time::Duration;
    use tempfile::TempDir;

    const PASSWORD: &str = "hunter22";

    struct Fixture {
        _dir: TempDir,
        catalog: BackupCatalog,
        server: Arc<FakeServer>,
        service: BackupService,
    }

    fn fixture() -> anyhow::Result<Fixture> {
        let dir = TempDir::new()?;
        let (lifecycle, catalog) = lifecycle_in(dir.path(), Duration::from_secs(5))?;
        let server = Arc::new(FakeServer::with_database("shop", &["orders", "products", "users"]));
        let tenants = Arc::new(
            FakeTenants::default()
                .with_tenant(7, "acme")
                .with_row("products", product_row(1, 7, "Mug"))
                .with_row("products", product_row(2, 7, "Cap"))
                .with_row("products", product_row(3, 9, "Kite"))
                .with_password(1, PASSWORD)?,
        );
        let full: Arc<dyn Dumper> =
            Arc::new(FullDumper::new(lifecycle.clone(), server.clone(), tenants.clone(), "shop".into()));
        let tenant: Arc<dyn Dumper> = Arc::new(TenantDumper::new(
            lifecycle,
            tenants.clone(),
            tenants.clone(),
            vec!["products".into()],
        ));
        let service = BackupService::new(catalog.clone(), vec![tenant, full], tenants);
        Ok(Fixture { _dir: dir, catalog, server, service })
    }

    fn credential(password: &str) -> AdminCredential {
        AdminCredential::new(1, password)
    }

    #[tokio::test]
    async fn test_backup_lifecycle_end_to_end() -> anyhow::Result<()> {
        let f = fixture()?;

        let full = f.service.create_backup(DumpScope::Full, None, Some(1)).await?;
        assert!(full.size_bytes > 0);
        let record = f.service.get(full.backup_id, TenantScope::Instance).await?;
        assert_eq!(record.status, BackupStatus::Success);

        let tenant = f.service.create_backup(DumpScope::Tenant, Some(7), Some(1)).await?;
        let script = std::fs::read_to_string(&tenant.filepath)?;
        assert_eq!(script.lines().filter(|l| l.starts_with("INSERT INTO `products`")).count(), 2);

        let err = f
            .service
            .delete(full.backup_id, TenantScope::Instance, Some(&credential("nope")))
            .await
            .expect_err("wrong password");
        assert_eq!(err.kind(), ErrorKind::Credential);
        assert!(full.filepath.exists());

        f.server.fail("dump", "shop");
        let err = f
            .service
            .create_backup(DumpScope::Full, None, Some(1))
            .await
            .expect_err("dump fails");
        assert_eq!(err.kind(), ErrorKind::ExternalTool);
        let failed = f
            .service
            .list(
                BackupFilter { status: Some(BackupStatus::Failed), ..Default::default() },
                TenantScope::Instance,
                PageRequest::default(),
            )
            .await?;
        assert_eq!(failed.total, 1);

        f.service.delete(failed.records[0].id, TenantScope::Instance, None).await?;
        assert_eq!(f.catalog.count(BackupFilter::default(), TenantScope::Instance).await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_unserved_scope_is_validation_error() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (lifecycle, catalog) = lifecycle_in(dir.path(), Duration::from_secs(5))?;
        let server = Arc::new(FakeServer::with_database("shop", &["orders"]));
        let tenants = Arc::new(FakeTenants::default().with_tenant(7, "acme"));
        let full: Arc<dyn Dumper> = Arc::new(FullDumper::new(lifecycle, server, tenants.clone(), "shop".into()));
        let service = BackupService::new(catalog.clone(), vec![full], tenants);

        let err = service
            .create_backup(DumpScope::Tenant, Some(7), Some(1))
            .await
            .expect_err("no tenant dumper");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(catalog.count(BackupFilter::default(), TenantScope::Instance).await?, 0);

        let artifact = service.create_backup(DumpScope::Full, None, Some(1)).await?;
        assert!(artifact.size_bytes > 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_with_password_removes_file_and_row() -> anyhow::Result<()> {
        let f = fixture()?;
        let artifact = f.service.create_backup(DumpScope::Full, None, Some(1)).await?;

        let err = f
            .service
            .delete(artifact.backup_id, TenantScope::Instance, None)
            .await
            .expect_err("password required");
        assert_eq!(err.kind(), ErrorKind::Credential);

        f.service
            .delete(artifact.backup_id, TenantScope::Instance, Some(&credential(PASSWORD)))
            .await?;
        assert!(!artifact.filepath.exists());
        assert!(f.catalog.get(artifact.backup_id, TenantScope::Instance).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_tenant_cannot_reach_other_tenants_backup() -> anyhow::Result<()> {
        let f = fixture()?;
        let artifact = f.service.create_backup(DumpScope::Tenant, Some(7), Some(1)).await?;

        let err = f.service.get(artifact.backup_id, TenantScope::Tenant(9)).await.expect_err("hidden");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = f
            .service
            .delete(artifact.backup_id, TenantScope::Tenant(9), Some(&credential(PASSWORD)))
            .await
            .expect_err("hidden");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(artifact.filepath.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_download_of_reaped_file_is_not_found() -> anyhow::Result<()> {
        let f = fixture()?;
        let artifact = f.service.create_backup(DumpScope::Full, None, Some(1)).await?;
        assert_eq!(f.service.download(artifact.backup_id, TenantScope::Instance).await?, artifact.filepath);

        std::fs::remove_file(&artifact.filepath)?;
        let err = f
            .service
            .download(artifact.backup_id, TenantScope::Instance)
            .await
            .expect_err("file gone");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_in_progress_backup_cannot_be_deleted() -> anyhow::Result<()> {
        let f = fixture()?;
        let id = f
            .catalog
            .create(crate::models::backup_record::NewBackupRecord {
                tenant_id: None,
                filename: "backup_all_running.sql".into(),
                filepath: "/nonexistent/backup_all_running.sql".into(),
                backup_type: crate::models::backup_record::BackupType::Manual,
                created_by: Some(1),
            })
            .await?;

        let err = f
            .service
            .delete(id, TenantScope::Instance, Some(&credential(PASSWORD)))
            .await
            .expect_err("still running");
        assert_eq!(err.kind(), ErrorKind::State);

        f.catalog.update_status(id, BackupOutcome::Failed { message: "killed".into() }).await?;
        f.service.delete(id, TenantScope::Instance, None).await?;
        Ok(())
    }
}
