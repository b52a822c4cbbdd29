use super::{file_size, DumpArtifact, DumpLifecycle, DumpRequest, DumpScope, Dumper};
use crate::error::{BackupError, Result};
use crate::platform::{DatabaseAdmin, TenantDirectory};
use async_trait::async_trait;
use std::sync::Arc;

/// Whole-database snapshot of production through the dump utility.
///
/// A `tenant_id` on the request only tags the record and names the file;
/// the dump itself is never filtered.
pub struct FullDumper {
    lifecycle: DumpLifecycle,
    admin: Arc<dyn DatabaseAdmin>,
    directory: Arc<dyn TenantDirectory>,
    database: String,
}

impl FullDumper {
    pub fn new(
        lifecycle: DumpLifecycle,
        admin: Arc<dyn DatabaseAdmin>,
        directory: Arc<dyn TenantDirectory>,
        database: String,
    ) -> Self {
        Self { lifecycle, admin, directory, database }
    }

    async fn label_for(&self, tenant_id: Option<i64>) -> Result<String> {
        match tenant_id {
            None => Ok("all".into()),
            Some(id) => self
                .directory
                .tenant_slug(id)
                .await?
                .ok_or_else(|| BackupError::NotFound(format!("tenant {id} not found"))),
        }
    }
}

#[async_trait]
impl Dumper for FullDumper {
    fn scope(&self) -> DumpScope {
        DumpScope::Full
    }

    async fn run(&self, request: DumpRequest) -> Result<DumpArtifact> {
        let label = self.label_for(request.tenant_id).await?;
        tracing::info!(database = %self.database, tenant_id = ?request.tenant_id, "Starting full backup");

        let admin = self.admin.clone();
        let database = self.database.clone();
        self.lifecycle
            .execute(&request, &label, move |path| async move {
                let report = admin.dump_database(&database, &path).await?;
                if report.success {
                    return Ok(());
                }
                // A nonzero exit with output on disk is reported but kept.
                if file_size(&path).await == 0 {
                    return Err(BackupError::ExternalTool(report.describe()));
                }
                tracing::warn!(database = %database, detail = %report.describe(), "Dump finished with warnings");
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::backup_record::{BackupStatus, TenantScope};
    use crate::testing::{lifecycle_in, FakeServer, FakeTenants};
    use std::time::Duration;
    use tempfile::TempDir;

    fn request(tenant_id: Option<i64>) -> DumpRequest {
        DumpRequest { tenant_id, created_by: Some(1), automatic: false }
    }

    #[tokio::test]
    async fn test_full_backup_of_three_tables() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (lifecycle, catalog) = lifecycle_in(dir.path(), Duration::from_secs(5))?;
        let server = Arc::new(FakeServer::with_database("shop", &["orders", "products", "tenants"]));
        let dumper = FullDumper::new(lifecycle, server, Arc::new(FakeTenants::default()), "shop".into());

        let artifact = dumper.run(request(None)).await?;

        assert!(artifact.size_bytes > 0);
        assert!(artifact.filename.starts_with("backup_all_"));
        let contents = std::fs::read_to_string(&artifact.filepath)?;
        assert_eq!(contents.matches("CREATE TABLE").count(), 3);
        let record = catalog.get(artifact.backup_id, TenantScope::Instance).await?.expect("record");
        assert_eq!(record.status, BackupStatus::Success);
        assert_eq!(record.file_size, Some(artifact.size_bytes as i64));
        Ok(())
    }

    #[tokio::test]
    async fn test_tenant_tagged_full_backup_uses_slug() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (lifecycle, catalog) = lifecycle_in(dir.path(), Duration::from_secs(5))?;
        let server = Arc::new(FakeServer::with_database("shop", &["orders"]));
        let tenants = Arc::new(FakeTenants::default().with_tenant(7, "acme"));
        let dumper = FullDumper::new(lifecycle, server, tenants, "shop".into());

        let artifact = dumper.run(request(Some(7))).await?;

        assert!(artifact.filename.starts_with("backup_acme_"));
        let record = catalog.get(artifact.backup_id, TenantScope::Tenant(7)).await?;
        assert!(record.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_dump_without_output_is_recorded() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (lifecycle, catalog) = lifecycle_in(dir.path(), Duration::from_secs(5))?;
        let server = FakeServer::with_database("shop", &["orders"]);
        server.fail("dump", "shop");
        let dumper = FullDumper::new(lifecycle, Arc::new(server), Arc::new(FakeTenants::default()), "shop".into());

        let err = dumper.run(request(None)).await.expect_err("dump fails");
        assert_eq!(err.kind(), ErrorKind::ExternalTool);

        let page = catalog
            .list(Default::default(), TenantScope::Instance, Default::default())
            .await?;
        assert_eq!(page.records[0].status, BackupStatus::Failed);
        assert!(page.records[0].error_message.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_tenant_creates_no_record() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (lifecycle, catalog) = lifecycle_in(dir.path(), Duration::from_secs(5))?;
        let server = Arc::new(FakeServer::with_database("shop", &["orders"]));
        let dumper = FullDumper::new(lifecycle, server, Arc::new(FakeTenants::default()), "shop".into());

        let err = dumper.run(request(Some(404))).await.expect_err("no such tenant");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(catalog.count(Default::default(), TenantScope::Instance).await?, 0);
        Ok(())
    }
}
