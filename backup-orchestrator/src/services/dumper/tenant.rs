use super::script::{render_tenant_script, TableSnapshot};
use super::{DumpArtifact, DumpLifecycle, DumpRequest, DumpScope, Dumper};
use crate::error::{BackupError, Result};
use crate::platform::{TenantDirectory, TenantSource};
use async_trait::async_trait;
use std::sync::Arc;

/// Row-filtered snapshot of one tenant's data across the allow-listed tables.
pub struct TenantDumper {
    lifecycle: DumpLifecycle,
    source: Arc<dyn TenantSource>,
    directory: Arc<dyn TenantDirectory>,
    tables: Vec<String>,
}

impl TenantDumper {
    pub fn new(
        lifecycle: DumpLifecycle,
        source: Arc<dyn TenantSource>,
        directory: Arc<dyn TenantDirectory>,
        tables: Vec<String>,
    ) -> Self {
        Self { lifecycle, source, directory, tables }
    }
}

#[async_trait]
impl Dumper for TenantDumper {
    fn scope(&self) -> DumpScope {
        DumpScope::Tenant
    }

    async fn run(&self, request: DumpRequest) -> Result<DumpArtifact> {
        let tenant_id = request
            .tenant_id
            .ok_or_else(|| BackupError::Validation("a tenant backup requires a tenant id".into()))?;
        let slug = self
            .directory
            .tenant_slug(tenant_id)
            .await?
            .ok_or_else(|| BackupError::NotFound(format!("tenant {tenant_id} not found")))?;
        tracing::info!(tenant_id, slug = %slug, tables = self.tables.len(), "Starting tenant backup");

        let source = self.source.clone();
        let tables = self.tables.clone();
        self.lifecycle
            .execute(&request, &slug, move |path| async move {
                let mut snapshots = Vec::with_capacity(tables.len());
                for table in tables {
                    let create_statement = source.create_statement(&table).await?;
                    let rows = source.tenant_rows(&table, tenant_id).await?;
                    tracing::debug!(tenant_id, table = %table, rows = rows.len(), "Table captured");
                    snapshots.push(TableSnapshot { name: table, create_statement, rows });
                }
                let tenant = source.tenant_record(tenant_id).await?;
                let script = render_tenant_script(
                    tenant_id,
                    chrono::Local::now().naive_local(),
                    &snapshots,
                    tenant.as_ref(),
                );
                tokio::fs::write(&path, script).await?;
                Ok(())
            })
            .await
    }
}
