use crate::config::AppConfig;
use crate::db::connection::DbPool;
use crate::platform::mysql_admin::MySqlAdmin;
use crate::platform::mysql_platform::MySqlPlatform;
use crate::platform::{CredentialVerifier, DatabaseAdmin, NotificationSink, TenantDirectory, TenantSource};
use crate::services::backup_scheduler::BackupScheduler;
use crate::services::backups::BackupService;
use crate::services::catalog::BackupCatalog;
use crate::services::dumper::{DumpLifecycle, Dumper, FullDumper, ProductionGate, TenantDumper};
use crate::services::restore::RestoreOrchestrator;
use crate::services::retention::RetentionReaper;
use std::sync::Arc;

/// Every component, built once from the configuration and shared by the
/// daemon's tasks.
pub struct AppState {
    pub config: AppConfig,
    pub catalog: BackupCatalog,
    pub backups: BackupService,
    pub restore: RestoreOrchestrator,
    full_dumper: Arc<dyn Dumper>,
    directory: Arc<dyn TenantDirectory>,
    notifications: Arc<dyn NotificationSink>,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        let admin = Arc::new(MySqlAdmin::new(config.database.clone(), config.tool_timeout));
        let platform = Arc::new(MySqlPlatform::new(&config.database, config.tenant_layout.clone()));
        Self::assemble(db, config, admin, platform)
    }

    pub fn assemble<P>(db: DbPool, config: AppConfig, admin: Arc<dyn DatabaseAdmin>, platform: Arc<P>) -> Self
    where
        P: TenantSource + TenantDirectory + NotificationSink + CredentialVerifier + 'static,
    {
        let catalog = BackupCatalog::new(db);
        let gate = ProductionGate::default();
        let reaper = RetentionReaper::new(config.backups_dir.clone(), config.retention);
        let lifecycle = DumpLifecycle::new(
            catalog.clone(),
            reaper,
            config.backups_dir.clone(),
            gate.clone(),
            config.dump_timeout,
        );

        let full_dumper: Arc<dyn Dumper> = Arc::new(FullDumper::new(
            lifecycle.clone(),
            admin.clone(),
            platform.clone(),
            config.database.production.clone(),
        ));
        let tenant_dumper: Arc<dyn Dumper> = Arc::new(TenantDumper::new(
            lifecycle,
            platform.clone(),
            platform.clone(),
            config.tenant_layout.tables.clone(),
        ));

        let backups = BackupService::new(
            catalog.clone(),
            vec![full_dumper.clone(), tenant_dumper],
            platform.clone(),
        );
        let restore = RestoreOrchestrator::new(
            catalog.clone(),
            admin,
            platform.clone(),
            config.database.clone(),
            config.backups_dir.clone(),
            config.promotion_strategy,
            gate,
        )
        .with_timeout(config.restore_timeout);

        Self {
            config,
            catalog,
            backups,
            restore,
            full_dumper,
            directory: platform.clone(),
            notifications: platform,
        }
    }

    /// Scheduler for the daily unattended full backup, not yet started.
    pub async fn scheduler(&self) -> anyhow::Result<BackupScheduler> {
        let scheduler = BackupScheduler::new(
            self.full_dumper.clone(),
            self.directory.clone(),
            self.notifications.clone(),
        )
        .await?;
        scheduler
            .schedule_daily(self.config.schedule_hour, self.config.schedule_minute)
            .await?;
        Ok(scheduler)
    }
}
