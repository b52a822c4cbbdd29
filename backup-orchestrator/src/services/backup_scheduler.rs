use crate::models::notification::Notification;
use crate::platform::{NotificationSink, TenantDirectory};
use crate::services::dumper::{DumpArtifact, DumpRequest, Dumper};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::task::TaskTracker;

/// Six-field cron expression firing once a day at `hour:minute`.
pub fn daily_cron(hour: u32, minute: u32) -> String {
    format!("0 {minute} {hour} * * *")
}

#[derive(Debug)]
pub enum ScheduledRun {
    Completed(DumpArtifact),
    Failed { notified: usize },
}

/// One unattended full backup. A failure is not retried; every administrator
/// of every tenant gets a notification instead.
pub async fn run_scheduled_backup(
    dumper: &dyn Dumper,
    directory: &dyn TenantDirectory,
    notifications: &dyn NotificationSink,
) -> ScheduledRun {
    let request = DumpRequest { tenant_id: None, created_by: None, automatic: true };
    let cause = match dumper.run(request).await {
        Ok(artifact) => {
            tracing::info!(backup_id = artifact.backup_id, size_bytes = artifact.size_bytes, "Scheduled backup completed");
            return ScheduledRun::Completed(artifact);
        }
        Err(e) => e.to_string(),
    };
    tracing::error!(error = %cause, "Scheduled backup failed");

    let admins = match directory.administrators().await {
        Ok(admins) => admins,
        Err(e) => {
            tracing::error!(error = %e, "Could not list administrators to notify");
            return ScheduledRun::Failed { notified: 0 };
        }
    };

    let mut notified = 0;
    for admin in &admins {
        match notifications.notify(&Notification::backup_failed(admin, &cause)).await {
            Ok(()) => notified += 1,
            Err(e) => tracing::warn!(user_id = admin.user_id, tenant_id = admin.tenant_id, error = %e, "Notification not stored"),
        }
    }
    tracing::info!(notified, administrators = admins.len(), "Backup failure notifications sent");
    ScheduledRun::Failed { notified }
}

/// Starts one scheduled run on `tracker`, so shutdown can wait for it.
fn spawn_scheduled_run(
    tracker: &TaskTracker,
    dumper: Arc<dyn Dumper>,
    directory: Arc<dyn TenantDirectory>,
    notifications: Arc<dyn NotificationSink>,
) {
    tracker.spawn(async move {
        run_scheduled_backup(&*dumper, &*directory, &*notifications).await;
    });
}

pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    tracker: TaskTracker,
    dumper: Arc<dyn Dumper>,
    directory: Arc<dyn TenantDirectory>,
    notifications: Arc<dyn NotificationSink>,
}

impl BackupScheduler {
    pub async fn new(
        dumper: Arc<dyn Dumper>,
        directory: Arc<dyn TenantDirectory>,
        notifications: Arc<dyn NotificationSink>,
    ) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            tracker: TaskTracker::new(),
            dumper,
            directory,
            notifications,
        })
    }

    /// Registers the daily backup at `hour:minute` local time.
    pub async fn schedule_daily(&self, hour: u32, minute: u32) -> anyhow::Result<()> {
        let cron = daily_cron(hour, minute);
        let tracker = self.tracker.clone();
        let dumper = self.dumper.clone();
        let directory = self.directory.clone();
        let notifications = self.notifications.clone();

        let job = Job::new_async_tz(cron.as_str(), chrono::Local, move |_uuid, _lock| {
            spawn_scheduled_run(&tracker, dumper.clone(), directory.clone(), notifications.clone());
            Box::pin(async {})
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(cron = %cron, "Daily backup scheduled");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    /// Stops firing new runs and waits for in-flight ones to finish on their own.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        self.tracker.close();
        if !self.tracker.is_empty() {
            tracing::info!(running = self.tracker.len(), "Waiting for scheduled backup to finish");
        }
        self.tracker.wait().await;
        Ok(())
    }
}
