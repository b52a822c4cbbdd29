//! In-memory collaborators and fixtures shared by unit tests.

use crate::config::DatabaseConfig;
use crate::db::connection::create_pool;
use crate::db::migrate::migrate;
use crate::error::{BackupError, Result};
use crate::models::backup_record::{BackupOutcome, BackupType, NewBackupRecord};
use crate::models::notification::{Administrator, Notification};
use crate::platform::{
    password_matches, CredentialVerifier, DatabaseAdmin, NotificationSink, TenantDirectory, TenantSource,
};
use crate::services::catalog::BackupCatalog;
use crate::services::dumper::script::{SqlRow, SqlValue, TenantRecord};
use crate::services::dumper::{DumpLifecycle, ProductionGate};
use crate::services::retention::RetentionReaper;
use crate::services::tool::ToolReport;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn catalog_in(dir: &Path) -> anyhow::Result<BackupCatalog> {
    let pool = create_pool(&dir.join("catalog.db"))?;
    migrate(&pool)?;
    Ok(BackupCatalog::new(pool))
}

/// A dump lifecycle writing into `<dir>/backups` with a 30 day window.
pub fn lifecycle_in(dir: &Path, timeout: Duration) -> anyhow::Result<(DumpLifecycle, BackupCatalog)> {
    let catalog = catalog_in(dir)?;
    let backups_dir = dir.join("backups");
    let reaper = RetentionReaper::new(backups_dir.clone(), Duration::from_secs(30 * 24 * 60 * 60));
    let lifecycle = DumpLifecycle::new(catalog.clone(), reaper, backups_dir, ProductionGate::default(), timeout);
    Ok((lifecycle, catalog))
}

pub fn database_config() -> DatabaseConfig {
    DatabaseConfig {
        host: "127.0.0.1".into(),
        port: 3306,
        username: "root".into(),
        password: String::new(),
        production: "shop".into(),
        staging: "shop_staging".into(),
        charset: "utf8mb4".into(),
        collation: "utf8mb4_unicode_ci".into(),
        mysqldump_path: PathBuf::from("mysqldump"),
        mysql_path: PathBuf::from("mysql"),
    }
}

pub fn product_row(id: i64, tenant_id: i64, name: &str) -> SqlRow {
    SqlRow(vec![
        ("id".into(), SqlValue::Int(id)),
        ("tenant_id".into(), SqlValue::Int(tenant_id)),
        ("name".into(), SqlValue::Text(name.into())),
    ])
}

fn script_for(tables: &[String]) -> String {
    let mut out = String::from("-- fake dump\n");
    for table in tables {
        out.push_str(&format!("CREATE TABLE `{table}` (`id` int);\n"));
    }
    out
}

fn tables_in(script: &str) -> Vec<String> {
    script
        .lines()
        .filter_map(|l| l.strip_prefix("CREATE TABLE `"))
        .filter_map(|rest| rest.split('`').next())
        .map(String::from)
        .collect()
}

static FIXTURE_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Writes a dump containing `tables` and catalogues it as a successful backup.
pub async fn catalogued_backup(
    catalog: &BackupCatalog,
    dir: &Path,
    tenant_id: Option<i64>,
    tables: &[&str],
) -> anyhow::Result<i64> {
    let backups = dir.join("backups");
    std::fs::create_dir_all(&backups)?;
    let filename = format!("backup_fixture_{}.sql", FIXTURE_SEQ.fetch_add(1, Ordering::SeqCst));
    let path = backups.join(&filename);
    let tables: Vec<String> = tables.iter().map(|t| t.to_string()).collect();
    let script = script_for(&tables);
    std::fs::write(&path, &script)?;

    let id = catalog
        .create(NewBackupRecord {
            tenant_id,
            filename,
            filepath: path.to_string_lossy().to_string(),
            backup_type: BackupType::Manual,
            created_by: Some(1),
        })
        .await?;
    catalog
        .update_status(id, BackupOutcome::Success { size_bytes: script.len() as u64 })
        .await?;
    Ok(id)
}

/// A MySQL server reduced to database names and their table names.
///
/// `fail(op, db)` makes the next and all later `op` calls on `db` fail,
/// where `op` is one of `dump`, `load`, `drop`, `create`, `swap`.
/// `hang(op, db)` makes them never return instead.
#[derive(Default)]
pub struct FakeServer {
    databases: Mutex<HashMap<String, BTreeSet<String>>>,
    failures: Mutex<HashSet<String>>,
    hangs: Mutex<HashSet<String>>,
    operations: Mutex<Vec<String>>,
}

impl FakeServer {
    pub fn with_database(name: &str, tables: &[&str]) -> Self {
        let server = Self::default();
        server
            .databases
            .lock()
            .expect("lock")
            .insert(name.into(), tables.iter().map(|t| t.to_string()).collect());
        server
    }

    pub fn fail(&self, op: &str, database: &str) {
        self.failures.lock().expect("lock").insert(format!("{op}:{database}"));
    }

    pub fn hang(&self, op: &str, database: &str) {
        self.hangs.lock().expect("lock").insert(format!("{op}:{database}"));
    }

    /// Sorted table names, or `None` when the database does not exist.
    pub fn tables(&self, database: &str) -> Option<Vec<String>> {
        self.databases
            .lock()
            .expect("lock")
            .get(database)
            .map(|t| t.iter().cloned().collect())
    }

    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().expect("lock").clone()
    }

    async fn record(&self, op: &str, database: &str) -> bool {
        let key = format!("{op}:{database}");
        self.operations.lock().expect("lock").push(key.clone());
        let hung = self.hangs.lock().expect("lock").contains(&key);
        if hung {
            std::future::pending::<()>().await;
        }
        self.failures.lock().expect("lock").contains(&key)
    }

    async fn check(&self, op: &str, database: &str) -> Result<()> {
        if self.record(op, database).await {
            Err(BackupError::ExternalTool(format!("injected {op} failure on {database}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DatabaseAdmin for FakeServer {
    async fn dump_database(&self, database: &str, dest: &Path) -> Result<ToolReport> {
        let failing = self.record("dump", database).await;
        let tables = self.tables(database);
        match tables {
            Some(tables) if !failing => {
                std::fs::write(dest, script_for(&tables))?;
                Ok(ToolReport { success: true, status: "exit status: 0".into(), stderr: String::new() })
            }
            _ => Ok(ToolReport {
                success: false,
                status: "exit status: 2".into(),
                stderr: format!("mysqldump: Got error: 1049: Unknown database '{database}'"),
            }),
        }
    }

    async fn load_script(&self, database: &str, script: &Path) -> Result<()> {
        self.check("load", database).await?;
        let text = std::fs::read_to_string(script)
            .map_err(|e| BackupError::NotFound(format!("cannot open {}: {e}", script.display())))?;
        let mut databases = self.databases.lock().expect("lock");
        let target = databases
            .get_mut(database)
            .ok_or_else(|| BackupError::ExternalTool(format!("Unknown database '{database}'")))?;
        target.extend(tables_in(&text));
        Ok(())
    }

    async fn drop_database(&self, database: &str) -> Result<()> {
        self.check("drop", database).await?;
        self.databases.lock().expect("lock").remove(database);
        Ok(())
    }

    async fn create_database(&self, database: &str) -> Result<()> {
        self.check("create", database).await?;
        let mut databases = self.databases.lock().expect("lock");
        if databases.contains_key(database) {
            return Err(BackupError::ExternalTool(format!("database '{database}' exists")));
        }
        databases.insert(database.into(), BTreeSet::new());
        Ok(())
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        Ok(self.tables(database).unwrap_or_default())
    }

    async fn swap_tables(&self, production: &str, shadow: &str, retired: &str) -> Result<()> {
        self.check("swap", production).await?;
        let mut databases = self.databases.lock().expect("lock");
        let incoming = databases.insert(shadow.into(), BTreeSet::new()).unwrap_or_default();
        if incoming.is_empty() {
            return Err(BackupError::Integrity(format!("{shadow} has no tables to swap in")));
        }
        let current = databases.insert(production.into(), incoming).unwrap_or_default();
        databases.insert(retired.into(), current);
        Ok(())
    }
}

/// Tenants, their rows, administrators, passwords and sent notifications.
#[derive(Default)]
pub struct FakeTenants {
    slugs: HashMap<i64, String>,
    rows: HashMap<String, Vec<SqlRow>>,
    admins: Vec<Administrator>,
    hashes: HashMap<i64, String>,
    sent: Mutex<Vec<Notification>>,
}

impl FakeTenants {
    pub fn with_tenant(mut self, id: i64, slug: &str) -> Self {
        self.slugs.insert(id, slug.into());
        self
    }

    pub fn with_row(mut self, table: &str, row: SqlRow) -> Self {
        self.rows.entry(table.into()).or_default().push(row);
        self
    }

    pub fn with_admin(mut self, user_id: i64, tenant_id: i64) -> Self {
        self.admins.push(Administrator { user_id, tenant_id });
        self
    }

    pub fn with_password(mut self, user_id: i64, password: &str) -> anyhow::Result<Self> {
        self.hashes.insert(user_id, bcrypt::hash(password, 4)?);
        Ok(self)
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().expect("lock").clone()
    }
}

#[async_trait]
impl TenantSource for FakeTenants {
    async fn create_statement(&self, table: &str) -> Result<String> {
        Ok(format!(
            "CREATE TABLE `{table}` (`id` int, `tenant_id` int, `name` varchar(64))"
        ))
    }

    async fn tenant_rows(&self, table: &str, tenant_id: i64) -> Result<Vec<SqlRow>> {
        Ok(self
            .rows
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.get("tenant_id") == Some(&SqlValue::Int(tenant_id)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn tenant_record(&self, tenant_id: i64) -> Result<Option<TenantRecord>> {
        Ok(self.slugs.get(&tenant_id).map(|slug| TenantRecord {
            table: "tenants".into(),
            create_statement: "CREATE TABLE `tenants` (`id` int, `slug` varchar(64))".into(),
            row: SqlRow(vec![
                ("id".into(), SqlValue::Int(tenant_id)),
                ("slug".into(), SqlValue::Text(slug.clone())),
            ]),
        }))
    }
}

#[async_trait]
impl TenantDirectory for FakeTenants {
    async fn tenant_slug(&self, tenant_id: i64) -> Result<Option<String>> {
        Ok(self.slugs.get(&tenant_id).cloned())
    }

    async fn administrators(&self) -> Result<Vec<Administrator>> {
        Ok(self.admins.clone())
    }
}

#[async_trait]
impl NotificationSink for FakeTenants {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().expect("lock").push(notification.clone());
        Ok(())
    }
}

#[async_trait]
impl CredentialVerifier for FakeTenants {
    async fn verify(&self, user_id: i64, password: &str) -> Result<bool> {
        Ok(self.hashes.get(&user_id).is_some_and(|h| password_matches(password, h)))
    }
}
