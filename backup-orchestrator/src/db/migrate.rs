use crate::db::connection::DbPool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS backups (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  tenant_id INTEGER,
  filename TEXT NOT NULL,
  filepath TEXT NOT NULL UNIQUE,
  file_size INTEGER,
  backup_type TEXT NOT NULL DEFAULT 'manual' CHECK(backup_type IN ('manual','automatic')),
  status TEXT NOT NULL DEFAULT 'in_progress' CHECK(status IN ('in_progress','success','failed')),
  error_message TEXT,
  created_by INTEGER,
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  CHECK((status = 'success') = (file_size IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_backups_tenant_id ON backups(tenant_id);
CREATE INDEX IF NOT EXISTS idx_backups_created_at ON backups(created_at DESC);
"#;

pub fn migrate(pool: &DbPool) -> anyhow::Result<()> {
    tracing::info!("[Catalog] Starting catalog migration...");

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    tracing::info!("[Catalog] Migration completed successfully");
    Ok(())
}
