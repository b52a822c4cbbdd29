use crate::config::DatabaseConfig;
use crate::error::{BackupError, Result};
use crate::platform::DatabaseAdmin;
use crate::services::dumper::script::quote_ident;
use crate::services::tool::{run_tool, ToolReport};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection};
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// `DatabaseAdmin` backed by the MySQL client utilities plus one short-lived
/// connection per administrative statement. Connecting and every statement
/// are bounded by `tool_timeout`.
pub struct MySqlAdmin {
    config: DatabaseConfig,
    tool_timeout: Duration,
}

/// Charset and collation names are interpolated into DDL, so only plain
/// words are accepted.
fn plain_word(value: &str) -> Result<&str> {
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(value)
    } else {
        Err(BackupError::Validation(format!("invalid charset or collation '{value}'")))
    }
}

/// Shadow-swap renames base tables only. Triggers cannot follow a table into
/// another schema, and views or routines would stay behind in the old one.
fn refuse_unmovable(objects: &[String]) -> Result<()> {
    if objects.is_empty() {
        return Ok(());
    }
    Err(BackupError::Validation(format!(
        "shadow-swap cannot move {}; use the drop-recreate promotion strategy",
        objects.join(", ")
    )))
}

async fn close_quietly(conn: MySqlConnection) {
    if let Err(e) = conn.close().await {
        tracing::debug!(error = %e, "Admin connection did not close cleanly");
    }
}

impl MySqlAdmin {
    pub fn new(config: DatabaseConfig, tool_timeout: Duration) -> Self {
        Self { config, tool_timeout }
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.username)
            .password(&self.config.password)
            .charset(&self.config.charset)
    }

    async fn bounded<T>(
        &self,
        what: &str,
        work: impl Future<Output = std::result::Result<T, sqlx::Error>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.tool_timeout, work).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BackupError::ExternalTool(format!(
                "{what} timed out after {}s",
                self.tool_timeout.as_secs()
            ))),
        }
    }

    async fn connect(&self) -> Result<MySqlConnection> {
        let mut conn = self.bounded("connecting to MySQL", self.connect_options().connect()).await?;
        // Metadata locks held by other sessions must not block DDL forever.
        let lock_wait = format!("SET SESSION lock_wait_timeout = {}", self.tool_timeout.as_secs().max(1));
        if let Err(e) = self.bounded("session setup", sqlx::query(&lock_wait).execute(&mut conn)).await {
            close_quietly(conn).await;
            return Err(e);
        }
        Ok(conn)
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        let mut conn = self.connect().await?;
        let result = self.bounded("admin statement", sqlx::query(sql).execute(&mut conn)).await;
        close_quietly(conn).await;
        result?;
        Ok(())
    }

    /// Triggers, views and routines living in any of `schemas`, as `kind schema.name`.
    async fn schema_objects(&self, schemas: [&str; 2]) -> Result<Vec<String>> {
        let sql = "SELECT CAST(CONCAT(kind, ' ', owner, '.', name) AS CHAR) FROM (
                SELECT 'trigger' AS kind, TRIGGER_SCHEMA AS owner, TRIGGER_NAME AS name
                FROM information_schema.TRIGGERS WHERE TRIGGER_SCHEMA IN (?, ?)
                UNION ALL
                SELECT 'view', TABLE_SCHEMA, TABLE_NAME
                FROM information_schema.VIEWS WHERE TABLE_SCHEMA IN (?, ?)
                UNION ALL
                SELECT LOWER(ROUTINE_TYPE), ROUTINE_SCHEMA, ROUTINE_NAME
                FROM information_schema.ROUTINES WHERE ROUTINE_SCHEMA IN (?, ?)
            ) objects ORDER BY 1";
        let mut conn = self.connect().await?;
        let mut query = sqlx::query_scalar::<_, String>(sql);
        for _ in 0..3 {
            query = query.bind(schemas[0]).bind(schemas[1]);
        }
        let objects = self.bounded("schema object lookup", query.fetch_all(&mut conn)).await;
        close_quietly(conn).await;
        objects
    }

    async fn tables_of(&self, database: &str, base_only: bool) -> Result<Vec<String>> {
        let sql = if base_only {
            "SELECT CAST(TABLE_NAME AS CHAR) FROM information_schema.TABLES
             WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME"
        } else {
            "SELECT CAST(TABLE_NAME AS CHAR) FROM information_schema.TABLES
             WHERE TABLE_SCHEMA = ? ORDER BY TABLE_NAME"
        };
        let mut conn = self.connect().await?;
        let query = sqlx::query_scalar::<_, String>(sql).bind(database);
        let tables = self.bounded("table listing", query.fetch_all(&mut conn)).await;
        close_quietly(conn).await;
        tables
    }

    fn client_command(&self, program: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg(format!("--host={}", self.config.host))
            .arg(format!("--port={}", self.config.port))
            .arg(format!("--user={}", self.config.username))
            .arg(format!("--default-character-set={}", self.config.charset))
            .env("MYSQL_PWD", &self.config.password);
        cmd
    }
}

#[async_trait]
impl DatabaseAdmin for MySqlAdmin {
    async fn dump_database(&self, database: &str, dest: &Path) -> Result<ToolReport> {
        let mut cmd = self.client_command(&self.config.mysqldump_path);
        cmd.arg("--single-transaction")
            .arg("--quick")
            .arg("--routines")
            .arg("--triggers")
            .arg(format!("--result-file={}", dest.display()))
            .arg(database);

        tracing::debug!(database, dest = %dest.display(), "Running mysqldump");
        run_tool(cmd, "mysqldump", self.tool_timeout).await
    }

    async fn load_script(&self, database: &str, script: &Path) -> Result<()> {
        let input = tokio::fs::File::open(script)
            .await
            .map_err(|e| BackupError::NotFound(format!("cannot open {}: {e}", script.display())))?
            .into_std()
            .await;

        let mut cmd = self.client_command(&self.config.mysql_path);
        cmd.arg(database).stdin(Stdio::from(input));

        tracing::debug!(database, script = %script.display(), "Loading script with mysql");
        let report = run_tool(cmd, "mysql", self.tool_timeout).await?;
        if report.success {
            Ok(())
        } else {
            Err(BackupError::ExternalTool(format!(
                "mysql could not load {} into {database}: {}",
                script.display(),
                report.describe()
            )))
        }
    }

    async fn drop_database(&self, database: &str) -> Result<()> {
        tracing::info!(database, "Dropping database");
        self.execute(&format!("DROP DATABASE IF EXISTS {}", quote_ident(database)))
            .await
    }

    async fn create_database(&self, database: &str) -> Result<()> {
        tracing::info!(database, "Creating database");
        let sql = format!(
            "CREATE DATABASE {} CHARACTER SET {} COLLATE {}",
            quote_ident(database),
            plain_word(&self.config.charset)?,
            plain_word(&self.config.collation)?
        );
        self.execute(&sql).await
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        self.tables_of(database, false).await
    }

    async fn swap_tables(&self, production: &str, shadow: &str, retired: &str) -> Result<()> {
        refuse_unmovable(&self.schema_objects([production, shadow]).await?)?;
        let current = self.tables_of(production, true).await?;
        let incoming = self.tables_of(shadow, true).await?;
        if incoming.is_empty() {
            return Err(BackupError::Integrity(format!("{shadow} has no tables to swap in")));
        }

        self.drop_database(retired).await?;
        self.create_database(retired).await?;

        let moves: Vec<String> = current
            .iter()
            .map(|t| {
                format!(
                    "{}.{} TO {}.{}",
                    quote_ident(production),
                    quote_ident(t),
                    quote_ident(retired),
                    quote_ident(t)
                )
            })
            .chain(incoming.iter().map(|t| {
                format!(
                    "{}.{} TO {}.{}",
                    quote_ident(shadow),
                    quote_ident(t),
                    quote_ident(production),
                    quote_ident(t)
                )
            }))
            .collect();

        tracing::info!(
            production,
            shadow,
            retired_tables = current.len(),
            incoming_tables = incoming.len(),
            "Swapping tables into production"
        );
        self.execute(&format!("RENAME TABLE {}", moves.join(", "))).await
    }
}
