use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, ErrorCode, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Enums ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    Manual,
    Automatic,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Manual => "manual",
            BackupType::Automatic => "automatic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    InProgress,
    Success,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::InProgress => "in_progress",
            BackupStatus::Success => "success",
            BackupStatus::Failed => "failed",
        }
    }
}

impl FromStr for BackupType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(BackupType::Manual),
            "automatic" => Ok(BackupType::Automatic),
            other => anyhow::bail!("unknown backup type '{other}'"),
        }
    }
}

impl FromStr for BackupStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(BackupStatus::InProgress),
            "success" => Ok(BackupStatus::Success),
            "failed" => Ok(BackupStatus::Failed),
            other => anyhow::bail!("unknown backup status '{other}'"),
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for BackupType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for BackupType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str()?.parse().map_err(|e: anyhow::Error| FromSqlError::Other(e.into()))
    }
}

impl ToSql for BackupStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for BackupStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str()?.parse().map_err(|e: anyhow::Error| FromSqlError::Other(e.into()))
    }
}

// ── Scope, filters, paging ──

/// Which rows a caller may see. `Instance` is the whole-instance view;
/// `Tenant` restricts every statement to that tenant's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantScope {
    Instance,
    Tenant(i64),
}

impl TenantScope {
    pub fn from_tenant(tenant_id: Option<i64>) -> Self {
        match tenant_id {
            Some(id) => TenantScope::Tenant(id),
            None => TenantScope::Instance,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BackupFilter {
    pub backup_type: Option<BackupType>,
    pub status: Option<BackupStatus>,
}

pub const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, per_page: 20 }
    }
}

impl PageRequest {
    fn limit_offset(&self) -> (i64, i64) {
        let per_page = self.per_page.clamp(1, MAX_PER_PAGE) as i64;
        let page = self.page.max(1) as i64;
        (per_page, (page - 1) * per_page)
    }
}

// ── BackupRecord ──

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupRecord {
    pub id: i64,
    pub tenant_id: Option<i64>,
    pub filename: String,
    pub filepath: String,
    pub file_size: Option<i64>,
    pub backup_type: BackupType,
    pub status: BackupStatus,
    pub error_message: Option<String>,
    pub created_by: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewBackupRecord {
    pub tenant_id: Option<i64>,
    pub filename: String,
    pub filepath: String,
    pub backup_type: BackupType,
    pub created_by: Option<i64>,
}

/// How a dump attempt ended. The size travels with success only.
#[derive(Debug, Clone, PartialEq)]
pub enum BackupOutcome {
    Success { size_bytes: u64 },
    Failed { message: String },
}

fn row_to_record(row: &Row) -> rusqlite::Result<BackupRecord> {
    Ok(BackupRecord {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        filename: row.get("filename")?,
        filepath: row.get("filepath")?,
        file_size: row.get("file_size")?,
        backup_type: row.get("backup_type")?,
        status: row.get("status")?,
        error_message: row.get("error_message")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
    })
}

/// Builds the WHERE clause shared by listing and counting.
fn where_clause(filter: &BackupFilter, scope: TenantScope) -> (String, Vec<Box<dyn ToSql>>) {
    let mut conditions = Vec::new();
    let mut values: Vec<Box<dyn ToSql>> = Vec::new();

    if let TenantScope::Tenant(tenant_id) = scope {
        conditions.push("tenant_id = ?");
        values.push(Box::new(tenant_id));
    }
    if let Some(backup_type) = filter.backup_type {
        conditions.push("backup_type = ?");
        values.push(Box::new(backup_type));
    }
    if let Some(status) = filter.status {
        conditions.push("status = ?");
        values.push(Box::new(status));
    }

    if conditions.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), values)
    }
}

/// Inserts an `in_progress` record. Returns `Ok(None)` when the file path is
/// already catalogued.
pub fn create(conn: &Connection, data: &NewBackupRecord) -> anyhow::Result<Option<i64>> {
    let now = chrono::Utc::now().to_rfc3339();
    let inserted = conn.execute(
        "INSERT INTO backups (tenant_id, filename, filepath, backup_type, status, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, 'in_progress', ?5, ?6)",
        params![
            data.tenant_id,
            data.filename,
            data.filepath,
            data.backup_type,
            data.created_by,
            now
        ],
    );
    match inserted {
        Ok(_) => Ok(Some(conn.last_insert_rowid())),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

pub fn find_by_id(conn: &Connection, id: i64, scope: TenantScope) -> anyhow::Result<Option<BackupRecord>> {
    let mut stmt = match scope {
        TenantScope::Instance => conn.prepare("SELECT * FROM backups WHERE id = ?1")?,
        TenantScope::Tenant(_) => {
            conn.prepare("SELECT * FROM backups WHERE id = ?1 AND tenant_id = ?2")?
        }
    };
    let mut rows = match scope {
        TenantScope::Instance => stmt.query(params![id])?,
        TenantScope::Tenant(tenant_id) => stmt.query(params![id, tenant_id])?,
    };
    match rows.next()? {
        Some(row) => Ok(Some(row_to_record(row)?)),
        None => Ok(None),
    }
}

pub fn find_page(
    conn: &Connection,
    filter: &BackupFilter,
    scope: TenantScope,
    page: PageRequest,
) -> anyhow::Result<Vec<BackupRecord>> {
    let (clause, mut values) = where_clause(filter, scope);
    let (limit, offset) = page.limit_offset();
    values.push(Box::new(limit));
    values.push(Box::new(offset));

    let sql = format!("SELECT * FROM backups{clause} ORDER BY id DESC LIMIT ? OFFSET ?");
    let params: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params.as_slice(), row_to_record)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn count(conn: &Connection, filter: &BackupFilter, scope: TenantScope) -> anyhow::Result<i64> {
    let (clause, values) = where_clause(filter, scope);
    let sql = format!("SELECT COUNT(*) FROM backups{clause}");
    let params: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
    Ok(conn.query_row(&sql, params.as_slice(), |row| row.get(0))?)
}

pub fn find_last_successful(conn: &Connection, scope: TenantScope) -> anyhow::Result<Option<BackupRecord>> {
    let filter = BackupFilter {
        status: Some(BackupStatus::Success),
        ..Default::default()
    };
    let page = PageRequest { page: 1, per_page: 1 };
    Ok(find_page(conn, &filter, scope, page)?.into_iter().next())
}

/// Moves an `in_progress` record to its final status. Returns false when the
/// record does not exist or has already been concluded.
pub fn conclude(conn: &Connection, id: i64, outcome: &BackupOutcome) -> anyhow::Result<bool> {
    let changes = match outcome {
        BackupOutcome::Success { size_bytes } => conn.execute(
            "UPDATE backups SET status = 'success', file_size = ?1, error_message = NULL
             WHERE id = ?2 AND status = 'in_progress'",
            params![i64::try_from(*size_bytes)?, id],
        )?,
        BackupOutcome::Failed { message } => conn.execute(
            "UPDATE backups SET status = 'failed', error_message = ?1
             WHERE id = ?2 AND status = 'in_progress'",
            params![message, id],
        )?,
    };
    Ok(changes > 0)
}

pub fn delete(conn: &Connection, id: i64, scope: TenantScope) -> anyhow::Result<bool> {
    let changes = match scope {
        TenantScope::Instance => conn.execute("DELETE FROM backups WHERE id = ?1", params![id])?,
        TenantScope::Tenant(tenant_id) => conn.execute(
            "DELETE FROM backups WHERE id = ?1 AND tenant_id = ?2",
            params![id, tenant_id],
        )?,
    };
    Ok(changes > 0)
}
