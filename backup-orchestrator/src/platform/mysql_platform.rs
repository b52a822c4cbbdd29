use crate::config::{DatabaseConfig, TenantLayout};
use crate::error::{BackupError, Result};
use crate::models::notification::{Administrator, Notification};
use crate::platform::{password_matches, CredentialVerifier, NotificationSink, TenantDirectory, TenantSource};
use crate::services::dumper::script::{quote_ident, SqlRow, SqlValue, TenantRecord};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo};
use std::time::Duration;

/// Reads from and writes to the storefront's production schema.
pub struct MySqlPlatform {
    pool: MySqlPool,
    layout: TenantLayout,
}

impl MySqlPlatform {
    /// Builds a lazily connecting pool; nothing touches the server until the
    /// first query.
    pub fn new(config: &DatabaseConfig, layout: TenantLayout) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(&config.production)
            .charset(&config.charset);
        let pool = MySqlPoolOptions::new()
            .max_connections(4)
            .idle_timeout(Duration::from_secs(60))
            .connect_lazy_with(options);
        Self { pool, layout }
    }

    fn ensure_allowed(&self, table: &str) -> Result<()> {
        if table == self.layout.tenants_table || self.layout.tables.iter().any(|t| t == table) {
            Ok(())
        } else {
            Err(BackupError::Validation(format!("table '{table}' is not tenant-scoped")))
        }
    }
}

fn get<'r, T>(row: &'r MySqlRow, index: usize) -> sqlx::Result<Option<T>>
where
    T: sqlx::Decode<'r, MySql> + sqlx::Type<MySql>,
{
    row.try_get::<Option<T>, _>(index)
}

fn or_null<T>(value: Option<T>, wrap: impl FnOnce(T) -> SqlValue) -> SqlValue {
    value.map(wrap).unwrap_or(SqlValue::Null)
}

/// Text when the column decodes as text, raw bytes otherwise.
fn text_or_bytes(row: &MySqlRow, index: usize) -> sqlx::Result<SqlValue> {
    match get::<String>(row, index) {
        Ok(v) => Ok(or_null(v, SqlValue::Text)),
        Err(_) => Ok(or_null(get::<Vec<u8>>(row, index)?, SqlValue::Bytes)),
    }
}

fn decode_value(row: &MySqlRow, index: usize, type_name: &str) -> sqlx::Result<SqlValue> {
    let ty = type_name.to_ascii_uppercase();
    let value = match ty.as_str() {
        "NULL" => SqlValue::Null,
        "BOOLEAN" => or_null(get::<bool>(row, index)?, SqlValue::Bool),
        t if t.ends_with("UNSIGNED") && !t.starts_with("DECIMAL") => {
            or_null(get::<u64>(row, index)?, SqlValue::UInt)
        }
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            or_null(get::<i64>(row, index)?, SqlValue::Int)
        }
        "FLOAT" => or_null(get::<f32>(row, index)?, |f| SqlValue::Float(f64::from(f))),
        "DOUBLE" => or_null(get::<f64>(row, index)?, SqlValue::Float),
        t if t.starts_with("DECIMAL") => or_null(get::<Decimal>(row, index)?, SqlValue::Decimal),
        "DATE" => or_null(get::<NaiveDate>(row, index)?, SqlValue::Date),
        "DATETIME" | "TIMESTAMP" => or_null(get::<NaiveDateTime>(row, index)?, SqlValue::DateTime),
        "TIME" => match get::<NaiveTime>(row, index) {
            Ok(v) => or_null(v, SqlValue::Time),
            Err(_) => text_or_bytes(row, index)?,
        },
        "JSON" => or_null(get::<sqlx::types::Json<serde_json::Value>>(row, index)?, |j| {
            SqlValue::Json(j.0)
        }),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" | "GEOMETRY" => {
            or_null(get::<Vec<u8>>(row, index)?, SqlValue::Bytes)
        }
        _ => text_or_bytes(row, index)?,
    };
    Ok(value)
}

fn decode_row(row: &MySqlRow) -> Result<SqlRow> {
    let mut values = Vec::with_capacity(row.columns().len());
    for (index, column) in row.columns().iter().enumerate() {
        let value = decode_value(row, index, column.type_info().name())?;
        values.push((column.name().to_string(), value));
    }
    Ok(SqlRow(values))
}

#[async_trait]
impl TenantSource for MySqlPlatform {
    async fn create_statement(&self, table: &str) -> Result<String> {
        self.ensure_allowed(table)?;
        let row = sqlx::query(&format!("SHOW CREATE TABLE {}", quote_ident(table)))
            .fetch_one(&self.pool)
            .await?;
        match text_or_bytes(&row, 1)? {
            SqlValue::Text(ddl) => Ok(ddl),
            SqlValue::Bytes(raw) => Ok(String::from_utf8_lossy(&raw).into_owned()),
            _ => Err(BackupError::Integrity(format!("no DDL returned for table '{table}'"))),
        }
    }

    async fn tenant_rows(&self, table: &str, tenant_id: i64) -> Result<Vec<SqlRow>> {
        self.ensure_allowed(table)?;
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            quote_ident(table),
            quote_ident(&self.layout.tenant_column)
        );
        let rows = sqlx::query(&sql).bind(tenant_id).fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn tenant_record(&self, tenant_id: i64) -> Result<Option<TenantRecord>> {
        let table = &self.layout.tenants_table;
        let sql = format!("SELECT * FROM {} WHERE id = ?", quote_ident(table));
        let Some(row) = sqlx::query(&sql).bind(tenant_id).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };
        Ok(Some(TenantRecord {
            table: table.clone(),
            create_statement: self.create_statement(table).await?,
            row: decode_row(&row)?,
        }))
    }
}

#[async_trait]
impl TenantDirectory for MySqlPlatform {
    async fn tenant_slug(&self, tenant_id: i64) -> Result<Option<String>> {
        let sql = format!(
            "SELECT CAST(slug AS CHAR) FROM {} WHERE id = ?",
            quote_ident(&self.layout.tenants_table)
        );
        Ok(sqlx::query_scalar::<_, String>(&sql)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn administrators(&self) -> Result<Vec<Administrator>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT CAST(id AS SIGNED), CAST(tenant_id AS SIGNED) FROM users
             WHERE role = 'admin' AND tenant_id IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(user_id, tenant_id)| Administrator { user_id, tenant_id })
            .collect())
    }
}

#[async_trait]
impl NotificationSink for MySqlPlatform {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        sqlx::query(
            "INSERT INTO notifications (tenant_id, user_id, type, title, message, is_read, created_at)
             VALUES (?, ?, ?, ?, ?, 0, NOW())",
        )
        .bind(notification.tenant_id)
        .bind(notification.user_id)
        .bind(notification.severity.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialVerifier for MySqlPlatform {
    async fn verify(&self, user_id: i64, password: &str) -> Result<bool> {
        let hash: Option<String> =
            sqlx::query_scalar("SELECT CAST(password AS CHAR) FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(hash.is_some_and(|h| password_matches(password, &h)))
    }
}
