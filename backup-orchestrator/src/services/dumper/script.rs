//! SQL text for hand-built tenant snapshots.
//!
//! Generic dump tools cannot filter by row, so a tenant snapshot is written as
//! a plain MySQL script: every allow-listed table is recreated from its DDL and
//! refilled with the tenant's rows only.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl SqlValue {
    /// MySQL literal for this value.
    pub fn to_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".into(),
            SqlValue::Bool(b) => if *b { "1" } else { "0" }.into(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::UInt(u) => u.to_string(),
            SqlValue::Float(f) if f.is_finite() => f.to_string(),
            SqlValue::Float(_) => "NULL".into(),
            SqlValue::Decimal(d) => d.to_string(),
            SqlValue::Text(s) => quote_string(s),
            SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            SqlValue::Time(t) => format!("'{}'", t.format("%H:%M:%S")),
            SqlValue::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S")),
            SqlValue::Json(v) => quote_string(&v.to_string()),
            SqlValue::Bytes(b) if b.is_empty() => "''".into(),
            SqlValue::Bytes(b) => format!("X'{}'", hex::encode_upper(b)),
        }
    }
}

/// One row as ordered `(column, value)` pairs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlRow(pub Vec<(String, SqlValue)>);

impl SqlRow {
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.0.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }
}

#[derive(Debug, Clone)]
pub struct TableSnapshot {
    pub name: String,
    pub create_statement: String,
    pub rows: Vec<SqlRow>,
}

/// The tenant's own row in the tenant master table.
#[derive(Debug, Clone)]
pub struct TenantRecord {
    pub table: String,
    pub create_statement: String,
    pub row: SqlRow,
}

pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

fn insert_statement(verb: &str, table: &str, row: &SqlRow) -> String {
    let columns: Vec<String> = row.0.iter().map(|(name, _)| quote_ident(name)).collect();
    let values: Vec<String> = row.0.iter().map(|(_, value)| value.to_literal()).collect();
    format!(
        "{verb} INTO {} ({}) VALUES ({});",
        quote_ident(table),
        columns.join(", "),
        values.join(", ")
    )
}

/// Turns `CREATE TABLE x` into `CREATE TABLE IF NOT EXISTS x`, so the tenant
/// record never replaces an existing tenant table.
fn create_if_missing(statement: &str) -> String {
    const PREFIX: &str = "CREATE TABLE ";
    let trimmed = statement.trim_start();
    let has_prefix = trimmed
        .get(..PREFIX.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(PREFIX));
    let already = trimmed
        .get(PREFIX.len()..)
        .is_some_and(|rest| rest.to_ascii_uppercase().starts_with("IF NOT EXISTS"));
    match trimmed.get(PREFIX.len()..) {
        Some(rest) if has_prefix && !already => format!("CREATE TABLE IF NOT EXISTS {rest}"),
        _ => trimmed.to_string(),
    }
}

pub fn render_tenant_script(
    tenant_id: i64,
    generated_at: NaiveDateTime,
    tables: &[TableSnapshot],
    tenant: Option<&TenantRecord>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "-- Tenant backup for tenant {tenant_id}");
    let _ = writeln!(out, "-- Generated at {}", generated_at.format("%Y-%m-%d %H:%M:%S"));
    out.push('\n');
    out.push_str("SET FOREIGN_KEY_CHECKS=0;\n\n");

    for table in tables {
        let name = quote_ident(&table.name);
        let _ = writeln!(out, "-- Table {name}");
        let _ = writeln!(out, "DROP TABLE IF EXISTS {name};");
        let _ = writeln!(out, "{};", table.create_statement.trim().trim_end_matches(';'));
        out.push('\n');

        if table.rows.is_empty() {
            continue;
        }
        let _ = writeln!(out, "LOCK TABLES {name} WRITE;");
        for row in &table.rows {
            out.push_str(&insert_statement("INSERT", &table.name, row));
            out.push('\n');
        }
        out.push_str("UNLOCK TABLES;\n\n");
    }

    if let Some(tenant) = tenant {
        let _ = writeln!(out, "-- Tenant record");
        let _ = writeln!(
            out,
            "{};",
            create_if_missing(tenant.create_statement.trim().trim_end_matches(';'))
        );
        out.push_str(&insert_statement("REPLACE", &tenant.table, &tenant.row));
        out.push_str("\n\n");
    }

    out.push_str("SET FOREIGN_KEY_CHECKS=1;\n");
    out
}
