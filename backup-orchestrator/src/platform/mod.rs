//! Seams to the storefront's MySQL server and to the rest of the platform.
//!
//! Components only see these traits; `mysql_admin` and `mysql_platform`
//! provide the production implementations.

pub mod mysql_admin;
pub mod mysql_platform;

use crate::error::Result;
use crate::models::notification::{Administrator, Notification};
use crate::services::dumper::script::{SqlRow, TenantRecord};
use crate::services::tool::ToolReport;
use async_trait::async_trait;
use std::path::Path;

/// Instance-level operations on whole databases.
#[async_trait]
pub trait DatabaseAdmin: Send + Sync {
    /// Dumps `database` into `dest`. A report with `success == false` still
    /// returns `Ok`; the caller inspects the file.
    async fn dump_database(&self, database: &str, dest: &Path) -> Result<ToolReport>;

    /// Executes the SQL script at `script` against `database`.
    async fn load_script(&self, database: &str, script: &Path) -> Result<()>;

    /// Drops `database` if it exists.
    async fn drop_database(&self, database: &str) -> Result<()>;

    /// Creates an empty `database` with the configured charset and collation.
    async fn create_database(&self, database: &str) -> Result<()>;

    async fn list_tables(&self, database: &str) -> Result<Vec<String>>;

    /// Atomically moves every table of `production` into `retired` and every
    /// table of `shadow` into `production`.
    async fn swap_tables(&self, production: &str, shadow: &str, retired: &str) -> Result<()>;
}

/// Row-level reads used to build tenant snapshots.
#[async_trait]
pub trait TenantSource: Send + Sync {
    async fn create_statement(&self, table: &str) -> Result<String>;

    async fn tenant_rows(&self, table: &str, tenant_id: i64) -> Result<Vec<SqlRow>>;

    async fn tenant_record(&self, tenant_id: i64) -> Result<Option<TenantRecord>>;
}

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn tenant_slug(&self, tenant_id: i64) -> Result<Option<String>>;

    /// Every administrator of every tenant.
    async fn administrators(&self) -> Result<Vec<Administrator>>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Checks `password` against the stored hash of `user_id`. Unknown users
    /// verify as `false`.
    async fn verify(&self, user_id: i64, password: &str) -> Result<bool>;
}

/// Compares a plain password with a stored bcrypt hash. Malformed hashes
/// never match.
pub fn password_matches(password: &str, hash: &str) -> bool {
    match bcrypt::verify(password, hash) {
        Ok(matches) => matches,
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash could not be checked");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_matches() -> anyhow::Result<()> {
        let hash = bcrypt::hash("s3cret", 4)?;
        assert!(password_matches("s3cret", &hash));
        assert!(!password_matches("wrong", &hash));
        assert!(!password_matches("s3cret", "not-a-hash"));
        Ok(())
    }

    #[test]
    fn test_password_matches_2y_prefix() -> anyhow::Result<()> {
        let hash = bcrypt::hash("s3cret", 4)?.replacen("$2b$", "$2y$", 1);
        assert!(password_matches("s3cret", &hash));
        Ok(())
    }
}
