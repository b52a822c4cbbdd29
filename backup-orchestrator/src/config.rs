use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How the staged dataset replaces production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionStrategy {
    /// Drop production, recreate it and load the staged dump.
    DropRecreate,
    /// Load into a shadow database and swap tables in with one `RENAME TABLE`.
    /// Refused when either schema holds triggers, views or routines.
    ShadowSwap,
}

impl FromStr for PromotionStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "drop-recreate" => Ok(PromotionStrategy::DropRecreate),
            "shadow-swap" => Ok(PromotionStrategy::ShadowSwap),
            other => anyhow::bail!("unknown promotion strategy '{other}'"),
        }
    }
}

/// Connection settings for the production MySQL server.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub production: String,
    pub staging: String,
    pub charset: String,
    pub collation: String,
    pub mysqldump_path: PathBuf,
    pub mysql_path: PathBuf,
}

impl DatabaseConfig {
    pub fn shadow(&self) -> String {
        format!("{}_promotion_shadow", self.production)
    }

    pub fn retired(&self) -> String {
        format!("{}_promotion_retired", self.production)
    }
}

/// Which rows belong to a tenant and where the tenant itself lives.
#[derive(Debug, Clone)]
pub struct TenantLayout {
    pub tables: Vec<String>,
    pub tenant_column: String,
    pub tenants_table: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backups_dir: PathBuf,
    pub catalog_db_path: PathBuf,
    pub retention: Duration,
    pub database: DatabaseConfig,
    pub tenant_layout: TenantLayout,
    pub tool_timeout: Duration,
    pub dump_timeout: Duration,
    pub restore_timeout: Duration,
    pub schedule_hour: u32,
    pub schedule_minute: u32,
    pub promotion_strategy: PromotionStrategy,
    pub log_level: String,
}

const DAY: u64 = 24 * 60 * 60;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let production = env_or("DB_DATABASE", "storefront");
        let staging = std::env::var("STAGING_DATABASE")
            .unwrap_or_else(|_| format!("{production}_restore_staging"));
        if staging == production {
            anyhow::bail!("STAGING_DATABASE must differ from DB_DATABASE");
        }

        let schedule_hour = env_parse("BACKUP_SCHEDULE_HOUR", 2u32);
        let schedule_minute = env_parse("BACKUP_SCHEDULE_MINUTE", 0u32);
        if schedule_hour > 23 || schedule_minute > 59 {
            anyhow::bail!("invalid backup schedule {schedule_hour:02}:{schedule_minute:02}");
        }

        let tables = split_list(&env_or(
            "TENANT_TABLES",
            "users,categories,products,orders,order_items,audit_logs",
        ));
        if tables.is_empty() {
            anyhow::bail!("TENANT_TABLES must name at least one table");
        }

        Ok(Self {
            backups_dir: PathBuf::from(env_or("BACKUPS_DIR", "./storage/backups")),
            catalog_db_path: PathBuf::from(env_or(
                "CATALOG_DB_PATH",
                "./storage/backup-catalog.db",
            )),
            retention: Duration::from_secs(env_parse("RETENTION_DAYS", 30u64) * DAY),
            database: DatabaseConfig {
                host: env_or("DB_HOST", "127.0.0.1"),
                port: env_parse("DB_PORT", 3306u16),
                username: env_or("DB_USERNAME", "root"),
                password: env_or("DB_PASSWORD", ""),
                production,
                staging,
                charset: env_or("DB_CHARSET", "utf8mb4"),
                collation: env_or("DB_COLLATION", "utf8mb4_unicode_ci"),
                mysqldump_path: PathBuf::from(env_or("MYSQLDUMP_PATH", "mysqldump")),
                mysql_path: PathBuf::from(env_or("MYSQL_PATH", "mysql")),
            },
            tenant_layout: TenantLayout {
                tables,
                tenant_column: env_or("TENANT_COLUMN", "tenant_id"),
                tenants_table: env_or("TENANTS_TABLE", "tenants"),
            },
            tool_timeout: Duration::from_secs(env_parse("TOOL_TIMEOUT_SECS", 1800u64)),
            dump_timeout: Duration::from_secs(env_parse("DUMP_TIMEOUT_SECS", 3600u64)),
            restore_timeout: Duration::from_secs(env_parse("RESTORE_TIMEOUT_SECS", 3600u64)),
            schedule_hour,
            schedule_minute,
            promotion_strategy: env_or("PROMOTION_STRATEGY", "drop-recreate").parse()?,
            log_level: env_or("LOG_LEVEL", "info"),
        })
    }
}
