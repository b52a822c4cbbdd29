use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// A user with administrative rights inside one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Administrator {
    pub user_id: i64,
    pub tenant_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub tenant_id: i64,
    pub user_id: i64,
    pub severity: Severity,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn backup_failed(admin: &Administrator, cause: &str) -> Self {
        Self {
            tenant_id: admin.tenant_id,
            user_id: admin.user_id,
            severity: Severity::Error,
            title: "Automatic backup failed".into(),
            message: format!("The scheduled database backup failed: {cause}"),
        }
    }
}
