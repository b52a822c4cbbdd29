use std::path::PathBuf;

/// Error kinds surfaced to callers of the backup core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    ExternalTool,
    Integrity,
    Credential,
    State,
    Internal,
}

#[derive(thiserror::Error, Debug)]
pub enum BackupError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("external tool failed: {0}")]
    ExternalTool(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("{0}")]
    Credential(String),

    #[error("{0}")]
    State(String),

    /// Promotion failed after the safety backup was written. Manual recovery
    /// starts from `safety_backup`.
    #[error("promotion failed ({source}); safety backup kept at {}", safety_backup.display())]
    Promotion {
        safety_backup: PathBuf,
        #[source]
        source: Box<BackupError>,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BackupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackupError::Validation(_) => ErrorKind::Validation,
            BackupError::NotFound(_) => ErrorKind::NotFound,
            BackupError::ExternalTool(_) => ErrorKind::ExternalTool,
            BackupError::Integrity(_) => ErrorKind::Integrity,
            BackupError::Credential(_) => ErrorKind::Credential,
            BackupError::State(_) => ErrorKind::State,
            BackupError::Promotion { source, .. } => source.kind(),
            BackupError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Path of the safety backup when the error happened mid-promotion.
    pub fn safety_backup(&self) -> Option<&PathBuf> {
        match self {
            BackupError::Promotion { safety_backup, .. } => Some(safety_backup),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BackupError {
    fn from(e: std::io::Error) -> Self {
        BackupError::Internal(e.into())
    }
}

impl From<sqlx::Error> for BackupError {
    fn from(e: sqlx::Error) -> Self {
        BackupError::Internal(anyhow::Error::new(e).context("production database query failed"))
    }
}

impl From<tokio::task::JoinError> for BackupError {
    fn from(e: tokio::task::JoinError) -> Self {
        BackupError::Internal(anyhow::anyhow!(e))
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
