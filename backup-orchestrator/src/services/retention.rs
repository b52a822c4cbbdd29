use std::path::PathBuf;
use std::time::{Duration, SystemTime};

pub const BACKUP_FILE_PREFIX: &str = "backup_";
pub const BACKUP_FILE_SUFFIX: &str = ".sql";

/// Deletes backup files whose modification time is older than the retention
/// window. Only the files are removed; catalog rows stay.
#[derive(Debug, Clone)]
pub struct RetentionReaper {
    backups_dir: PathBuf,
    window: Duration,
}

fn is_backup_file(name: &str) -> bool {
    name.starts_with(BACKUP_FILE_PREFIX) && name.ends_with(BACKUP_FILE_SUFFIX)
}

impl RetentionReaper {
    pub fn new(backups_dir: PathBuf, window: Duration) -> Self {
        Self { backups_dir, window }
    }

    /// Returns how many files were deleted. Safe to call repeatedly.
    pub fn sweep(&self) -> anyhow::Result<usize> {
        let entries = match std::fs::read_dir(&self.backups_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = SystemTime::now();
        let mut deleted = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_backup_file(&name) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else { continue };
            if !metadata.is_file() {
                continue;
            }
            let Ok(modified) = metadata.modified() else { continue };
            // A modification time in the future counts as brand new.
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= self.window {
                continue;
            }

            match std::fs::remove_file(entry.path()) {
                Ok(()) => {
                    deleted += 1;
                    tracing::info!("[Retention] Removed old backup: {}", name);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("[Retention] Failed to remove {}: {}", name, e),
            }
        }

        if deleted > 0 {
            tracing::info!(deleted, "[Retention] Sweep finished");
        }
        Ok(deleted)
    }
}
