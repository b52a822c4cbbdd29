//! Runs external database utilities with a hard time limit.

use crate::error::{BackupError, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Outcome of an external utility that ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolReport {
    pub success: bool,
    pub status: String,
    pub stderr: String,
}

impl ToolReport {
    /// Short description used in error messages and logs.
    pub fn describe(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.status.clone()
        } else {
            format!("{}: {}", self.status, stderr)
        }
    }
}

/// Spawns `command`, waits at most `timeout` and collects its exit status and
/// stderr. The child is killed when the deadline passes.
///
/// A non-zero exit is not an error here; callers decide what a failed exit
/// means for them. Failing to start the process or hitting the deadline is.
pub async fn run_tool(mut command: Command, label: &str, timeout: Duration) -> Result<ToolReport> {
    command
        .kill_on_drop(true)
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let child = command
        .spawn()
        .map_err(|e| BackupError::ExternalTool(format!("failed to start {label}: {e}")))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let report = ToolReport {
                success: output.status.success(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            };
            if !report.success {
                tracing::warn!(tool = label, status = %report.status, "External tool reported failure");
            }
            Ok(report)
        }
        Ok(Err(e)) => Err(BackupError::ExternalTool(format!("{label} did not complete: {e}"))),
        Err(_) => Err(BackupError::ExternalTool(format!(
            "{label} timed out after {}s and was killed",
            timeout.as_secs()
        ))),
    }
}
