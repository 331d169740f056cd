/// Backup run report
///
/// Per-disk step outcomes plus the prune result, printed as a summary table
/// and optionally written as JSON.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use std::path::Path;

use crate::core::exec::{CommandOutput, ExecError};
use crate::utils::{format_duration, truncate_string, EXIT_DISK_FAILURE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed {
        code: Option<i32>,
        message: String,
    },
    /// Not attempted because an earlier step failed
    Skipped,
}

impl StepStatus {
    pub fn from_result(result: &Result<CommandOutput, ExecError>) -> Self {
        match result {
            Ok(output) if output.success() => StepStatus::Succeeded,
            Ok(output) => StepStatus::Failed {
                code: output.code,
                message: output.stderr.clone(),
            },
            Err(err) => StepStatus::Failed {
                code: None,
                message: err.to_string(),
            },
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        StepStatus::Failed {
            code: None,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Succeeded)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StepStatus::Failed { .. })
    }

    fn label(&self) -> colored::ColoredString {
        match self {
            StepStatus::Succeeded => "ok".green(),
            StepStatus::Failed { .. } => "FAILED".red().bold(),
            StepStatus::Skipped => "skipped".yellow(),
        }
    }
}

/// Outcome of the snapshot → transfer → cleanup pipeline for one disk
#[derive(Debug, Clone, Serialize)]
pub struct DiskReport {
    pub instance: String,
    pub disk: String,
    pub node: String,
    pub snapshot: String,
    pub artifact: String,
    pub snapshot_create: StepStatus,
    pub transfer: StepStatus,
    pub snapshot_remove: StepStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DiskReport {
    pub fn succeeded(&self) -> bool {
        self.snapshot_create.is_success()
            && self.transfer.is_success()
            && self.snapshot_remove.is_success()
    }

    /// The snapshot was created but could not be removed
    pub fn orphaned_snapshot(&self) -> bool {
        self.snapshot_create.is_success() && !self.snapshot_remove.is_success()
    }

    fn first_error(&self) -> Option<&str> {
        [&self.snapshot_create, &self.transfer, &self.snapshot_remove]
            .into_iter()
            .find_map(|step| match step {
                StepStatus::Failed { message, .. } => Some(message.as_str()),
                _ => None,
            })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PruneOutcome {
    pub status: StepStatus,
    /// Change-time boundary, artifacts changed before it are deleted
    pub boundary: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub unique_id: String,
    pub debug: bool,
    pub disks: Vec<DiskReport>,
    pub prune: Option<PruneOutcome>,
}

impl BackupReport {
    pub fn new(unique_id: impl Into<String>, debug: bool, disks: Vec<DiskReport>) -> Self {
        Self {
            unique_id: unique_id.into(),
            debug,
            disks,
            prune: None,
        }
    }

    pub fn failed_disks(&self) -> impl Iterator<Item = &DiskReport> {
        self.disks.iter().filter(|d| !d.succeeded())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_disks().next().is_none()
    }

    /// Process exit status. Prune failures are reported but do not fail the run.
    pub fn exit_code(&self) -> u8 {
        if self.all_succeeded() {
            0
        } else {
            EXIT_DISK_FAILURE
        }
    }

    pub fn print_summary(&self) {
        println!("\nBackup run {}\n", self.unique_id.bold());
        println!(
            "{:<20} {:<28} {:<15} {:<9} {:<9} {:<9} {:<8}",
            "Instance", "Disk", "Node", "Snapshot", "Transfer", "Cleanup", "Time"
        );
        println!("{}", "-".repeat(104));

        for disk in &self.disks {
            let elapsed = (disk.finished_at - disk.started_at).num_seconds().max(0) as u64;
            println!(
                "{:<20} {:<28} {:<15} {:<9} {:<9} {:<9} {:<8}",
                truncate_string(&disk.instance, 20),
                truncate_string(&disk.disk, 28),
                truncate_string(&disk.node, 15),
                disk.snapshot_create.label(),
                disk.transfer.label(),
                disk.snapshot_remove.label(),
                format_duration(elapsed)
            );
            if let Some(error) = disk.first_error() {
                println!("  {} {}", "└".red(), truncate_string(error, 100));
            }
            if disk.orphaned_snapshot() {
                println!("  {} snapshot {} left on {}", "⚠".yellow(), disk.snapshot, disk.node);
            }
        }

        if let Some(prune) = &self.prune {
            println!(
                "\nPrune (changed before {}): {}",
                prune.boundary.format("%Y-%m-%d %H:%M:%S UTC"),
                prune.status.label()
            );
        }

        let failed = self.failed_disks().count();
        if failed == 0 {
            println!("\n{} {} disk(s) backed up", "✓".green(), self.disks.len());
        } else {
            println!(
                "\n{} {} of {} disk(s) failed",
                "✗".red(),
                failed,
                self.disks.len()
            );
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(create: StepStatus, transfer: StepStatus, remove: StepStatus) -> DiskReport {
        let now = Utc::now();
        DiskReport {
            instance: "vm1".to_string(),
            disk: "vg0/lv0".to_string(),
            node: "node1".to_string(),
            snapshot: "lv0.r.bak".to_string(),
            artifact: "r.lv0.vm1.node1.raw".to_string(),
            snapshot_create: create,
            transfer,
            snapshot_remove: remove,
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_step_status_from_result() {
        assert_eq!(
            StepStatus::from_result(&Ok(CommandOutput::success_with(""))),
            StepStatus::Succeeded
        );
        assert_eq!(
            StepStatus::from_result(&Ok(CommandOutput::failure(5, "no space"))),
            StepStatus::Failed {
                code: Some(5),
                message: "no space".to_string()
            }
        );
        let timed_out = Err(ExecError::TimedOut {
            program: "gnt-cluster".to_string(),
            timeout: std::time::Duration::from_secs(1),
        });
        assert!(StepStatus::from_result(&timed_out).is_failure());
    }

    #[test]
    fn test_exit_code() {
        use StepStatus::*;

        let ok = BackupReport::new("r", false, vec![disk(Succeeded, Succeeded, Succeeded)]);
        assert_eq!(ok.exit_code(), 0);

        let failed = BackupReport::new(
            "r",
            false,
            vec![
                disk(Succeeded, Succeeded, Succeeded),
                disk(Succeeded, StepStatus::failed("broken pipe"), Succeeded),
            ],
        );
        assert_eq!(failed.exit_code(), 1);
        assert_eq!(failed.failed_disks().count(), 1);
    }

    #[test]
    fn test_prune_failure_does_not_fail_run() {
        use StepStatus::*;

        let mut report = BackupReport::new("r", false, vec![disk(Succeeded, Succeeded, Succeeded)]);
        report.prune = Some(PruneOutcome {
            status: StepStatus::failed("ssh: connect refused"),
            boundary: Utc::now(),
        });
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_orphaned_snapshot() {
        use StepStatus::*;

        assert!(disk(Succeeded, Succeeded, StepStatus::failed("busy")).orphaned_snapshot());
        assert!(!disk(StepStatus::failed("no vg"), Skipped, Skipped).orphaned_snapshot());
    }

    #[test]
    fn test_json_report() {
        use StepStatus::*;

        let report = BackupReport::new("r", true, vec![disk(Succeeded, Skipped, Succeeded)]);
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["unique_id"], "r");
        assert_eq!(json["disks"][0]["transfer"]["status"], "skipped");
        assert_eq!(json["disks"][0]["snapshot_create"]["status"], "succeeded");
    }
}
