/// Backup orchestration
///
/// Every disk goes through snapshot create → transfer → snapshot remove on
/// its instance's primary node. Disks of one node always run one after the
/// other; with `parallel_nodes > 1` several nodes are worked on at once.
/// Pruning starts only after every disk pipeline has finished.
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::core::config::RunContext;
use crate::core::exec::{
    repository_ssh, CommandRunner, CommandSpec, ExecError, Invocation, ShellLine,
};
use crate::core::inventory::{Disk, Instance, InventorySource};
use crate::core::naming::{artifact_name, sanitize_field, snapshot_name};
use crate::core::prune::RetentionPruner;
use crate::core::report::{BackupReport, DiskReport, StepStatus};
use crate::utils::{rule, shell_quote};

/// The three commands of one disk pipeline
#[derive(Debug, Clone)]
pub struct DiskPlan {
    pub instance: String,
    pub node: String,
    pub disk: Disk,
    pub snapshot: String,
    pub artifact: String,
    pub create: Invocation,
    pub transfer: Invocation,
    pub remove: Invocation,
}

impl DiskPlan {
    pub fn new(ctx: &RunContext, instance: &Instance, disk: &Disk) -> Self {
        let node = instance.primary_node.clone();
        let snapshot = snapshot_name(&disk.lv, ctx.unique_id(), ctx.lv_backup_extension());
        let artifact = artifact_name(
            ctx.unique_id(),
            &sanitize_field(&disk.lv),
            &sanitize_field(&instance.name),
            &sanitize_field(&node),
            ctx.backup_extension(),
        );

        // lvcreate -L1G -s -n <snapshot> <source device>
        let create = CommandSpec::new("lvcreate")
            .arg(format!("-L{}", ctx.snapshot_size()))
            .args(["-s", "-n"])
            .arg(snapshot.as_str())
            .arg(disk.device_path.as_str());

        // dd if=<snapshot device> bs=128M | egress | ssh <repo> 'ingress <artifact path>'
        let read = CommandSpec::new("dd")
            .arg(format!("if=/dev/{}/{}", disk.vg, snapshot))
            .arg(format!("bs={}", ctx.block_size()));
        let write = format!(
            "{} {}",
            ctx.compression().ingress.trim(),
            shell_quote(&ctx.artifact_path(&artifact))
        );
        let pipeline = ShellLine::new()
            .command(&read)
            .fragment(&ctx.compression().egress)
            .command(&repository_ssh(ctx).arg(write));
        let transfer = node_pipeline(&pipeline, ctx.command_timeout());

        // Removal names the snapshot itself, never the source volume
        let remove = CommandSpec::new("lvremove")
            .arg("-f")
            .arg(format!("{}/{}", disk.vg, snapshot));

        Self {
            instance: instance.name.clone(),
            create: Invocation::on_node("snapshot_create", node.as_str(), ShellLine::from(&create)),
            transfer: Invocation::on_node("transfer", node.as_str(), transfer),
            remove: Invocation::on_node("snapshot_remove", node.as_str(), ShellLine::from(&remove)),
            node,
            disk: disk.clone(),
            snapshot,
            artifact,
        }
    }
}

/// Run a pipeline on the node under `bash -o pipefail`, so a failing `dd`
/// or compressor fails the step and not only a failing `ssh`.
///
/// With a timeout the pipeline is also bounded on the node. Killing the
/// local `gnt-cluster` process leaves the remote side running.
pub fn node_pipeline(pipeline: &ShellLine, timeout: Option<Duration>) -> ShellLine {
    let bash = CommandSpec::new("bash")
        .args(["-o", "pipefail", "-c"])
        .arg(pipeline.as_str());

    let spec = match timeout {
        Some(timeout) => CommandSpec::new("timeout")
            .arg(format!("{}s", timeout.as_secs().max(1)))
            .arg(bash.program)
            .args(bash.args),
        None => bash,
    };
    ShellLine::from(&spec)
}

#[derive(Clone)]
pub struct BackupOrchestrator {
    ctx: Arc<RunContext>,
    runner: Arc<dyn CommandRunner>,
}

impl BackupOrchestrator {
    pub fn new(ctx: Arc<RunContext>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { ctx, runner }
    }

    pub fn plan(&self, instances: &[Instance]) -> Vec<DiskPlan> {
        instances
            .iter()
            .flat_map(|instance| {
                instance
                    .disks
                    .iter()
                    .map(move |disk| DiskPlan::new(&self.ctx, instance, disk))
            })
            .collect()
    }

    /// Back up every disk of `instances`, one report entry per disk in
    /// inventory order
    pub async fn perform_backup(&self, instances: &[Instance]) -> BackupReport {
        let plans = self.plan(instances);
        let workers = if self.ctx.debug() {
            1
        } else {
            self.ctx.parallel_nodes()
        };

        let disks = if workers <= 1 {
            let mut disks = Vec::with_capacity(plans.len());
            for plan in &plans {
                disks.push(self.run_disk(plan).await);
            }
            disks
        } else {
            self.run_node_queues(plans, workers).await
        };

        BackupReport::new(self.ctx.unique_id(), self.ctx.debug(), disks)
    }

    async fn run_node_queues(&self, plans: Vec<DiskPlan>, workers: usize) -> Vec<DiskReport> {
        let mut queues: Vec<(String, Vec<(usize, DiskPlan)>)> = Vec::new();
        for (index, plan) in plans.iter().cloned().enumerate() {
            match queues.iter_mut().find(|(node, _)| *node == plan.node) {
                Some((_, queue)) => queue.push((index, plan)),
                None => queues.push((plan.node.clone(), vec![(index, plan)])),
            }
        }

        tracing::info!(nodes = queues.len(), workers, "running node queues");

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        for (node, queue) in queues {
            let orchestrator = self.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    tracing::error!(node = %node, "worker pool closed");
                    return Vec::new();
                };
                let mut done = Vec::with_capacity(queue.len());
                for (index, plan) in queue {
                    done.push((index, orchestrator.run_disk(&plan).await));
                }
                done
            });
        }

        let mut slots: Vec<Option<DiskReport>> = vec![None; plans.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(done) => {
                    for (index, report) in done {
                        slots[index] = Some(report);
                    }
                }
                Err(err) => tracing::error!(error = %err, "node queue aborted"),
            }
        }

        slots
            .into_iter()
            .zip(plans.iter())
            .map(|(slot, plan)| slot.unwrap_or_else(|| aborted(plan)))
            .collect()
    }

    /// Run one disk pipeline. Never fails, step failures land in the report.
    pub async fn run_disk(&self, plan: &DiskPlan) -> DiskReport {
        let unique_id = self.ctx.unique_id();
        let logical_id = plan.disk.logical_id();
        let started_at = Utc::now();

        println!("{}: Backing up {} {}", unique_id, plan.instance, logical_id);

        let (snapshot_create, _) = self.step(plan, &plan.create).await;
        let (transfer, snapshot_remove) = if snapshot_create.is_success() {
            let (transfer, timed_out) = self.step(plan, &plan.transfer).await;
            let snapshot_remove = if timed_out {
                // The node may still be reading the snapshot
                tracing::warn!(
                    node = %plan.node,
                    snapshot = %plan.snapshot,
                    "transfer timed out, leaving the snapshot in place"
                );
                StepStatus::Skipped
            } else {
                self.step(plan, &plan.remove).await.0
            };
            (transfer, snapshot_remove)
        } else {
            (StepStatus::Skipped, StepStatus::Skipped)
        };

        println!("{}: Done {} {}", unique_id, plan.instance, logical_id);
        println!("{}", rule());

        let report = DiskReport {
            instance: plan.instance.clone(),
            disk: logical_id,
            node: plan.node.clone(),
            snapshot: plan.snapshot.clone(),
            artifact: plan.artifact.clone(),
            snapshot_create,
            transfer,
            snapshot_remove,
            started_at,
            finished_at: Utc::now(),
        };

        if report.orphaned_snapshot() {
            tracing::error!(
                node = %report.node,
                snapshot = %report.snapshot,
                "snapshot could not be removed"
            );
        }
        report
    }

    /// Status of one step, and whether the local command timed out
    async fn step(&self, plan: &DiskPlan, invocation: &Invocation) -> (StepStatus, bool) {
        let result = self.runner.run(invocation).await;
        let timed_out = matches!(result, Err(ExecError::TimedOut { .. }));
        let status = StepStatus::from_result(&result);

        match &status {
            StepStatus::Succeeded => tracing::info!(
                step = invocation.label,
                instance = %plan.instance,
                disk = %plan.disk.logical_id(),
                node = %plan.node,
                "step succeeded"
            ),
            StepStatus::Failed { code, message } => tracing::warn!(
                step = invocation.label,
                instance = %plan.instance,
                disk = %plan.disk.logical_id(),
                node = %plan.node,
                code = ?code,
                message = %message,
                "step failed"
            ),
            StepStatus::Skipped => {}
        }
        (status, timed_out)
    }
}

fn aborted(plan: &DiskPlan) -> DiskReport {
    let now = Utc::now();
    DiskReport {
        instance: plan.instance.clone(),
        disk: plan.disk.logical_id(),
        node: plan.node.clone(),
        snapshot: plan.snapshot.clone(),
        artifact: plan.artifact.clone(),
        snapshot_create: StepStatus::failed("node queue aborted"),
        transfer: StepStatus::Skipped,
        snapshot_remove: StepStatus::Skipped,
        started_at: now,
        finished_at: now,
    }
}

/// Full run: inventory, every disk pipeline, then one prune.
///
/// Only an inventory failure is returned as an error, before any snapshot
/// is taken.
pub async fn run_backup(
    ctx: Arc<RunContext>,
    inventory: &dyn InventorySource,
    runner: Arc<dyn CommandRunner>,
) -> Result<BackupReport> {
    let instances = inventory
        .fetch(ctx.instance_names())
        .await
        .context("Failed to load instance inventory")?;

    let names: HashSet<&str> = instances.iter().map(|i| i.name.as_str()).collect();
    if names.len() != instances.len() {
        anyhow::bail!("inventory lists the same instance more than once");
    }

    let orchestrator = BackupOrchestrator::new(Arc::clone(&ctx), Arc::clone(&runner));
    let mut report = orchestrator.perform_backup(&instances).await;

    let pruner = RetentionPruner::new(ctx, runner);
    report.prune = Some(pruner.prune_old_artifacts().await);

    Ok(report)
}
