use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use ganeti_backup::core::exec::{CommandOutput, ExecError, Invocation};
use ganeti_backup::core::{
    run_backup, CommandRunner, Compression, Disk, DryRunRunner, Instance, RunContext,
    StaticInventory, StepStatus,
};
use ganeti_backup::utils::shell_quote;

/// Records step labels, fails the invocations whose label is in `fail`
struct RecordingRunner {
    fail: Vec<(&'static str, usize)>,
    calls: Mutex<Vec<&'static str>>,
}

impl RecordingRunner {
    fn new(fail: Vec<(&'static str, usize)>) -> Self {
        Self {
            fail,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(invocation.label);
        // nth call with this label, 1-based
        let nth = calls.iter().filter(|l| **l == invocation.label).count();

        if self.fail.contains(&(invocation.label, nth)) {
            Ok(CommandOutput::failure(1, format!("{} failed", invocation.label)))
        } else {
            Ok(CommandOutput::success_with(""))
        }
    }
}

fn scenario_ctx(debug: bool) -> Arc<RunContext> {
    Arc::new(
        RunContext::builder()
            .unique_id("2024-01-01-00")
            .retention_days(7)
            .login("bkp@host")
            .compression(Compression {
                egress: "| lz4 -1c |".to_string(),
                ingress: "lz4 -dc >".to_string(),
            })
            .debug(debug)
            .build()
            .unwrap(),
    )
}

fn instance(name: &str, node: &str, lvs: &[&str]) -> Instance {
    Instance {
        name: name.to_string(),
        primary_node: node.to_string(),
        disks: lvs
            .iter()
            .map(|lv| Disk {
                vg: "vg0".to_string(),
                lv: lv.to_string(),
                device_path: format!("/dev/vg0/{}", lv),
            })
            .collect(),
    }
}

#[tokio::test]
async fn end_to_end_single_disk_in_debug_mode() {
    let ctx = scenario_ctx(true);
    let runner = Arc::new(DryRunRunner::new(Arc::clone(&ctx)));
    let inventory = StaticInventory::new(vec![instance("vm1", "node1", &["lv0"])]);

    let report = run_backup(Arc::clone(&ctx), &inventory, runner.clone())
        .await
        .unwrap();

    let transfer = "dd if=/dev/vg0/lv0.2024-01-01-00.bak bs=128M | lz4 -1c | \
                    ssh -oStrictHostKeyChecking=no bkp@host \
                    'lz4 -dc > ./upload/2024-01-01-00.lv0.vm1.node1.raw'";
    let prune = "find ./upload/ -type f -name '*.*.*.*.raw' -regextype posix-extended \
                 -regex '.*/([^./]+)\\.([^./]+)\\.([^./]+)\\.([^./]+)\\.raw' \
                 -cmin +10080 -delete";

    assert_eq!(
        runner.recorded(),
        [
            "gnt-cluster command -n node1 \
             'lvcreate -L1G -s -n lv0.2024-01-01-00.bak /dev/vg0/lv0'"
                .to_string(),
            format!(
                "gnt-cluster command -n node1 {}",
                shell_quote(&format!("bash -o pipefail -c {}", shell_quote(transfer)))
            ),
            "gnt-cluster command -n node1 'lvremove -f vg0/lv0.2024-01-01-00.bak'".to_string(),
            format!("ssh -oStrictHostKeyChecking=no bkp@host {}", shell_quote(prune)),
        ]
    );

    assert!(report.debug);
    assert_eq!(report.disks.len(), 1);
    assert_eq!(report.disks[0].snapshot, "lv0.2024-01-01-00.bak");
    assert_eq!(report.disks[0].artifact, "2024-01-01-00.lv0.vm1.node1.raw");
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn every_disk_runs_three_steps_then_one_prune() {
    let ctx = scenario_ctx(false);
    let runner = Arc::new(RecordingRunner::new(vec![]));
    let inventory = StaticInventory::new(vec![
        instance("vm1", "node1", &["lv0", "lv1"]),
        instance("vm2", "node2", &["lv2", "lv3"]),
        instance("vm3", "node1", &["lv4", "lv5"]),
    ]);

    let report = run_backup(ctx, &inventory, runner.clone()).await.unwrap();

    let mut expected = ["snapshot_create", "transfer", "snapshot_remove"].repeat(6);
    expected.push("prune");
    assert_eq!(runner.calls(), expected);
    assert!(report.all_succeeded());
    assert_eq!(report.prune.unwrap().status, StepStatus::Succeeded);
}

#[tokio::test]
async fn failed_transfer_is_isolated_to_its_disk() {
    let ctx = scenario_ctx(false);
    let runner = Arc::new(RecordingRunner::new(vec![("transfer", 1)]));
    let inventory = StaticInventory::new(vec![
        instance("vm1", "node1", &["lv0"]),
        instance("vm2", "node2", &["lv1"]),
    ]);

    let report = run_backup(ctx, &inventory, runner.clone()).await.unwrap();

    assert_eq!(
        runner.calls(),
        [
            "snapshot_create",
            "transfer",
            "snapshot_remove",
            "snapshot_create",
            "transfer",
            "snapshot_remove",
            "prune",
        ]
    );
    assert!(report.disks[0].transfer.is_failure());
    assert!(report.disks[0].snapshot_remove.is_success());
    assert!(report.disks[1].succeeded());
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn unknown_instance_aborts_before_any_snapshot() {
    let ctx = Arc::new(
        RunContext::builder()
            .login("bkp@host")
            .instance_names(vec!["ghost".to_string()])
            .build()
            .unwrap(),
    );
    let runner = Arc::new(RecordingRunner::new(vec![]));
    let inventory = StaticInventory::new(vec![instance("vm1", "node1", &["lv0"])]);

    let result = run_backup(ctx, &inventory, runner.clone()).await;

    assert!(result.is_err());
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn folder_without_trailing_slash_keeps_artifacts_inside() {
    let ctx = Arc::new(
        RunContext::builder()
            .unique_id("r1")
            .login("bkp@host")
            .backup_folder("/srv/backups")
            .debug(true)
            .build()
            .unwrap(),
    );
    let runner = Arc::new(DryRunRunner::new(Arc::clone(&ctx)));
    let inventory = StaticInventory::new(vec![instance("vm1", "node1", &["lv0"])]);

    run_backup(Arc::clone(&ctx), &inventory, runner.clone())
        .await
        .unwrap();

    let recorded = runner.recorded();
    assert!(recorded[1].contains("/srv/backups/r1.lv0.vm1.node1.raw"), "{}", recorded[1]);
    assert!(recorded[3].contains("find /srv/backups/ "), "{}", recorded[3]);
}
