pub mod backup;
pub mod config;
pub mod exec;
pub mod inventory;
pub mod naming;
pub mod prune;
pub mod report;

pub use backup::{node_pipeline, run_backup, BackupOrchestrator, DiskPlan};
pub use config::{Compression, ConfigError, RepositoryLogin, RunContext, RunContextBuilder};
pub use exec::{
    pipeline_runner, CommandOutput, CommandRunner, DryRunRunner, ExecError, Invocation,
    ProcessRunner,
};
pub use inventory::{Disk, GanetiInventory, Instance, InventorySource, StaticInventory};
pub use prune::RetentionPruner;
pub use report::{BackupReport, DiskReport, PruneOutcome, StepStatus};
