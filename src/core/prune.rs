/// Retention pruning of the backup repository
///
/// One `find ... -delete` over ssh, after every transfer of the run has
/// finished. Matches artifacts of all runs, not only the current one.
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::core::config::RunContext;
use crate::core::exec::{CommandRunner, CommandSpec, Invocation, ShellLine};
use crate::core::naming::{prune_glob, prune_regex};
use crate::core::report::{PruneOutcome, StepStatus};

const MINUTES_PER_DAY: u64 = 24 * 60;

/// Changed strictly before `now - retention_days`
pub fn is_expired(changed_at: DateTime<Utc>, now: DateTime<Utc>, retention_days: u32) -> bool {
    changed_at < retention_boundary(now, retention_days)
}

pub fn retention_boundary(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::days(i64::from(retention_days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `find` tests selecting artifact files of any run, and nothing else
pub fn name_filter(art_ext: &str) -> Vec<String> {
    vec![
        "-name".to_string(),
        prune_glob(art_ext),
        "-regextype".to_string(),
        "posix-extended".to_string(),
        "-regex".to_string(),
        prune_regex(art_ext),
    ]
}

pub struct RetentionPruner {
    ctx: Arc<RunContext>,
    runner: Arc<dyn CommandRunner>,
}

impl RetentionPruner {
    pub fn new(ctx: Arc<RunContext>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { ctx, runner }
    }

    /// `find <folder> -type f <name filter> -cmin +<minutes> -delete`
    ///
    /// `-cmin` instead of `-ctime`: `-ctime +7` would only match files eight
    /// or more days old. GNU find still drops the partial minute, so a file
    /// survives until it is a full minute past the boundary.
    pub fn command(ctx: &RunContext) -> Invocation {
        let minutes = u64::from(ctx.retention_days()) * MINUTES_PER_DAY;
        let find = CommandSpec::new("find")
            .arg(ctx.backup_folder())
            .args(["-type", "f"])
            .args(name_filter(ctx.backup_extension()))
            .arg("-cmin")
            .arg(format!("+{}", minutes))
            .arg("-delete");

        Invocation::on_repository("prune", ShellLine::from(&find))
    }

    pub async fn prune_old_artifacts(&self) -> PruneOutcome {
        let boundary = retention_boundary(Utc::now(), self.ctx.retention_days());
        tracing::info!(
            folder = self.ctx.backup_folder(),
            boundary = %boundary,
            "pruning old backups"
        );

        let result = self.runner.run(&Self::command(&self.ctx)).await;
        let status = StepStatus::from_result(&result);

        match &status {
            StepStatus::Failed { code, message } => {
                tracing::error!(code = ?code, message = %message, "pruning old backups failed")
            }
            _ => println!("Done cleaning old backups"),
        }
        println!("{}", crate::utils::rule());

        PruneOutcome { status, boundary }
    }
}
