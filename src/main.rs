use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;

use ganeti_backup::cli::Cli;
use ganeti_backup::core::{
    pipeline_runner, run_backup, CommandRunner, GanetiInventory, ProcessRunner, RunContext,
};
use ganeti_backup::utils::{init_logging, AppConfig, EXIT_FATAL};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_format, cli.verbose) {
        eprintln!("{} {:#}", "✗".red(), e);
        return ExitCode::from(EXIT_FATAL);
    }

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "backup run aborted");
            eprintln!("{} {:#}", "✗".red(), e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let file = AppConfig::load(cli.config.as_deref())?;
    let ctx = cli
        .apply(RunContext::builder())
        .with_file(&file, file.command_timeout()?)
        .build()
        .context("Invalid configuration")?;
    let ctx = Arc::new(ctx);

    tracing::info!(
        unique_id = ctx.unique_id(),
        repository = %ctx.login(),
        folder = ctx.backup_folder(),
        retention_days = ctx.retention_days(),
        debug = ctx.debug(),
        "starting backup run"
    );

    // Inventory is read-only and is queried for real even in debug mode
    let process_runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new(Arc::clone(&ctx)));
    let inventory = GanetiInventory::new(Arc::clone(&process_runner));

    let runner = pipeline_runner(&ctx, process_runner);

    let report = run_backup(Arc::clone(&ctx), &inventory, runner).await?;

    report.print_summary();
    if let Some(path) = &cli.json_report {
        report.write_json(path)?;
        println!("Report written to {}", path.display());
    }

    Ok(report.exit_code())
}
