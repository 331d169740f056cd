/// CLI argument parsing
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::config::{Compression, RunContextBuilder};
use crate::utils::LogFormat;

// Build timestamp injected at compile time
pub const VERSION_WITH_BUILD: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (built: ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

#[derive(Debug, Parser)]
#[command(name = "ganeti-backup")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    /// Unique id to identify backups, default is date with hour
    #[arg(short = 'i', long = "id")]
    pub unique_id: Option<String>,

    /// Space separated list of instances to backup, default is all
    #[arg(short = 'n', long = "instances_names", num_args = 1..)]
    pub instances_names: Vec<String>,

    /// Backup retention period in days, default is 7
    #[arg(short = 'r', long = "retention_period")]
    pub retention_period: Option<u32>,

    /// Backup login and server ssh style: login@backup.server
    #[arg(short = 'b', long = "backup_user_server")]
    pub backup_user_server: Option<String>,

    /// LV backup snapshot extension to identify
    #[arg(short = 'l', long = "lv_backup_extension")]
    pub lv_backup_extension: Option<String>,

    /// Backup extension for files on the backup target
    #[arg(short = 'e', long = "backup_extension")]
    pub backup_extension: Option<String>,

    /// Folder on the backup target, default is ./upload/
    #[arg(short = 'f', long = "backup_folder")]
    pub backup_folder: Option<String>,

    /// JSON like {"egress": "| lz4 -1c |", "ingress": "lz4 -dc >"}
    #[arg(short = 'c', long = "compression", value_parser = parse_compression)]
    pub compression: Option<Compression>,

    /// Print the commands instead of running them
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Config file, default is ~/.config/ganeti-backup/config.toml
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of nodes backed up at the same time
    #[arg(long)]
    pub parallel_nodes: Option<usize>,

    /// Kill a single command after this long ("90m", "2h")
    #[arg(long, value_parser = humantime::parse_duration)]
    pub command_timeout: Option<Duration>,

    /// Write the run report as JSON to this file
    #[arg(long)]
    pub json_report: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Debug level logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// CLI layer of the run configuration. Apply before the file layer.
    pub fn apply(&self, mut builder: RunContextBuilder) -> RunContextBuilder {
        if let Some(id) = &self.unique_id {
            builder = builder.unique_id(id.as_str());
        }
        if !self.instances_names.is_empty() {
            builder = builder.instance_names(self.instances_names.clone());
        }
        if let Some(days) = self.retention_period {
            builder = builder.retention_days(days);
        }
        if let Some(login) = &self.backup_user_server {
            builder = builder.login(login.as_str());
        }
        if let Some(ext) = &self.lv_backup_extension {
            builder = builder.lv_backup_extension(ext.as_str());
        }
        if let Some(ext) = &self.backup_extension {
            builder = builder.backup_extension(ext.as_str());
        }
        if let Some(folder) = &self.backup_folder {
            builder = builder.backup_folder(folder.as_str());
        }
        if let Some(compression) = &self.compression {
            builder = builder.compression(compression.clone());
        }
        if let Some(count) = self.parallel_nodes {
            builder = builder.parallel_nodes(count);
        }
        if let Some(timeout) = self.command_timeout {
            builder = builder.command_timeout(timeout);
        }
        builder.debug(self.debug)
    }
}

fn parse_compression(raw: &str) -> Result<Compression, String> {
    serde_json::from_str(raw).map_err(|e| format!("expected {{\"egress\": ..., \"ingress\": ...}}: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RunContext;

    #[test]
    fn test_short_flags() {
        let cli = Cli::try_parse_from([
            "ganeti-backup",
            "-b",
            "bkp@host",
            "-i",
            "2024-01-01-00",
            "-r",
            "3",
            "-n",
            "vm1",
            "vm2",
            "-c",
            r#"{"egress": "| zstd -1 |", "ingress": "zstd -d >"}"#,
            "-d",
        ])
        .unwrap();

        let ctx = cli.apply(RunContext::builder()).build().unwrap();
        assert_eq!(ctx.unique_id(), "2024-01-01-00");
        assert_eq!(ctx.retention_days(), 3);
        assert_eq!(ctx.instance_names().unwrap(), ["vm1", "vm2"]);
        assert_eq!(ctx.compression().egress, "| zstd -1 |");
        assert!(ctx.debug());
    }

    #[test]
    fn test_compression_needs_both_directions() {
        let result = Cli::try_parse_from([
            "ganeti-backup",
            "-b",
            "bkp@host",
            "-c",
            r#"{"egress": "| lz4 -1c |"}"#,
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_retention_must_be_integer() {
        let result = Cli::try_parse_from(["ganeti-backup", "-b", "bkp@host", "-r", "seven"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_command_timeout() {
        let cli = Cli::try_parse_from([
            "ganeti-backup",
            "-b",
            "bkp@host",
            "--command-timeout",
            "90m",
            "--parallel-nodes",
            "2",
        ])
        .unwrap();

        assert_eq!(cli.command_timeout, Some(Duration::from_secs(5400)));
        assert_eq!(cli.parallel_nodes, Some(2));
    }
}
