/// Defaults and fixed command fragments for backup runs
///
/// Every default here can be overridden from the config file or the CLI.

/// Format of the default run identifier (date with hour)
pub const DEFAULT_UNIQUE_ID_FORMAT: &str = "%Y-%m-%d-%H";

/// Days a backup artifact is kept before pruning
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

/// Repository folder the artifacts land in
pub const DEFAULT_BACKUP_FOLDER: &str = "./upload/";

/// Suffix of the transient LV snapshot
pub const DEFAULT_LV_BACKUP_EXTENSION: &str = "bak";

/// Suffix of the artifact files in the repository
pub const DEFAULT_BACKUP_EXTENSION: &str = "raw";

/// Compression applied on the node, piped into ssh. Keep the pipes.
pub const DEFAULT_COMPRESSION_EGRESS: &str = "| lz4 -1c |";

/// Decompression on the repository host, redirected into the artifact file
pub const DEFAULT_COMPRESSION_INGRESS: &str = "lz4 -dc >";

/// Copy-on-write space reserved for each snapshot
pub const DEFAULT_SNAPSHOT_SIZE: &str = "1G";

/// dd block size used to read the snapshot device
pub const DEFAULT_BLOCK_SIZE: &str = "128M";

/// Options passed to every ssh invocation towards the repository
pub const DEFAULT_SSH_OPTIONS: &[&str] = &["-oStrictHostKeyChecking=no"];

/// Node queues running at the same time (1 = fully sequential)
pub const DEFAULT_PARALLEL_NODES: usize = 1;

/// Separator between the fields of snapshot and artifact names
pub const NAME_SEPARATOR: char = '.';

/// Replacement for separators found inside artifact name fields
pub const NAME_SEPARATOR_REPLACEMENT: char = '_';

/// Ganeti command used to list instances
pub const GNT_INSTANCE: &str = "gnt-instance";

/// Ganeti command used to run a command on a cluster node
pub const GNT_CLUSTER: &str = "gnt-cluster";

/// Width of the progress rule printed after each disk
pub const RULE_WIDTH: usize = 100;

/// Process exit status when at least one disk failed
pub const EXIT_DISK_FAILURE: u8 = 1;

/// Process exit status for configuration or inventory errors
pub const EXIT_FATAL: u8 = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_compression_keeps_pipes() {
        assert!(DEFAULT_COMPRESSION_EGRESS.trim().starts_with('|'));
        assert!(DEFAULT_COMPRESSION_EGRESS.trim().ends_with('|'));
        assert!(DEFAULT_COMPRESSION_INGRESS.trim().ends_with('>'));
    }

    #[test]
    fn test_default_extensions_have_no_separator() {
        assert!(!DEFAULT_LV_BACKUP_EXTENSION.contains(NAME_SEPARATOR));
        assert!(!DEFAULT_BACKUP_EXTENSION.contains(NAME_SEPARATOR));
    }
}
