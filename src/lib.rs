//! Snapshot-and-stream backups of Ganeti instance volumes.
//!
//! For every disk of every selected instance: LVM snapshot on the primary
//! node, compressed `dd` stream over ssh into the backup repository,
//! snapshot removal. Old artifacts are pruned once all transfers are done.

pub mod cli;
pub mod core;
pub mod utils;
