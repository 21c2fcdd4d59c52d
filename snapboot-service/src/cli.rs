// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Debug, Parser)]
#[command(name = "snapboot")]
#[command(about = "Keep rEFInd boot stanzas in sync with btrfs root snapshots", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Operate on the system mounted at this directory
    #[arg(long, global = true, default_value = "/")]
    pub root: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Synchronize the boot stanzas once and exit
    Run,

    /// Synchronize now and again whenever snapshots are created or deleted
    Watch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        let cli = Cli::try_parse_from(["snapboot", "run"]).unwrap();
        assert_eq!(cli.command, Command::Run);
        assert_eq!(cli.config, PathBuf::from("/etc/snapboot.toml"));
        assert_eq!(cli.root, PathBuf::from("/"));
    }

    #[test]
    fn accepts_global_options_after_the_subcommand() {
        let cli = Cli::try_parse_from(["snapboot", "watch", "--root", "/mnt", "-c", "/tmp/s.toml"])
            .unwrap();
        assert_eq!(cli.command, Command::Watch);
        assert_eq!(cli.root, PathBuf::from("/mnt"));
        assert_eq!(cli.config, PathBuf::from("/tmp/s.toml"));
    }

    #[test]
    fn requires_a_subcommand() {
        let err = Cli::try_parse_from(["snapboot"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
