// SPDX-License-Identifier: GPL-3.0-only

//! CLI wrapper around the snapshot reader for manual inspection

use anyhow::Result;
use clap::{Parser, Subcommand};
use snapboot_btrfs::{SnapshotSource, SubvolumeReader};
use std::path::PathBuf;

/// Inspect what snapboot sees on a BTRFS root
#[derive(Parser)]
#[command(name = "snapboot-btrfs-cli")]
#[command(about = "CLI tool for BTRFS snapshot metadata", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the subvolume mounted at a path
    Root {
        /// Mount point of the BTRFS filesystem
        mount_point: PathBuf,
    },
    /// List snapshots of the root subvolume below a directory
    Snapshots {
        /// Mount point of the BTRFS root filesystem
        mount_point: PathBuf,
        /// Directory to scan
        directory: PathBuf,
        /// Directory levels scanned below the directory
        #[arg(long, default_value_t = 2)]
        max_depth: usize,
    },
}

fn main() -> Result<()> {
    // Initialize tracing to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let reader = SubvolumeReader::new();

    match cli.command {
        Commands::Root { mount_point } => {
            let root = reader.root_subvolume(&mount_point)?;
            println!("{}", serde_json::to_string(&root)?);
        }
        Commands::Snapshots {
            mount_point,
            directory,
            max_depth,
        } => {
            let root = reader.root_subvolume(&mount_point)?;
            let mut snapshots: Vec<_> = reader
                .snapshots(&root, &directory, max_depth)?
                .into_iter()
                .filter(|snapshot| snapshot.is_snapshot_of(&root))
                .collect();
            snapshots.sort_by(|a, b| a.cmp_creation(b));
            println!("{}", serde_json::to_string(&snapshots)?);
        }
    }

    Ok(())
}
