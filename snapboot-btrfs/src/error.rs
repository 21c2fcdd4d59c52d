// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

/// Error types for BTRFS metadata queries
#[derive(Error, Debug)]
pub enum BtrfsError {
    #[error("Subvolume not found: {0}")]
    SubvolumeNotFound(String),

    #[error("Not a mounted BTRFS filesystem: {0}")]
    NotMounted(String),

    #[error("Snapshot directory does not exist: {}", .0.display())]
    SearchDirectoryMissing(PathBuf),

    #[error("BTRFS operation failed: {0}")]
    OperationFailed(String),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for BTRFS operations
pub type Result<T> = std::result::Result<T, BtrfsError>;
