// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Required tool not found: {0}")]
    ToolMissing(String),

    #[error("Command failed: {command}: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
