// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

/// Error types for rEFInd configuration handling
#[derive(Error, Debug)]
pub enum RefindError {
    #[error("{}:{line}: {reason}", path.display())]
    Syntax {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("rEFInd configuration '{file_name}' not found under {}", esp.display())]
    ConfigNotFound { esp: PathBuf, file_name: String },

    #[error("Entry '{title}': {reason}")]
    InvalidEntry { title: String, reason: String },

    #[error("IO error for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RefindError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RefindError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for rEFInd operations
pub type Result<T> = std::result::Result<T, RefindError>;
