// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

use crate::pipeline::Stage;

/// Process exit code for a failed run or startup error
pub const EXIT_FAILURE: u8 = 1;

/// Process exit code after an operator interrupt
pub const EXIT_INTERRUPTED: u8 = 130;

/// Why a synchronization run ended before `Final` was reached normally
///
/// Every variant is fatal for the run it occurred in; the next run starts from scratch.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Snapshot metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("Boot configuration parse error: {0}")]
    ConfigParseError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Persistence write error: {0}")]
    PersistenceWriteError(String),

    #[error("Interrupted by operator")]
    InterruptedByOperator,

    #[error("Stage {stage} finished without producing {missing}")]
    StageIncomplete { stage: Stage, missing: &'static str },
}

impl PipelineError {
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::InterruptedByOperator => EXIT_INTERRUPTED,
            _ => EXIT_FAILURE,
        }
    }

    /// Short machine-friendly name, used in logs and service status lines.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::DeviceNotFound(_) => "DeviceNotFound",
            PipelineError::MetadataUnavailable(_) => "MetadataUnavailable",
            PipelineError::ConfigParseError(_) => "ConfigParseError",
            PipelineError::ConfigurationError(_) => "ConfigurationError",
            PipelineError::PersistenceWriteError(_) => "PersistenceWriteError",
            PipelineError::InterruptedByOperator => "InterruptedByOperator",
            PipelineError::StageIncomplete { .. } => "StageIncomplete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_errors_to_exit_codes() {
        assert_eq!(PipelineError::InterruptedByOperator.exit_code(), 130);
        assert_eq!(PipelineError::DeviceNotFound("esp".into()).exit_code(), 1);
        assert_eq!(
            PipelineError::StageIncomplete {
                stage: Stage::SelectSnapshots,
                missing: "snapshot selection"
            }
            .to_string(),
            "Stage SelectSnapshots finished without producing snapshot selection"
        );
    }
}
