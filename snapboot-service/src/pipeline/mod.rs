// SPDX-License-Identifier: GPL-3.0-only

//! The synchronization pipeline
//!
//! `Initial → DiscoverBlockDevices → ReadSnapshotMetadata → ParseBootConfig →
//! SelectSnapshots → ReconcileAndWrite → Final`, strictly in that order.

mod machine;
mod model;
pub mod stages;

use std::fmt;

pub use machine::{RunReport, StageHandler, SyncMachine};
pub use model::{DiscoveredDevices, ParsedBootConfig, PipelineModel, ReconcileOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Initial,
    DiscoverBlockDevices,
    ReadSnapshotMetadata,
    ParseBootConfig,
    SelectSnapshots,
    ReconcileAndWrite,
    Final,
}

impl Stage {
    /// The stages that have a handler, in execution order.
    pub const PIPELINE: [Stage; 5] = [
        Stage::DiscoverBlockDevices,
        Stage::ReadSnapshotMetadata,
        Stage::ParseBootConfig,
        Stage::SelectSnapshots,
        Stage::ReconcileAndWrite,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Initial => "Initial",
            Stage::DiscoverBlockDevices => "DiscoverBlockDevices",
            Stage::ReadSnapshotMetadata => "ReadSnapshotMetadata",
            Stage::ParseBootConfig => "ParseBootConfig",
            Stage::SelectSnapshots => "SelectSnapshots",
            Stage::ReconcileAndWrite => "ReconcileAndWrite",
            Stage::Final => "Final",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
