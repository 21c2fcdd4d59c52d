// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::sync::Arc;

use snapboot_refind::{BootConfig, BootMenuEntry};
use snapboot_types::{BlockDevice, PersistedState, RootSubvolume, Snapshot};

use super::Stage;
use crate::config::Config;
use crate::error::PipelineError;
use crate::persistence::{StateSession, StateStore};

/// Output of DiscoverBlockDevices
#[derive(Debug, Clone)]
pub struct DiscoveredDevices {
    pub devices: Vec<BlockDevice>,
    pub esp: BlockDevice,
    /// ESP mount point, re-anchored under the system root
    pub esp_mount: PathBuf,
    pub root_device: BlockDevice,
}

/// Output of ParseBootConfig
#[derive(Debug, Clone)]
pub struct ParsedBootConfig {
    pub root_config: PathBuf,
    pub config: BootConfig,
    pub template: BootMenuEntry,
}

/// Output of ReconcileAndWrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub written: bool,
    pub selected: usize,
    pub generation: u64,
    pub stanza_file: PathBuf,
}

/// Everything one run learns, stage by stage.
///
/// Created at the start of a run and dropped at its end. Holding the model
/// holds the persistence session, so no other run can load or commit state
/// while it exists.
pub struct PipelineModel {
    pub root: PathBuf,
    pub config: Arc<Config>,
    session: Box<dyn StateSession>,
    persisted: PersistedState,

    pub devices: Option<DiscoveredDevices>,
    pub root_subvolume: Option<RootSubvolume>,
    /// Snapshots of the root subvolume, oldest first
    pub snapshots: Option<Vec<Snapshot>>,
    pub boot_config: Option<ParsedBootConfig>,
    /// Selected snapshots, newest first
    pub selection: Option<Vec<Snapshot>>,
    pub outcome: Option<ReconcileOutcome>,
}

impl PipelineModel {
    pub fn new(
        root: PathBuf,
        config: Arc<Config>,
        store: &dyn StateStore,
    ) -> Result<Self, PipelineError> {
        let mut session = store
            .open_session()
            .map_err(|e| PipelineError::PersistenceWriteError(e.to_string()))?;
        let persisted = session
            .load()
            .map_err(|e| PipelineError::PersistenceWriteError(e.to_string()))?;

        tracing::debug!(
            generation = persisted.generation,
            selected = persisted.selection.len(),
            "loaded persisted state"
        );

        Ok(Self {
            root,
            config,
            session,
            persisted,
            devices: None,
            root_subvolume: None,
            snapshots: None,
            boot_config: None,
            selection: None,
            outcome: None,
        })
    }

    pub fn persisted(&self) -> &PersistedState {
        &self.persisted
    }

    /// Durably replace the persisted state.
    pub fn commit_state(&mut self, state: PersistedState) -> Result<(), PipelineError> {
        self.session
            .commit(&state)
            .map_err(|e| PipelineError::PersistenceWriteError(e.to_string()))?;
        self.persisted = state;
        Ok(())
    }

    /// The first field `stage` owns that is still unset.
    pub(crate) fn missing_output(&self, stage: Stage) -> Option<&'static str> {
        match stage {
            Stage::Initial | Stage::Final => None,
            Stage::DiscoverBlockDevices => self.devices.is_none().then_some("block devices"),
            Stage::ReadSnapshotMetadata => {
                if self.root_subvolume.is_none() {
                    Some("root subvolume")
                } else {
                    self.snapshots.is_none().then_some("snapshots")
                }
            }
            Stage::ParseBootConfig => self.boot_config.is_none().then_some("boot configuration"),
            Stage::SelectSnapshots => self.selection.is_none().then_some("snapshot selection"),
            Stage::ReconcileAndWrite => self.outcome.is_none().then_some("reconcile outcome"),
        }
    }

    fn incomplete(stage: Stage, missing: &'static str) -> PipelineError {
        PipelineError::StageIncomplete { stage, missing }
    }

    pub fn require_devices(&self) -> Result<&DiscoveredDevices, PipelineError> {
        self.devices
            .as_ref()
            .ok_or_else(|| Self::incomplete(Stage::DiscoverBlockDevices, "block devices"))
    }

    pub fn require_snapshots(&self) -> Result<&[Snapshot], PipelineError> {
        self.snapshots
            .as_deref()
            .ok_or_else(|| Self::incomplete(Stage::ReadSnapshotMetadata, "snapshots"))
    }

    pub fn require_boot_config(&self) -> Result<&ParsedBootConfig, PipelineError> {
        self.boot_config
            .as_ref()
            .ok_or_else(|| Self::incomplete(Stage::ParseBootConfig, "boot configuration"))
    }

    pub fn require_selection(&self) -> Result<&[Snapshot], PipelineError> {
        self.selection
            .as_deref()
            .ok_or_else(|| Self::incomplete(Stage::SelectSnapshots, "snapshot selection"))
    }

    pub fn require_outcome(&self) -> Result<&ReconcileOutcome, PipelineError> {
        self.outcome
            .as_ref()
            .ok_or_else(|| Self::incomplete(Stage::ReconcileAndWrite, "reconcile outcome"))
    }
}
