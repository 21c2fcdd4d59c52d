// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashSet;
use std::sync::Arc;

use snapboot_btrfs::SnapshotSource;
use snapboot_sys::rebase;
use snapboot_types::Snapshot;

use crate::error::PipelineError;
use crate::pipeline::{PipelineModel, Stage, StageHandler};

/// Reads the root subvolume and every snapshot of it below the search directories.
pub struct ReadSnapshotMetadata {
    source: Arc<dyn SnapshotSource>,
}

impl ReadSnapshotMetadata {
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self { source }
    }
}

impl StageHandler for ReadSnapshotMetadata {
    fn stage(&self) -> Stage {
        Stage::ReadSnapshotMetadata
    }

    fn run(&self, model: &mut PipelineModel) -> Result<(), PipelineError> {
        let root_device = &model.require_devices()?.root_device;
        if !root_device.is_btrfs() {
            return Err(PipelineError::MetadataUnavailable(format!(
                "root device {} is {}, not btrfs",
                root_device.path,
                root_device.fs_type.as_deref().unwrap_or("unformatted")
            )));
        }

        let root_mount = rebase(&model.root, "/");
        let root = self
            .source
            .root_subvolume(&root_mount)
            .map_err(|e| PipelineError::MetadataUnavailable(e.to_string()))?;

        let mut seen = HashSet::new();
        let mut snapshots: Vec<Snapshot> = Vec::new();

        for search in &model.config.snapshot_search {
            let directory = rebase(&model.root, &search.directory);
            let found = self
                .source
                .snapshots(&root, &directory, search.max_depth)
                .map_err(|e| PipelineError::MetadataUnavailable(e.to_string()))?;

            for snapshot in found {
                if !snapshot.is_snapshot_of(&root) {
                    tracing::debug!(
                        path = %snapshot.path.display(),
                        "subvolume is not a snapshot of the root subvolume, skipping"
                    );
                    continue;
                }
                if seen.insert(snapshot.id) {
                    snapshots.push(snapshot);
                }
            }
        }

        snapshots.sort_by(Snapshot::cmp_creation);

        tracing::info!(
            root_subvolume = %root.subvolume_path,
            count = snapshots.len(),
            "snapshot metadata read"
        );

        model.root_subvolume = Some(root);
        model.snapshots = Some(snapshots);
        Ok(())
    }
}
