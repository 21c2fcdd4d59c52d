// SPDX-License-Identifier: GPL-3.0-only

//! Composition root: builds the concrete collaborators once and hands them
//! to the pipeline as trait objects.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use snapboot_btrfs::{SnapshotSource, SubvolumeReader};
use snapboot_refind::{BootConfigStore, FileConfigStore};
use snapboot_sys::{BlockDeviceSource, LsblkSource, rebase};

use crate::config::Config;
use crate::error::PipelineError;
use crate::persistence::{FileStateStore, StateStore};
use crate::pipeline::{SyncMachine, stages};
use crate::runner::WatchTarget;

/// The system-facing implementations the pipeline talks to
#[derive(Clone)]
pub struct Collaborators {
    pub block_devices: Arc<dyn BlockDeviceSource>,
    pub snapshots: Arc<dyn SnapshotSource>,
    pub boot_config: Arc<dyn BootConfigStore>,
    pub state: Arc<dyn StateStore>,
}

impl Collaborators {
    /// Real implementations operating on the system at `root`.
    pub fn system(root: &Path) -> Self {
        Self {
            block_devices: Arc::new(LsblkSource::new(root)),
            snapshots: Arc::new(SubvolumeReader::new()),
            boot_config: Arc::new(FileConfigStore::new()),
            state: Arc::new(FileStateStore::under_root(root)),
        }
    }
}

pub fn build_machine(
    config: Arc<Config>,
    root: PathBuf,
    collaborators: Collaborators,
) -> Result<SyncMachine, PipelineError> {
    let handlers = stages::pipeline(
        collaborators.block_devices,
        collaborators.snapshots,
        collaborators.boot_config,
    );

    SyncMachine::new(root, config, collaborators.state, handlers)
}

/// Directories the continuous runner observes, re-anchored under `root`.
pub fn watch_targets(config: &Config, root: &Path) -> Vec<WatchTarget> {
    let mut targets: Vec<WatchTarget> = Vec::new();

    for search in &config.snapshot_search {
        let directory = rebase(root, &search.directory);
        let recursive = search.max_depth > 1;

        match targets.iter_mut().find(|target| target.directory == directory) {
            Some(existing) => existing.recursive |= recursive,
            None => targets.push(WatchTarget {
                directory,
                recursive,
            }),
        }
    }

    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_targets_follow_search_depth() {
        let config = Config::from_toml(
            r#"
[[snapshot_search]]
directory = "/.snapshots"
max_depth = 1

[[snapshot_search]]
directory = "/.snapshots"
max_depth = 3

[[snapshot_search]]
directory = "/home/.snapshots"
max_depth = 1

[boot_stanza_generation]
template_entry = "Arch Linux"
"#,
        )
        .unwrap();

        let targets = watch_targets(&config, Path::new("/mnt"));
        assert_eq!(
            targets,
            vec![
                WatchTarget {
                    directory: PathBuf::from("/mnt/.snapshots"),
                    recursive: true
                },
                WatchTarget {
                    directory: PathBuf::from("/mnt/home/.snapshots"),
                    recursive: false
                },
            ]
        );
    }

    #[test]
    fn system_collaborators_build_a_machine() {
        let config = Config::from_toml(
            "[[snapshot_search]]\ndirectory = \"/.snapshots\"\n[boot_stanza_generation]\ntemplate_entry = \"L\"\n",
        )
        .unwrap();
        let root = PathBuf::from("/");

        let machine = build_machine(Arc::new(config), root.clone(), Collaborators::system(&root));
        assert!(machine.is_ok());
    }
}
