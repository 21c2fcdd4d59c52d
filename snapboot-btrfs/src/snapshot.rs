// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use btrfsutil::subvolume::Subvolume;
use serde::{Deserialize, Serialize};
use snapboot_types::{RootSubvolume, Snapshot};

use crate::error::{BtrfsError, Result};
use crate::list::{ListedSubvolume, list_subvolume_paths};

/// Inode number of every subvolume root directory.
const SUBVOLUME_ROOT_INO: u64 = 256;

/// Root item flag marking a read-only subvolume.
const ROOT_SUBVOL_RDONLY: u64 = 1 << 0;

/// Top-level subvolume id (`<FS_TREE>`).
const FS_TREE_ID: u64 = 5;

/// A directory scanned for snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSearch {
    /// Directory to scan, as an absolute path on the target system
    pub directory: PathBuf,

    /// How many directory levels below `directory` are scanned
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_max_depth() -> usize {
    2
}

/// Reads btrfs subvolume metadata.
pub trait SnapshotSource: Send + Sync {
    /// Identity of the subvolume mounted at `mount_point`.
    fn root_subvolume(&self, mount_point: &Path) -> Result<RootSubvolume>;

    /// Every subvolume found under `directory` (already re-anchored by the
    /// caller), in no particular order.
    fn snapshots(&self, root: &RootSubvolume, directory: &Path, max_depth: usize)
    -> Result<Vec<Snapshot>>;
}

/// [`SnapshotSource`] backed by btrfsutil and `btrfs subvolume list`
#[derive(Debug, Default, Clone)]
pub struct SubvolumeReader;

impl SubvolumeReader {
    pub fn new() -> Self {
        Self
    }
}

impl SnapshotSource for SubvolumeReader {
    fn root_subvolume(&self, mount_point: &Path) -> Result<RootSubvolume> {
        let subvol = Subvolume::try_from(mount_point).map_err(|e| {
            BtrfsError::NotMounted(format!("{}: {}", mount_point.display(), e))
        })?;

        let info = subvol.info().map_err(|e| {
            BtrfsError::OperationFailed(format!(
                "Failed to get subvolume info for {}: {}",
                mount_point.display(),
                e
            ))
        })?;

        let subvolume_path = if info.id == FS_TREE_ID {
            String::new()
        } else {
            list_subvolume_paths(mount_point)?
                .remove(&info.id)
                .map(|listed| listed.path)
                .ok_or_else(|| {
                    BtrfsError::SubvolumeNotFound(format!("root subvolume id {}", info.id))
                })?
        };

        Ok(RootSubvolume {
            id: info.id,
            uuid: info.uuid.to_string(),
            subvolume_path,
            mount_point: mount_point.to_path_buf(),
        })
    }

    fn snapshots(
        &self,
        root: &RootSubvolume,
        directory: &Path,
        max_depth: usize,
    ) -> Result<Vec<Snapshot>> {
        if !directory.is_dir() {
            return Err(BtrfsError::SearchDirectoryMissing(directory.to_path_buf()));
        }

        let candidates = find_subvolume_dirs(directory, max_depth, is_subvolume_root)?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let listed = list_subvolume_paths(&root.mount_point)?;
        let mut snapshots = Vec::with_capacity(candidates.len());

        for path in candidates {
            match read_snapshot(&path, &listed) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => tracing::warn!(path = %path.display(), "skipping subvolume: {}", e),
            }
        }

        Ok(snapshots)
    }
}

fn read_snapshot(path: &Path, listed: &HashMap<u64, ListedSubvolume>) -> Result<Snapshot> {
    let subvol = Subvolume::try_from(path)
        .map_err(|e| BtrfsError::SubvolumeNotFound(format!("{}: {}", path.display(), e)))?;

    let info = subvol.info().map_err(|e| {
        BtrfsError::OperationFailed(format!("Failed to get subvolume info: {}", e))
    })?;

    let subvolume_path = listed
        .get(&info.id)
        .map(|entry| entry.path.clone())
        .ok_or_else(|| {
            BtrfsError::SubvolumeNotFound(format!(
                "subvolume id {} missing from subvolume list",
                info.id
            ))
        })?;

    Ok(Snapshot {
        id: info.id,
        uuid: info.uuid.to_string(),
        parent_uuid: info.parent_uuid.map(|u| u.to_string()),
        created_at: info.otime.timestamp(),
        generation: info.otransid,
        path: path.to_path_buf(),
        subvolume_path,
        read_only: info.flags & ROOT_SUBVOL_RDONLY != 0,
    })
}

fn is_subvolume_root(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|metadata| metadata.is_dir() && metadata.ino() == SUBVOLUME_ROOT_INO)
        .unwrap_or(false)
}

/// Walk `directory` up to `max_depth` levels and collect subvolume roots.
///
/// `directory` itself is never reported and the walk does not descend into a
/// subvolume once found. Results are sorted by path.
pub fn find_subvolume_dirs(
    directory: &Path,
    max_depth: usize,
    is_subvolume: impl Fn(&Path) -> bool,
) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![(directory.to_path_buf(), 0usize)];

    while let Some((dir, depth)) = pending.pop() {
        if depth >= max_depth {
            continue;
        }

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let path = entry.path();
            if is_subvolume(&path) {
                found.push(path);
            } else {
                pending.push((path, depth + 1));
            }
        }
    }

    found.sort();
    Ok(found)
}
