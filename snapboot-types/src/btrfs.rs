// SPDX-License-Identifier: GPL-3.0-only

use std::cmp::Ordering;
use std::path::PathBuf;

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::selection::SnapshotKey;

/// The subvolume currently mounted as the root filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSubvolume {
    pub id: u64,
    pub uuid: String,
    /// Path relative to the filesystem tree (e.g., "@")
    pub subvolume_path: String,
    pub mount_point: PathBuf,
}

/// A copy-on-write snapshot of the root subvolume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: u64,
    pub uuid: String,
    pub parent_uuid: Option<String>,
    pub created_at: i64, // Unix timestamp (otime)
    pub generation: u64, // otransid
    /// Where the snapshot is reachable on the running system
    pub path: PathBuf,
    /// Path relative to the filesystem tree, as used by `subvol=`
    pub subvolume_path: String,
    pub read_only: bool,
}

impl Snapshot {
    /// Stable identity used by persisted state.
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey {
            id: self.id,
            uuid: self.uuid.clone(),
            path: self.subvolume_path.clone(),
        }
    }

    /// Creation order: timestamp first, subvolume id on ties.
    pub fn cmp_creation(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Human readable label used in generated menu titles.
    pub fn display_name(&self) -> String {
        match DateTime::from_timestamp(self.created_at, 0) {
            Some(created) => format!("{} #{}", created.format("%Y-%m-%d %H:%M:%S"), self.id),
            None => format!("#{}", self.id),
        }
    }

    pub fn is_snapshot_of(&self, root: &RootSubvolume) -> bool {
        self.parent_uuid
            .as_deref()
            .is_some_and(|parent| parent.eq_ignore_ascii_case(&root.uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: u64, created_at: i64) -> Snapshot {
        Snapshot {
            id,
            uuid: format!("uuid-{id}"),
            parent_uuid: Some("root-uuid".to_string()),
            created_at,
            generation: id * 10,
            path: PathBuf::from(format!("/.snapshots/{id}/snapshot")),
            subvolume_path: format!("@snapshots/{id}/snapshot"),
            read_only: true,
        }
    }

    #[test]
    fn creation_order_breaks_ties_by_id() {
        let mut items = vec![snapshot(9, 100), snapshot(3, 100), snapshot(5, 50)];
        items.sort_by(Snapshot::cmp_creation);
        let ids: Vec<u64> = items.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![5, 3, 9]);
    }

    #[test]
    fn display_name_uses_utc_creation_time() {
        assert_eq!(snapshot(7, 0).display_name(), "1970-01-01 00:00:00 #7");
    }

    #[test]
    fn recognises_parent_root() {
        let root = RootSubvolume {
            id: 256,
            uuid: "ROOT-UUID".to_string(),
            subvolume_path: "@".to_string(),
            mount_point: PathBuf::from("/"),
        };
        assert!(snapshot(1, 1).is_snapshot_of(&root));
    }
}
