// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for snapboot
//!
//! Every collaborator returns these types and the sync pipeline consumes them:
//!
//! - **snapboot-sys**: enumerates [`BlockDevice`]s
//! - **snapboot-btrfs**: reads [`Snapshot`]s and the [`RootSubvolume`]
//! - **snapboot-service**: selects snapshots and persists [`PersistedState`]
//!
//! Instances are read-only views rebuilt on every run; only [`PersistedState`]
//! outlives a run.

pub mod block;
pub mod btrfs;
pub mod selection;

pub use block::{
    BTRFS_FS_TYPE, BlockDevice, ESP_FS_TYPE, ESP_PARTITION_CODE, ESP_PARTITION_GUID,
};
pub use btrfs::{RootSubvolume, Snapshot};
pub use selection::{
    PERSISTED_STATE_VERSION, PersistedState, SNAPSHOT_COUNT_UNBOUNDED, SnapshotCount, SnapshotKey,
    SubvolumeReference,
};
