// SPDX-License-Identifier: GPL-3.0-only

//! BTRFS snapshot metadata for snapboot
//!
//! Reads the identity of the mounted root subvolume and enumerates the
//! snapshots of it found below the configured search directories.

pub mod error;
pub mod list;
pub mod snapshot;

// Re-export commonly used types
pub use error::{BtrfsError, Result};
pub use list::{ListedSubvolume, parse_subvolume_list};
pub use snapshot::{SnapshotSearch, SnapshotSource, SubvolumeReader};

// Re-export shared models
pub use snapboot_types::{RootSubvolume, Snapshot};
