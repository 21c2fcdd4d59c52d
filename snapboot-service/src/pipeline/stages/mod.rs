// SPDX-License-Identifier: GPL-3.0-only

mod bootconf;
mod discover;
mod metadata;
mod reconcile;
mod select;

use std::sync::Arc;

use snapboot_btrfs::SnapshotSource;
use snapboot_refind::BootConfigStore;
use snapboot_sys::BlockDeviceSource;

pub use bootconf::ParseBootConfig;
pub use discover::{DiscoverBlockDevices, select_esp};
pub use metadata::ReadSnapshotMetadata;
pub use reconcile::{ReconcileAndWrite, SelectionDiff, derive_entry};
pub use select::{SelectSnapshots, select_snapshots};

use super::StageHandler;

/// The five handlers in pipeline order.
pub fn pipeline(
    block_devices: Arc<dyn BlockDeviceSource>,
    snapshots: Arc<dyn SnapshotSource>,
    boot_config: Arc<dyn BootConfigStore>,
) -> Vec<Box<dyn StageHandler>> {
    vec![
        Box::new(DiscoverBlockDevices::new(block_devices)),
        Box::new(ReadSnapshotMetadata::new(snapshots)),
        Box::new(ParseBootConfig::new(boot_config.clone())),
        Box::new(SelectSnapshots),
        Box::new(ReconcileAndWrite::new(boot_config)),
    ]
}
