// SPDX-License-Identifier: GPL-3.0-only

//! Block device model and boot partition identification

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// MBR partition type code of an EFI System Partition.
pub const ESP_PARTITION_CODE: u8 = 0xEF;

/// GPT partition type GUID of an EFI System Partition.
pub const ESP_PARTITION_GUID: &str = "c12a7328-f81f-11d2-ba4b-00a0c93ec93b";

/// Filesystem type an EFI System Partition is formatted with.
pub const ESP_FS_TYPE: &str = "vfat";

/// Filesystem type the root device must carry for snapshot discovery.
pub const BTRFS_FS_TYPE: &str = "btrfs";

/// A physical or partition block device as reported by the system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    /// Kernel name (e.g., "nvme0n1p1")
    pub name: String,

    /// Device path (e.g., "/dev/nvme0n1p1")
    pub path: String,

    /// Filesystem type (e.g., "vfat", "btrfs")
    pub fs_type: Option<String>,

    /// Partition type: a GUID on GPT disks, a hex code ("0xef") on MBR disks
    pub part_type: Option<String>,

    /// Filesystem UUID
    pub uuid: Option<String>,

    /// Partition UUID
    pub part_uuid: Option<String>,

    /// Filesystem label
    pub label: Option<String>,

    /// Current mount points (empty if not mounted)
    pub mount_points: Vec<String>,
}

impl BlockDevice {
    /// Whether this device is an EFI System Partition.
    ///
    /// Matches the `vfat` filesystem type together with either the GPT type
    /// GUID or the MBR type code.
    pub fn is_esp(&self) -> bool {
        if self.fs_type.as_deref() != Some(ESP_FS_TYPE) {
            return false;
        }

        let Some(part_type) = self.part_type.as_deref().map(str::trim) else {
            return false;
        };

        if let Ok(guid) = Uuid::parse_str(part_type) {
            return Uuid::parse_str(ESP_PARTITION_GUID).is_ok_and(|esp| esp == guid);
        }

        let code = part_type
            .strip_prefix("0x")
            .or_else(|| part_type.strip_prefix("0X"))
            .unwrap_or(part_type);

        u8::from_str_radix(code, 16).is_ok_and(|code| code == ESP_PARTITION_CODE)
    }

    /// Whether this device is mounted at `mount_point`.
    pub fn is_mounted_at(&self, mount_point: &str) -> bool {
        self.mount_points.iter().any(|mp| mp == mount_point)
    }

    pub fn is_btrfs(&self) -> bool {
        self.fs_type.as_deref() == Some(BTRFS_FS_TYPE)
    }

    /// Whether an fstab/crypttab style source spec refers to this device.
    ///
    /// Understands `UUID=`, `PARTUUID=`, `LABEL=` and plain device paths.
    pub fn matches_source(&self, source: &str) -> bool {
        let eq = |expected: &Option<String>, value: &str| {
            expected
                .as_deref()
                .is_some_and(|expected| expected.eq_ignore_ascii_case(value))
        };

        if let Some(value) = source.strip_prefix("UUID=") {
            eq(&self.uuid, value)
        } else if let Some(value) = source.strip_prefix("PARTUUID=") {
            eq(&self.part_uuid, value)
        } else if let Some(value) = source.strip_prefix("LABEL=") {
            self.label.as_deref() == Some(value)
        } else {
            source == self.path
        }
    }

    /// Whether `id` names this device by filesystem UUID or partition UUID.
    pub fn has_identifier(&self, id: &str) -> bool {
        [&self.uuid, &self.part_uuid]
            .into_iter()
            .flatten()
            .any(|value| value.eq_ignore_ascii_case(id))
    }
}
