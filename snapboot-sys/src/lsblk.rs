// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::process::Command;

use serde::Deserialize;
use snapboot_types::BlockDevice;

use crate::fstab::{FstabEntry, read_fstab};
use crate::{Result, SysError};

const LSBLK_COLUMNS: &str = "NAME,PATH,FSTYPE,PARTTYPE,UUID,PARTUUID,LABEL,MOUNTPOINTS";

/// Enumerates block devices and the static mount table.
pub trait BlockDeviceSource: Send + Sync {
    fn block_devices(&self) -> Result<Vec<BlockDevice>>;

    fn mount_table(&self) -> Result<Vec<FstabEntry>>;
}

/// [`BlockDeviceSource`] backed by `lsblk` and the fstab under `root`
#[derive(Debug, Clone)]
pub struct LsblkSource {
    root: PathBuf,
}

impl LsblkSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl BlockDeviceSource for LsblkSource {
    fn block_devices(&self) -> Result<Vec<BlockDevice>> {
        if which::which("lsblk").is_err() {
            return Err(SysError::ToolMissing("lsblk".to_string()));
        }

        let output = run_capture(
            "lsblk",
            &["--json", "--list", "--output", LSBLK_COLUMNS],
        )?;
        let devices = parse_lsblk_json(&output)?;
        tracing::debug!(count = devices.len(), "enumerated block devices");
        Ok(devices)
    }

    fn mount_table(&self) -> Result<Vec<FstabEntry>> {
        read_fstab(&self.root)
    }
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    path: Option<String>,
    fstype: Option<String>,
    parttype: Option<String>,
    uuid: Option<String>,
    partuuid: Option<String>,
    label: Option<String>,
    #[serde(default)]
    mountpoints: Vec<Option<String>>,
    // Older util-linux only reports a single mount point
    #[serde(default)]
    mountpoint: Option<String>,
}

impl From<LsblkDevice> for BlockDevice {
    fn from(device: LsblkDevice) -> Self {
        let mut mount_points: Vec<String> = device.mountpoints.into_iter().flatten().collect();
        if let Some(single) = device.mountpoint
            && !mount_points.contains(&single)
        {
            mount_points.push(single);
        }

        BlockDevice {
            path: device
                .path
                .unwrap_or_else(|| format!("/dev/{}", device.name)),
            name: device.name,
            fs_type: device.fstype,
            part_type: device.parttype,
            uuid: device.uuid,
            part_uuid: device.partuuid,
            label: device.label,
            mount_points,
        }
    }
}

pub fn parse_lsblk_json(output: &str) -> Result<Vec<BlockDevice>> {
    let parsed: LsblkOutput = serde_json::from_str(output)
        .map_err(|error| SysError::Parse(format!("lsblk output: {error}")))?;

    Ok(parsed
        .blockdevices
        .into_iter()
        .map(BlockDevice::from)
        .collect())
}

fn run_capture(command: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(command).args(args).output()?;
    if !output.status.success() {
        return Err(SysError::CommandFailed {
            command: format!("{command} {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::parse_lsblk_json;

    const SAMPLE: &str = r#"{
   "blockdevices": [
      {"name":"nvme0n1", "path":"/dev/nvme0n1", "fstype":null, "parttype":null, "uuid":null, "partuuid":null, "label":null, "mountpoints":[null]},
      {"name":"nvme0n1p1", "path":"/dev/nvme0n1p1", "fstype":"vfat", "parttype":"c12a7328-f81f-11d2-ba4b-00a0c93ec93b", "uuid":"6C1A-2B3F", "partuuid":"5e0a9f53-01", "label":null, "mountpoints":["/boot/efi"]},
      {"name":"nvme0n1p2", "path":"/dev/nvme0n1p2", "fstype":"btrfs", "parttype":"0fc63daf-8483-4772-8e79-3d69d8477de4", "uuid":"9d1f1c2a-8e3b-4f4e-a2c5-1f0b9a0c7d11", "partuuid":"5e0a9f53-02", "label":"root", "mountpoints":["/home", "/.snapshots", "/"]}
   ]
}"#;

    #[test]
    fn parses_devices_and_drops_null_mount_points() {
        let devices = parse_lsblk_json(SAMPLE).expect("parse should succeed");
        assert_eq!(devices.len(), 3);
        assert!(devices[0].mount_points.is_empty());
        assert!(devices[1].is_esp());
        assert!(devices[2].is_mounted_at("/"));
        assert!(devices[2].is_btrfs());
    }

    #[test]
    fn accepts_legacy_single_mountpoint_column() {
        let devices = parse_lsblk_json(
            r#"{"blockdevices":[{"name":"sda1","fstype":"vfat","parttype":"0xef","uuid":null,"partuuid":null,"label":null,"mountpoint":"/efi"}]}"#,
        )
        .unwrap();
        assert_eq!(devices[0].path, "/dev/sda1");
        assert_eq!(devices[0].mount_points, vec!["/efi".to_string()]);
        assert!(devices[0].is_esp());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_lsblk_json("not json").is_err());
    }
}
