// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;

use snapboot_sys::{BlockDeviceSource, rebase};
use snapboot_types::BlockDevice;

use crate::error::PipelineError;
use crate::pipeline::{DiscoveredDevices, PipelineModel, Stage, StageHandler};

const ROOT_MOUNT_POINT: &str = "/";

/// Finds the ESP, where it is mounted, and the device backing `/`.
pub struct DiscoverBlockDevices {
    source: Arc<dyn BlockDeviceSource>,
}

impl DiscoverBlockDevices {
    pub fn new(source: Arc<dyn BlockDeviceSource>) -> Self {
        Self { source }
    }

    fn esp_mount_point(&self, esp: &BlockDevice) -> Result<String, PipelineError> {
        if let Some(mount_point) = esp.mount_points.first() {
            return Ok(mount_point.clone());
        }

        let table = self
            .source
            .mount_table()
            .map_err(|e| PipelineError::DeviceNotFound(format!("cannot read fstab: {e}")))?;

        table
            .into_iter()
            .find(|entry| esp.matches_source(&entry.source))
            .map(|entry| {
                tracing::debug!(
                    esp = %esp.path,
                    mount_point = %entry.mount_point,
                    "ESP is not mounted, using its fstab entry"
                );
                entry.mount_point
            })
            .ok_or_else(|| {
                PipelineError::DeviceNotFound(format!(
                    "EFI system partition {} is neither mounted nor listed in fstab",
                    esp.path
                ))
            })
    }
}

impl StageHandler for DiscoverBlockDevices {
    fn stage(&self) -> Stage {
        Stage::DiscoverBlockDevices
    }

    fn run(&self, model: &mut PipelineModel) -> Result<(), PipelineError> {
        let devices = self.source.block_devices().map_err(|e| {
            PipelineError::DeviceNotFound(format!("cannot enumerate block devices: {e}"))
        })?;

        let esp = select_esp(&devices, model.config.esp_uuid.as_deref())?.clone();
        let esp_mount = rebase(&model.root, self.esp_mount_point(&esp)?);

        let root_device = devices
            .iter()
            .find(|device| device.is_mounted_at(ROOT_MOUNT_POINT))
            .cloned()
            .ok_or_else(|| {
                PipelineError::DeviceNotFound("no block device is mounted at /".to_string())
            })?;

        tracing::info!(
            esp = %esp.path,
            esp_mount = %esp_mount.display(),
            root = %root_device.path,
            "block devices discovered"
        );

        model.devices = Some(DiscoveredDevices {
            devices,
            esp,
            esp_mount,
            root_device,
        });
        Ok(())
    }
}

/// Pick the ESP among `devices`, using `esp_uuid` when given.
pub fn select_esp<'a>(
    devices: &'a [BlockDevice],
    esp_uuid: Option<&str>,
) -> Result<&'a BlockDevice, PipelineError> {
    let candidates: Vec<&BlockDevice> = devices.iter().filter(|device| device.is_esp()).collect();

    if let Some(wanted) = esp_uuid {
        return candidates
            .into_iter()
            .find(|device| device.has_identifier(wanted))
            .ok_or_else(|| {
                PipelineError::DeviceNotFound(format!(
                    "no EFI system partition with UUID or PARTUUID {wanted}"
                ))
            });
    }

    match candidates.as_slice() {
        [] => Err(PipelineError::DeviceNotFound(
            "no EFI system partition found".to_string(),
        )),
        [esp] => Ok(*esp),
        several => Err(PipelineError::DeviceNotFound(format!(
            "{} EFI system partitions found ({}); set esp_uuid to choose one",
            several.len(),
            several
                .iter()
                .map(|device| device.path.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapboot_types::ESP_PARTITION_GUID;

    fn esp(name: &str, uuid: &str) -> BlockDevice {
        BlockDevice {
            name: name.to_string(),
            path: format!("/dev/{name}"),
            fs_type: Some("vfat".to_string()),
            part_type: Some(ESP_PARTITION_GUID.to_string()),
            uuid: Some(uuid.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn picks_the_only_esp() {
        let devices = vec![
            BlockDevice {
                name: "sda2".into(),
                fs_type: Some("btrfs".into()),
                ..Default::default()
            },
            esp("sda1", "AAAA-0001"),
        ];
        assert_eq!(select_esp(&devices, None).unwrap().name, "sda1");
    }

    #[test]
    fn several_esps_need_an_identifier() {
        let devices = vec![esp("sda1", "AAAA-0001"), esp("sdb1", "BBBB-0002")];

        let err = select_esp(&devices, None).unwrap_err();
        assert!(matches!(err, PipelineError::DeviceNotFound(ref msg) if msg.contains("esp_uuid")));
        assert_eq!(select_esp(&devices, Some("BBBB-0002")).unwrap().name, "sdb1");
        assert!(select_esp(&devices, Some("CCCC-0003")).is_err());
    }

    #[test]
    fn no_esp_is_device_not_found() {
        assert!(matches!(
            select_esp(&[], None),
            Err(PipelineError::DeviceNotFound(_))
        ));
    }
}
