// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use snapboot_refind::{STANZA_DIR, stanza_file_name};
use snapboot_service::config::Config;
use snapboot_service::wiring::{self, Collaborators};
use snapboot_service::{PipelineError, RunReport, SyncMachine};
use snapboot_types::{BlockDevice, ESP_PARTITION_GUID, RootSubvolume, Snapshot};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::errors::{Result, TestingError};
use crate::fakes::{FakeBlockDevices, FakeSnapshots, MemoryStateStore, RecordingConfigStore};

pub const ROOT_UUID: &str = "4f8a1c2e-93b7-4d6a-b0e5-7c1d2a9f3e84";
pub const ESP_UUID: &str = "7A3B-19C2";
pub const ESP_PART_UUID: &str = "0d5e2f71-6c3a-4b8e-9f12-a4c7e3b2d901";
pub const ESP_MOUNT: &str = "/boot/efi";
pub const TEMPLATE_TITLE: &str = "Arch Linux";

/// rEFInd configuration installed by [`SystemFixture::new`]
pub const REFIND_CONF: &str = "\
# rEFInd configuration
timeout 10
use_nvram false
scanfor manual,external

menuentry \"Arch Linux\" {
    icon     /EFI/refind/icons/os_arch.png
    volume   \"ROOT\"
    loader   /@/boot/vmlinuz-linux
    initrd   /@/boot/initramfs-linux.img
    options  \"root=UUID=4f8a1c2e rw rootflags=subvol=@,compress=zstd:1 initrd=@\\boot\\amd-ucode.img quiet\"
    submenuentry \"Boot using fallback initramfs\" {
        initrd /@/boot/initramfs-linux-fallback.img
    }
}

menuentry \"Windows\" {
    loader \\EFI\\Microsoft\\Boot\\bootmgfw.efi
}
";

const BASE_CONFIG: &str = r#"
[[snapshot_search]]
directory = "/.snapshots"
max_depth = 2

[snapshot_manipulation]
selection_count = 2

[boot_stanza_generation]
refind_config = "refind.conf"
template_entry = "Arch Linux"
"#;

pub fn esp_device() -> BlockDevice {
    BlockDevice {
        name: "nvme0n1p1".to_string(),
        path: "/dev/nvme0n1p1".to_string(),
        fs_type: Some("vfat".to_string()),
        part_type: Some(ESP_PARTITION_GUID.to_string()),
        uuid: Some(ESP_UUID.to_string()),
        part_uuid: Some(ESP_PART_UUID.to_string()),
        label: None,
        mount_points: vec![ESP_MOUNT.to_string()],
    }
}

pub fn root_device() -> BlockDevice {
    BlockDevice {
        name: "nvme0n1p2".to_string(),
        path: "/dev/nvme0n1p2".to_string(),
        fs_type: Some("btrfs".to_string()),
        part_type: Some("0fc63daf-8483-4772-8e79-3d69d8477de4".to_string()),
        uuid: Some("4f8a1c2e-0000-4000-8000-000000000001".to_string()),
        part_uuid: None,
        label: Some("ROOT".to_string()),
        mount_points: vec!["/".to_string(), "/home".to_string()],
    }
}

pub fn root_subvolume() -> RootSubvolume {
    RootSubvolume {
        id: 256,
        uuid: ROOT_UUID.to_string(),
        subvolume_path: "@".to_string(),
        mount_point: PathBuf::from("/"),
    }
}

/// A snapshot of the fixture's root subvolume, snapper style.
pub fn snapshot(id: u64, created_at: i64, read_only: bool) -> Snapshot {
    Snapshot {
        id: 300 + id,
        uuid: format!("9b6e0d44-{id:04}-4c1e-8a55-0f3b2c7d1e6a"),
        parent_uuid: Some(ROOT_UUID.to_string()),
        created_at,
        generation: 1000 + id,
        path: PathBuf::from(format!("/.snapshots/{id}/snapshot")),
        subvolume_path: format!("@snapshots/{id}/snapshot"),
        read_only,
    }
}

/// A throw-away system root with an ESP tree, wired to fake collaborators.
pub struct SystemFixture {
    dir: TempDir,
    pub config: Config,
    pub block_devices: Arc<FakeBlockDevices>,
    pub snapshots: Arc<FakeSnapshots>,
    pub boot_config: Arc<RecordingConfigStore>,
    pub state: MemoryStateStore,
}

impl SystemFixture {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().map_err(|e| TestingError::FixtureIo {
            path: std::env::temp_dir(),
            reason: e.to_string(),
        })?;

        let fixture = Self {
            config: Config::from_toml(BASE_CONFIG).map_err(|e| TestingError::ConfigInvalid {
                reason: e.to_string(),
            })?,
            block_devices: Arc::new(FakeBlockDevices::new(vec![esp_device(), root_device()])),
            snapshots: Arc::new(FakeSnapshots::new(root_subvolume())),
            boot_config: Arc::new(RecordingConfigStore::new()),
            state: MemoryStateStore::new(),
            dir,
        };

        fixture.write_file(&fixture.root_config(), REFIND_CONF)?;
        fixture.create_dir(&fixture.root().join(".snapshots"))?;
        Ok(fixture)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn refind_dir(&self) -> PathBuf {
        self.root().join("boot/efi/EFI/refind")
    }

    pub fn root_config(&self) -> PathBuf {
        self.refind_dir().join("refind.conf")
    }

    pub fn stanza_file(&self) -> PathBuf {
        self.refind_dir()
            .join(STANZA_DIR)
            .join(stanza_file_name(TEMPLATE_TITLE))
    }

    pub fn include_line(&self) -> String {
        format!("include {STANZA_DIR}/{}", stanza_file_name(TEMPLATE_TITLE))
    }

    pub fn read(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|e| TestingError::FixtureIo {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir(parent)?;
        }
        fs::write(path, content).map_err(|e| TestingError::FixtureIo {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| TestingError::FixtureIo {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn set_snapshots(&self, snapshots: Vec<Snapshot>) {
        self.snapshots.set_snapshots(snapshots);
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            block_devices: self.block_devices.clone(),
            snapshots: self.snapshots.clone(),
            boot_config: self.boot_config.clone(),
            state: Arc::new(self.state.clone()),
        }
    }

    /// A machine over the current configuration and fakes.
    pub fn machine(&self) -> Result<SyncMachine> {
        wiring::build_machine(
            Arc::new(self.config.clone()),
            self.root().to_path_buf(),
            self.collaborators(),
        )
        .map_err(|e| TestingError::WiringFailed {
            reason: e.to_string(),
        })
    }

    /// Build a machine and run it once to completion.
    pub fn run(&self) -> Result<std::result::Result<RunReport, PipelineError>> {
        Ok(self.machine()?.run(&CancellationToken::new()))
    }
}
