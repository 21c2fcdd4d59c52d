// SPDX-License-Identifier: GPL-3.0-only

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use snapboot_btrfs::{BtrfsError, SnapshotSource};
use snapboot_refind::{BootConfig, BootConfigStore, FileConfigStore, StanzaUpdate};
use snapboot_service::persistence::{PersistenceError, StateSession, StateStore};
use snapboot_service::runner::{EventBatch, EventSource};
use snapboot_sys::{BlockDeviceSource, FstabEntry, SysError};
use snapboot_types::{BlockDevice, PersistedState, RootSubvolume, Snapshot};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Block devices and fstab served from memory
#[derive(Debug, Default)]
pub struct FakeBlockDevices {
    devices: Mutex<Vec<BlockDevice>>,
    fstab: Mutex<Vec<FstabEntry>>,
    unavailable: AtomicBool,
}

impl FakeBlockDevices {
    pub fn new(devices: Vec<BlockDevice>) -> Self {
        Self {
            devices: Mutex::new(devices),
            ..Default::default()
        }
    }

    pub fn set_devices(&self, devices: Vec<BlockDevice>) {
        *lock(&self.devices) = devices;
    }

    pub fn set_fstab(&self, entries: Vec<FstabEntry>) {
        *lock(&self.fstab) = entries;
    }

    /// Make enumeration fail as if `lsblk` were missing.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl BlockDeviceSource for FakeBlockDevices {
    fn block_devices(&self) -> snapboot_sys::Result<Vec<BlockDevice>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SysError::ToolMissing("lsblk".to_string()));
        }
        Ok(lock(&self.devices).clone())
    }

    fn mount_table(&self) -> snapboot_sys::Result<Vec<FstabEntry>> {
        Ok(lock(&self.fstab).clone())
    }
}

/// Snapshot metadata served from memory, for any search directory
#[derive(Debug)]
pub struct FakeSnapshots {
    root: RootSubvolume,
    snapshots: Mutex<Vec<Snapshot>>,
    directory_missing: AtomicBool,
    queries: AtomicUsize,
}

impl FakeSnapshots {
    pub fn new(root: RootSubvolume) -> Self {
        Self {
            root,
            snapshots: Mutex::new(Vec::new()),
            directory_missing: AtomicBool::new(false),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn set_snapshots(&self, snapshots: Vec<Snapshot>) {
        *lock(&self.snapshots) = snapshots;
    }

    pub fn set_directory_missing(&self, missing: bool) {
        self.directory_missing.store(missing, Ordering::SeqCst);
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl SnapshotSource for FakeSnapshots {
    fn root_subvolume(&self, mount_point: &Path) -> snapboot_btrfs::Result<RootSubvolume> {
        Ok(RootSubvolume {
            mount_point: mount_point.to_path_buf(),
            ..self.root.clone()
        })
    }

    fn snapshots(
        &self,
        _root: &RootSubvolume,
        directory: &Path,
        _max_depth: usize,
    ) -> snapboot_btrfs::Result<Vec<Snapshot>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.directory_missing.load(Ordering::SeqCst) {
            return Err(BtrfsError::SearchDirectoryMissing(directory.to_path_buf()));
        }
        Ok(lock(&self.snapshots).clone())
    }
}

/// The real file-backed store, counting writes
#[derive(Debug, Default)]
pub struct RecordingConfigStore {
    inner: FileConfigStore,
    writes: AtomicUsize,
}

impl RecordingConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl BootConfigStore for RecordingConfigStore {
    fn locate(&self, esp_mount: &Path, file_name: &str) -> snapboot_refind::Result<PathBuf> {
        self.inner.locate(esp_mount, file_name)
    }

    fn load(&self, root_config: &Path) -> snapboot_refind::Result<BootConfig> {
        self.inner.load(root_config)
    }

    fn read_stanzas(&self, stanza_file: &Path) -> Option<String> {
        self.inner.read_stanzas(stanza_file)
    }

    fn write_stanzas(&self, update: &StanzaUpdate) -> snapboot_refind::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write_stanzas(update)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    raw: Mutex<Option<PersistedState>>,
    open: AtomicBool,
    sessions: AtomicUsize,
    commits: AtomicUsize,
    fail_commits: AtomicBool,
}

/// [`StateStore`] kept in memory.
///
/// Opening a second session while one is live is an error, which makes
/// overlapping runs visible in tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryStateStore {
    state: Arc<MemoryState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        let store = Self::default();
        *lock(&store.state.raw) = Some(state);
        store
    }

    /// The last committed state, if any.
    pub fn current(&self) -> Option<PersistedState> {
        lock(&self.state.raw).clone()
    }

    pub fn commits(&self) -> usize {
        self.state.commits.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> usize {
        self.state.sessions.load(Ordering::SeqCst)
    }

    pub fn set_fail_commits(&self, fail: bool) {
        self.state.fail_commits.store(fail, Ordering::SeqCst);
    }
}

impl StateStore for MemoryStateStore {
    fn open_session(&self) -> Result<Box<dyn StateSession>, PersistenceError> {
        if self.state.open.swap(true, Ordering::SeqCst) {
            return Err(PersistenceError::Lock {
                path: PathBuf::from("memory"),
                reason: "another session is open".to_string(),
            });
        }
        self.state.sessions.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemorySession {
            state: self.state.clone(),
        }))
    }
}

struct MemorySession {
    state: Arc<MemoryState>,
}

impl StateSession for MemorySession {
    fn load(&mut self) -> Result<PersistedState, PersistenceError> {
        Ok(lock(&self.state.raw).clone().unwrap_or_default())
    }

    fn commit(&mut self, state: &PersistedState) -> Result<(), PersistenceError> {
        if self.state.fail_commits.load(Ordering::SeqCst) {
            return Err(PersistenceError::Io {
                path: PathBuf::from("memory"),
                source: std::io::Error::other("disk full"),
            });
        }

        *lock(&self.state.raw) = Some(state.clone());
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.state.open.store(false, Ordering::SeqCst);
    }
}

type Hook = Box<dyn FnMut() + Send>;

/// [`EventSource`] that replays a fixed script and then reports `Closed`.
///
/// A hook registered for step `n` runs just before the `n`th batch is
/// handed out, which lets a test change the fake system between runs.
#[derive(Default)]
pub struct ScriptedEvents {
    script: VecDeque<(EventBatch, Option<Hook>)>,
    timeouts: Vec<Option<Duration>>,
}

impl ScriptedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, batch: EventBatch) -> Self {
        self.script.push_back((batch, None));
        self
    }

    pub fn then_after(mut self, hook: impl FnMut() + Send + 'static, batch: EventBatch) -> Self {
        self.script.push_back((batch, Some(Box::new(hook))));
        self
    }

    /// Timeouts requested so far, one per `next_batch` call.
    pub fn timeouts(&self) -> &[Option<Duration>] {
        &self.timeouts
    }
}

#[async_trait]
impl EventSource for ScriptedEvents {
    async fn next_batch(&mut self, timeout: Option<Duration>) -> EventBatch {
        self.timeouts.push(timeout);

        match self.script.pop_front() {
            Some((batch, hook)) => {
                if let Some(mut hook) = hook {
                    hook();
                }
                batch
            }
            None => EventBatch::Closed,
        }
    }
}
