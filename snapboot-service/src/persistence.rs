// SPDX-License-Identifier: GPL-3.0-only

//! Versioned JSON record of the selection written by the last successful run

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use snapboot_types::{PERSISTED_STATE_VERSION, PersistedState};
use thiserror::Error;

/// Location of the state file below the system root
pub const STATE_PATH: &str = "/var/lib/snapboot/state.json";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("state store I/O error for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot lock {}: {reason}", path.display())]
    Lock { path: PathBuf, reason: String },

    #[error("cannot encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

fn io_error(path: &Path, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Hands out exclusive sessions on the persisted state.
pub trait StateStore: Send + Sync {
    /// Blocks until no other session is open.
    fn open_session(&self) -> Result<Box<dyn StateSession>, PersistenceError>;
}

/// Exclusive access to the persisted state for one run; released on drop.
pub trait StateSession: Send {
    /// The last committed state. Missing, corrupt or foreign documents read
    /// as the default state.
    fn load(&mut self) -> Result<PersistedState, PersistenceError>;

    fn commit(&mut self, state: &PersistedState) -> Result<(), PersistenceError>;
}

/// [`StateStore`] backed by a JSON file guarded by `flock(2)` on a sibling lock file
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at [`STATE_PATH`] below `root`.
    pub fn under_root(root: &Path) -> Self {
        Self::new(snapboot_sys::rebase(root, STATE_PATH))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }
}

impl StateStore for FileStateStore {
    fn open_session(&self) -> Result<Box<dyn StateSession>, PersistenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }

        let lock_path = self.lock_path();
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| io_error(&lock_path, e))?;

        let lock = Flock::lock(lock_file, FlockArg::LockExclusive).map_err(|(_, errno)| {
            PersistenceError::Lock {
                path: lock_path.clone(),
                reason: errno.desc().to_string(),
            }
        })?;

        tracing::debug!(path = %lock_path.display(), "state lock acquired");

        Ok(Box::new(FileStateSession {
            path: self.path.clone(),
            _lock: lock,
        }))
    }
}

struct FileStateSession {
    path: PathBuf,
    _lock: Flock<File>,
}

impl StateSession for FileStateSession {
    fn load(&mut self) -> Result<PersistedState, PersistenceError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no persisted state yet");
                return Ok(PersistedState::default());
            }
            Err(e) => return Err(io_error(&self.path, e)),
        };

        Ok(decode_state(&raw).unwrap_or_else(|reason| {
            tracing::warn!(path = %self.path.display(), "ignoring persisted state: {reason}");
            PersistedState::default()
        }))
    }

    fn commit(&mut self, state: &PersistedState) -> Result<(), PersistenceError> {
        let mut encoded = serde_json::to_string_pretty(state)?;
        encoded.push('\n');
        write_atomically(&self.path, encoded.as_bytes())?;

        tracing::debug!(
            path = %self.path.display(),
            generation = state.generation,
            "persisted state committed"
        );
        Ok(())
    }
}

/// Parse a state document, rejecting versions this build does not know.
pub fn decode_state(raw: &str) -> Result<PersistedState, String> {
    let state: PersistedState = serde_json::from_str(raw).map_err(|e| e.to_string())?;

    if state.version != PERSISTED_STATE_VERSION {
        return Err(format!(
            "unsupported version {} (expected {PERSISTED_STATE_VERSION})",
            state.version
        ));
    }

    Ok(state)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let tmp = path.with_extension("json.tmp");

    let mut file = File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
    file.write_all(bytes).map_err(|e| io_error(&tmp, e))?;
    file.sync_all().map_err(|e| io_error(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_error(path, e))?;

    if let Some(parent) = path.parent() {
        File::open(parent)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| io_error(parent, e))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapboot_types::SnapshotKey;

    fn key(id: u64) -> SnapshotKey {
        SnapshotKey {
            id,
            uuid: format!("uuid-{id}"),
            path: format!("@snapshots/{id}/snapshot"),
        }
    }

    #[test]
    fn missing_file_loads_default_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::under_root(dir.path());
        let mut session = store.open_session().unwrap();

        assert_eq!(session.load().unwrap(), PersistedState::default());
        assert!(store.path().starts_with(dir.path()));
    }

    #[test]
    fn committed_state_survives_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::under_root(dir.path());

        let state = PersistedState::default().successor("menuentry".into(), vec![key(3), key(2)]);
        {
            let mut session = store.open_session().unwrap();
            session.commit(&state).unwrap();
        }

        let mut session = store.open_session().unwrap();
        assert_eq!(session.load().unwrap(), state);

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"version\": 1"));
        assert!(raw.contains("\"generation\": 1"));
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_or_foreign_state_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));

        fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(
            store.open_session().unwrap().load().unwrap(),
            PersistedState::default()
        );

        fs::write(
            store.path(),
            r#"{"version":7,"generation":3,"template":"","selection":[]}"#,
        )
        .unwrap();
        assert_eq!(
            store.open_session().unwrap().load().unwrap(),
            PersistedState::default()
        );
    }

    #[test]
    fn rejects_unknown_versions() {
        assert!(decode_state(r#"{"version":2,"generation":0,"template":"","selection":[]}"#).is_err());
        assert!(decode_state(r#"{"version":1,"generation":4,"template":"t","selection":[]}"#).is_ok());
    }
}
