// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{RefindError, Result};
use crate::parser::{self, BootConfig};
use crate::writer;

/// Files to write for one reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StanzaUpdate {
    pub stanza_file: PathBuf,
    pub content: String,
    pub root_config: PathBuf,
    /// New root configuration text; `None` when it needs no change
    pub root_config_content: Option<String>,
    /// Generated files no longer included anywhere, deleted after the root is written
    pub removed: Vec<PathBuf>,
    /// Generated files still included from elsewhere, reduced to the header
    pub emptied: Vec<PathBuf>,
}

/// Read and write access to the bootloader configuration on the ESP
pub trait BootConfigStore: Send + Sync {
    /// Path of the root configuration file named `file_name` below `esp_mount`.
    fn locate(&self, esp_mount: &Path, file_name: &str) -> Result<PathBuf>;

    /// Parse `root_config` and everything it includes.
    fn load(&self, root_config: &Path) -> Result<BootConfig>;

    /// Current text of a generated stanza file, `None` when it cannot be read.
    fn read_stanzas(&self, stanza_file: &Path) -> Option<String>;

    /// Write the stanza file, then the root configuration if it changed,
    /// then retire stale generated files.
    fn write_stanzas(&self, update: &StanzaUpdate) -> Result<()>;
}

/// [`BootConfigStore`] backed by the mounted ESP
#[derive(Debug, Default, Clone)]
pub struct FileConfigStore;

impl FileConfigStore {
    pub fn new() -> Self {
        Self
    }
}

impl BootConfigStore for FileConfigStore {
    fn locate(&self, esp_mount: &Path, file_name: &str) -> Result<PathBuf> {
        parser::find_config_file(esp_mount, file_name)
    }

    fn load(&self, root_config: &Path) -> Result<BootConfig> {
        let refind_dir = root_config.parent().unwrap_or_else(|| Path::new("/"));
        parser::load_config(root_config, &refind_dir.join(writer::STANZA_DIR))
    }

    fn read_stanzas(&self, stanza_file: &Path) -> Option<String> {
        fs::read_to_string(stanza_file).ok()
    }

    fn write_stanzas(&self, update: &StanzaUpdate) -> Result<()> {
        if let Some(stanza_dir) = update.stanza_file.parent() {
            if let Some(refind_dir) = stanza_dir.parent() {
                writer::ensure_stanza_dir(refind_dir)?;
            }
        }

        writer::atomic_write(&update.stanza_file, &update.content)?;
        tracing::info!(file = %update.stanza_file.display(), "wrote boot stanzas");

        if let Some(content) = &update.root_config_content {
            writer::atomic_write(&update.root_config, content)?;
            tracing::info!(file = %update.root_config.display(), "updated stanza includes in root configuration");
        }

        for path in &update.emptied {
            writer::atomic_write(path, &writer::render_stanza_file(&[]))?;
            tracing::info!(file = %path.display(), "cleared stale boot stanzas");
        }
        for path in &update.removed {
            match fs::remove_file(path) {
                Ok(()) => tracing::info!(file = %path.display(), "removed stale boot stanzas"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(RefindError::io(path, e)),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_stanzas_and_include_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let refind = dir.path().join("EFI/refind");
        fs::create_dir_all(&refind).unwrap();
        fs::write(refind.join("refind.conf"), "menuentry Arch {\n options \"rootflags=subvol=@\"\n}\n").unwrap();

        let store = FileConfigStore::new();
        let root_config = store.locate(dir.path(), "refind.conf").unwrap();
        let config = store.load(&root_config).unwrap();
        let stanza_file = refind.join(writer::STANZA_DIR).join("arch.conf");
        let include = format!("{}/arch.conf", writer::STANZA_DIR);
        assert_eq!(store.read_stanzas(&stanza_file), None);

        store
            .write_stanzas(&StanzaUpdate {
                stanza_file: stanza_file.clone(),
                content: writer::render_stanza_file(&[]),
                root_config: root_config.clone(),
                root_config_content: Some(config.root().render_with_include(&include)),
                removed: Vec::new(),
                emptied: Vec::new(),
            })
            .unwrap();

        assert_eq!(
            store.read_stanzas(&stanza_file),
            Some(writer::render_stanza_file(&[]))
        );
        let reloaded = store.load(&root_config).unwrap();
        assert!(reloaded.root().has_include(&include));
        assert_eq!(reloaded.files.len(), 2);
    }

    #[test]
    fn retires_stale_stanza_files() {
        let dir = tempfile::tempdir().unwrap();
        let refind = dir.path().join("EFI/refind");
        let stanzas = refind.join(writer::STANZA_DIR);
        fs::create_dir_all(&stanzas).unwrap();
        fs::write(refind.join("refind.conf"), "timeout 5\n").unwrap();
        fs::write(stanzas.join("old.conf"), "menuentry Old {\n}\n").unwrap();
        fs::write(stanzas.join("other.conf"), "menuentry Other {\n}\n").unwrap();

        let store = FileConfigStore::new();
        store
            .write_stanzas(&StanzaUpdate {
                stanza_file: stanzas.join("new.conf"),
                content: writer::render_stanza_file(&[]),
                root_config: refind.join("refind.conf"),
                root_config_content: None,
                removed: vec![stanzas.join("old.conf"), stanzas.join("gone.conf")],
                emptied: vec![stanzas.join("other.conf")],
            })
            .unwrap();

        assert!(!stanzas.join("old.conf").exists());
        assert_eq!(
            store.read_stanzas(&stanzas.join("other.conf")),
            Some(writer::render_stanza_file(&[]))
        );
        assert!(stanzas.join("new.conf").is_file());
    }
}
