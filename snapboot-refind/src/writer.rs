// SPDX-License-Identifier: GPL-3.0-only

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::entry::BootMenuEntry;
use crate::error::{RefindError, Result};

/// Directory next to the root configuration that holds generated stanzas
pub const STANZA_DIR: &str = "btrfs-snapshot-stanzas";
pub const STANZA_DIR_MODE: u32 = 0o750;

const STANZA_HEADER: &str = "\
# Generated by snapboot. Changes to this file are overwritten.
# Edit the template menuentry in the main rEFInd configuration instead.";

/// File name of the stanza file generated from the template titled `title`.
pub fn stanza_file_name(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut dash = false;

    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }

    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "snapshots.conf".to_string()
    } else {
        format!("{slug}.conf")
    }
}

/// Text of a stanza file holding `entries` in order.
///
/// An empty list yields a header-only file so a stale include stays valid.
pub fn render_stanza_file(entries: &[BootMenuEntry]) -> String {
    let mut text = String::from(STANZA_HEADER);
    text.push('\n');

    for entry in entries {
        text.push('\n');
        text.push_str(&entry.render());
        text.push('\n');
    }

    text
}

/// Create the stanza directory under `refind_dir` with mode 0750.
pub fn ensure_stanza_dir(refind_dir: &Path) -> Result<PathBuf> {
    let dir = refind_dir.join(STANZA_DIR);

    if !dir.is_dir() {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(STANZA_DIR_MODE)
            .create(&dir)
            .map_err(|e| RefindError::io(&dir, e))?;
        tracing::info!(dir = %dir.display(), "created stanza directory");
    }

    Ok(dir)
}

/// Replace `path` with `content` so readers see either the old or the new file.
///
/// Writes a sibling temp file, syncs it, renames it over the target and then
/// syncs the parent directory. Existing permissions are preserved.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.tmp-{}", std::process::id()));

    let write = || -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(content.as_bytes())?;

        if let Ok(meta) = fs::metadata(path) {
            file.set_permissions(fs::Permissions::from_mode(meta.permissions().mode()))?;
        }

        file.sync_all()?;
        fs::rename(&tmp, path)
    };

    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(RefindError::io(path, e));
    }

    // FAT ignores directory fsync on some kernels; a failure here is not fatal
    if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
        tracing::debug!(dir = %parent.display(), "directory sync failed: {e}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_config;

    #[test]
    fn slugs_template_titles() {
        assert_eq!(stanza_file_name("Arch Linux"), "arch-linux.conf");
        assert_eq!(stanza_file_name("  Fedora (rawhide) 41 "), "fedora-rawhide-41.conf");
        assert_eq!(stanza_file_name("***"), "snapshots.conf");
    }

    #[test]
    fn renders_entries_after_header() {
        let file = parse_config(
            Path::new("refind.conf"),
            "menuentry A {\n loader /a\n}\nmenuentry B {\n loader /b\n}\n",
        )
        .unwrap();

        let text = render_stanza_file(&file.entries);
        assert!(text.starts_with("# Generated by snapboot."));
        assert!(text.ends_with("\nmenuentry A {\n loader /a\n}\n\nmenuentry B {\n loader /b\n}\n"));

        let reparsed = parse_config(Path::new("a.conf"), &text).unwrap();
        assert_eq!(reparsed.entries.len(), 2);
        assert_eq!(render_stanza_file(&[]), format!("{STANZA_HEADER}\n"));
    }

    #[test]
    fn writes_atomically_and_keeps_mode() {
        let dir = tempfile::tempdir().unwrap();
        let stanza_dir = ensure_stanza_dir(dir.path()).unwrap();
        let mode = fs::metadata(&stanza_dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode & !STANZA_DIR_MODE, 0);

        let target = stanza_dir.join("arch.conf");
        atomic_write(&target, "first\n").unwrap();
        fs::set_permissions(&target, fs::Permissions::from_mode(0o600)).unwrap();
        atomic_write(&target, "second\n").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "second\n");
        assert_eq!(fs::metadata(&target).unwrap().permissions().mode() & 0o777, 0o600);
        let leftovers: Vec<_> = fs::read_dir(&stanza_dir).unwrap().flatten().collect();
        assert_eq!(leftovers.len(), 1);
    }
}
