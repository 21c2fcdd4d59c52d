// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

/// Re-anchor an absolute system path under `root`.
///
/// With the default root `/` the path is returned unchanged.
pub fn rebase(root: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let relative = path.strip_prefix("/").unwrap_or(path);

    if relative.as_os_str().is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::rebase;
    use std::path::{Path, PathBuf};

    #[test]
    fn rebases_absolute_paths() {
        assert_eq!(
            rebase(Path::new("/mnt/sysroot"), "/etc/fstab"),
            PathBuf::from("/mnt/sysroot/etc/fstab")
        );
        assert_eq!(rebase(Path::new("/"), "/boot/efi"), PathBuf::from("/boot/efi"));
        assert_eq!(rebase(Path::new("/mnt/sysroot"), "/"), PathBuf::from("/mnt/sysroot"));
    }
}
