// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use crate::error::{BtrfsError, Result};

/// One line of `btrfs subvolume list -u -q -R`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedSubvolume {
    pub id: u64,
    pub generation: u64,
    pub uuid: Option<String>,
    pub parent_uuid: Option<String>,
    /// Path relative to the filesystem tree
    pub path: String,
}

/// Run `btrfs subvolume list` against `mount_point` and index the result by id.
///
/// The command is used instead of the btrfsutil iterator because the latter
/// needs the filesystem top level to be reachable, which it usually is not
/// when only a subvolume is mounted as `/`.
pub fn list_subvolume_paths(mount_point: &Path) -> Result<HashMap<u64, ListedSubvolume>> {
    let output = Command::new("btrfs")
        .args(["subvolume", "list", "-u", "-q", "-R"])
        .arg(mount_point)
        .output()
        .map_err(|e| BtrfsError::CommandFailed(format!("Failed to run btrfs command: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BtrfsError::CommandFailed(format!(
            "btrfs command failed: {}",
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_subvolume_list(&stdout)
        .into_iter()
        .map(|subvolume| (subvolume.id, subvolume))
        .collect())
}

/// Parse output lines such as
/// `ID 256 gen 89534 top level 5 parent_uuid - received_uuid - uuid … path @`.
pub fn parse_subvolume_list(output: &str) -> Vec<ListedSubvolume> {
    let mut subvolumes = Vec::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 || parts[0] != "ID" {
            continue;
        }

        let id = parts[1].parse::<u64>().ok();
        let generation = value_after(&parts, "gen").and_then(|value| value.parse::<u64>().ok());

        // Everything after the "path" keyword, which may contain spaces
        let Some(path_idx) = parts.iter().position(|&p| p == "path") else {
            continue;
        };
        let path = parts[path_idx + 1..].join(" ");
        let path = path
            .strip_prefix("<FS_TREE>/")
            .map(ToOwned::to_owned)
            .unwrap_or(path);

        if let (Some(id), Some(generation)) = (id, generation) {
            subvolumes.push(ListedSubvolume {
                id,
                generation,
                uuid: optional_uuid(value_after(&parts, "uuid")),
                parent_uuid: optional_uuid(value_after(&parts, "parent_uuid")),
                path,
            });
        }
    }

    if subvolumes.is_empty() && !output.trim().is_empty() {
        tracing::warn!("No subvolumes found - output may not have been parsed correctly");
    }

    subvolumes
}

fn value_after<'a>(parts: &[&'a str], keyword: &str) -> Option<&'a str> {
    parts
        .iter()
        .position(|&p| p == keyword)
        .and_then(|idx| parts.get(idx + 1))
        .copied()
}

// "-" means the field is unset
fn optional_uuid(value: Option<&str>) -> Option<String> {
    value.filter(|v| *v != "-").map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::parse_subvolume_list;

    #[test]
    fn parses_list_output() {
        let output = "\
ID 256 gen 9021 top level 5 parent_uuid - received_uuid - uuid 6a0e6c8f-9d0b-4b4a-9a07-0f4a3c1f0d12 path @
ID 258 gen 8990 top level 5 parent_uuid - received_uuid - uuid 1d2c3b4a-0000-4000-8000-000000000001 path @snapshots
ID 301 gen 8801 top level 258 parent_uuid 6a0e6c8f-9d0b-4b4a-9a07-0f4a3c1f0d12 received_uuid - uuid 7e7e7e7e-0000-4000-8000-000000000002 path <FS_TREE>/@snapshots/12/my snapshot
";
        let parsed = parse_subvolume_list(output);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].id, 256);
        assert_eq!(parsed[0].path, "@");
        assert_eq!(parsed[0].parent_uuid, None);
        assert_eq!(parsed[2].generation, 8801);
        assert_eq!(parsed[2].path, "@snapshots/12/my snapshot");
        assert_eq!(
            parsed[2].parent_uuid.as_deref(),
            Some("6a0e6c8f-9d0b-4b4a-9a07-0f4a3c1f0d12")
        );
    }

    #[test]
    fn skips_unrelated_lines() {
        assert!(parse_subvolume_list("ERROR: not a btrfs filesystem\n").is_empty());
    }
}
