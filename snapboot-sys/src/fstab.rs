// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::Path;

use crate::error::{Result, SysError};

/// Location of the static mount table relative to the system root.
pub const FSTAB_PATH: &str = "/etc/fstab";

/// One line of the static mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    /// `UUID=…`, `PARTUUID=…`, `LABEL=…` or a device path
    pub source: String,
    pub mount_point: String,
    pub fs_type: String,
    pub options: Vec<String>,
}

/// Read and parse `<root>/etc/fstab`.
///
/// A missing table is not an error; it simply has no entries.
pub fn read_fstab(root: &Path) -> Result<Vec<FstabEntry>> {
    let path = crate::rebase(root, FSTAB_PATH);
    match fs::read_to_string(&path) {
        Ok(content) => parse_fstab(&content),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no fstab present");
            Ok(Vec::new())
        }
        Err(error) => Err(SysError::Io(error)),
    }
}

pub fn parse_fstab(input: &str) -> Result<Vec<FstabEntry>> {
    let mut entries = Vec::new();

    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split_whitespace();
        let (Some(source), Some(mount_point), Some(fs_type)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(SysError::Parse(format!("invalid fstab line: {line}")));
        };

        let options = fields
            .next()
            .map(|opts| {
                opts.split(',')
                    .filter(|opt| !opt.is_empty())
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        entries.push(FstabEntry {
            source: unescape_mount_field(source),
            mount_point: unescape_mount_field(mount_point),
            fs_type: fs_type.to_string(),
            options,
        });
    }

    Ok(entries)
}

fn unescape_mount_field(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1].is_ascii_digit()
            && bytes[index + 2].is_ascii_digit()
            && bytes[index + 3].is_ascii_digit()
        {
            let octal = &value[index + 1..index + 4];
            if let Ok(num) = u8::from_str_radix(octal, 8) {
                output.push(num as char);
                index += 4;
                continue;
            }
        }

        output.push(bytes[index] as char);
        index += 1;
    }

    output
}
