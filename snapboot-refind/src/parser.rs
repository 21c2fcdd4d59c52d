// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::entry::BootMenuEntry;
use crate::error::{RefindError, Result};
use crate::grammar::{self, MENUENTRY_KEYWORD, SUBMENUENTRY_KEYWORD};

/// How deep below the ESP mount point the root configuration is searched for.
const CONFIG_SEARCH_DEPTH: usize = 4;

/// One parsed configuration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub path: PathBuf,
    lines: Vec<String>,
    trailing_newline: bool,
    pub entries: Vec<BootMenuEntry>,
    /// Include targets in order of appearance, as written
    pub includes: Vec<String>,
}

impl ConfigFile {
    /// The file's text exactly as it was read.
    pub fn render(&self) -> String {
        let mut text = self.lines.join("\n");
        if self.trailing_newline {
            text.push('\n');
        }
        text
    }

    pub fn has_include(&self, target: &str) -> bool {
        let wanted = normalize_include(target);
        self.includes
            .iter()
            .any(|include| normalize_include(include) == wanted)
    }

    /// The file's text with an `include` line appended.
    pub fn render_with_include(&self, target: &str) -> String {
        self.render_with_includes(&[], Some(target))
    }

    /// The file's text without the `include` lines naming any of `remove`,
    /// and with an `include` line for `add` appended when given.
    pub fn render_with_includes(&self, remove: &[String], add: Option<&str>) -> String {
        let removed: Vec<String> = remove.iter().map(|target| normalize_include(target)).collect();
        let kept: Vec<&str> = self
            .lines
            .iter()
            .filter(|line| {
                grammar::include_target(line)
                    .is_none_or(|target| !removed.contains(&normalize_include(target)))
            })
            .map(String::as_str)
            .collect();

        let mut text = kept.join("\n");
        if !kept.is_empty() && (self.trailing_newline || add.is_some()) {
            text.push('\n');
        }
        if let Some(target) = add {
            text.push_str(&format!("{} {target}\n", grammar::INCLUDE_KEYWORD));
        }
        text
    }
}

fn normalize_include(target: &str) -> String {
    let target = target.trim().trim_matches('"');
    target
        .strip_prefix("./")
        .unwrap_or(target)
        .replace('\\', "/")
}

/// A root configuration file together with everything it includes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootConfig {
    /// Root file first, then includes in depth-first order
    pub files: Vec<ConfigFile>,
}

impl BootConfig {
    pub fn root(&self) -> &ConfigFile {
        &self.files[0]
    }

    pub fn entries(&self) -> impl Iterator<Item = &BootMenuEntry> {
        self.files.iter().flat_map(|file| file.entries.iter())
    }

    /// The first unmanaged entry titled `title`.
    pub fn find_template(&self, title: &str) -> Option<&BootMenuEntry> {
        self.entries()
            .find(|entry| !entry.is_managed() && entry.title() == title)
    }

    pub fn managed_entries(&self) -> impl Iterator<Item = &BootMenuEntry> {
        self.entries().filter(|entry| entry.is_managed())
    }

    /// Files holding managed entries, other than `current`.
    pub fn stale_managed_files(&self, current: &Path) -> Vec<PathBuf> {
        let mut stale: Vec<PathBuf> = Vec::new();
        for entry in self.managed_entries() {
            if entry.source() != current && !stale.iter().any(|path| path == entry.source()) {
                stale.push(entry.source().to_path_buf());
            }
        }
        stale
    }
}

/// Parse the configuration at `root_path` and follow its includes.
///
/// Entries read from files below `managed_dir` are flagged as managed.
/// Missing include targets are treated as empty; each file is read once.
pub fn load_config(root_path: &Path, managed_dir: &Path) -> Result<BootConfig> {
    let mut files = Vec::new();
    let mut visited = HashSet::new();

    load_recursive(root_path, managed_dir, true, &mut files, &mut visited)?;
    Ok(BootConfig { files })
}

fn load_recursive(
    path: &Path,
    managed_dir: &Path,
    required: bool,
    files: &mut Vec<ConfigFile>,
    visited: &mut HashSet<PathBuf>,
) -> Result<()> {
    let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(key) {
        tracing::debug!(path = %path.display(), "include already processed, skipping");
        return Ok(());
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "included file does not exist, treating as empty");
            return Ok(());
        }
        Err(e) => return Err(RefindError::io(path, e)),
    };

    let mut file = parse_config(path, &content)?;
    if path.starts_with(managed_dir) {
        for entry in &mut file.entries {
            entry.set_managed(true);
        }
    }

    let base = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
    let includes = file.includes.clone();
    files.push(file);

    for include in includes {
        let target = base.join(normalize_include(&include));
        load_recursive(&target, managed_dir, false, files, visited)?;
    }

    Ok(())
}

/// Parse a single configuration file's text.
pub fn parse_config(path: &Path, content: &str) -> Result<ConfigFile> {
    let trailing_newline = content.ends_with('\n');
    let body = content.strip_suffix('\n').unwrap_or(content);
    let lines: Vec<String> = if content.is_empty() {
        Vec::new()
    } else {
        body.split('\n').map(ToOwned::to_owned).collect()
    };

    let mut entries = Vec::new();
    let mut includes = Vec::new();
    let mut idx = 0;

    while idx < lines.len() {
        let raw = &lines[idx];

        if raw.trim().is_empty() || grammar::is_comment(raw) {
            idx += 1;
            continue;
        }

        if let Some(target) = grammar::include_target(raw) {
            includes.push(target.to_string());
            idx += 1;
            continue;
        }

        if grammar::starts_block(raw, MENUENTRY_KEYWORD) {
            let (entry, next) = parse_entry(path, &lines, idx)?;
            entries.push(entry);
            idx = next;
            continue;
        }

        if grammar::is_block_close(raw) {
            return Err(syntax(path, idx, "unexpected '}' outside of a stanza"));
        }
        if grammar::is_block_open(raw) {
            return Err(syntax(path, idx, "unexpected '{' outside of a stanza"));
        }

        idx += 1;
    }

    Ok(ConfigFile {
        path: path.to_path_buf(),
        lines,
        trailing_newline,
        entries,
        includes,
    })
}

fn parse_entry(path: &Path, lines: &[String], start: usize) -> Result<(BootMenuEntry, usize)> {
    let first = &lines[start];
    let (title, span, brace_on_line) =
        parse_title(first).map_err(|reason| syntax(path, start, &reason))?;

    let mut header = vec![first.clone()];
    let mut idx = start + 1;

    if !brace_on_line {
        loop {
            let Some(raw) = lines.get(idx) else {
                return Err(syntax(path, start, "menuentry without opening '{'"));
            };
            header.push(raw.clone());
            idx += 1;

            if raw.trim().is_empty() || grammar::is_comment(raw) {
                continue;
            }
            if grammar::is_block_open(raw) {
                break;
            }
            return Err(syntax(path, start, "menuentry without opening '{'"));
        }
    }

    let mut body = Vec::new();
    let mut depth = 0usize;
    let mut pending_submenu = false;

    let footer = loop {
        let Some(raw) = lines.get(idx) else {
            return Err(syntax(path, start, "unterminated menuentry stanza"));
        };
        let line_idx = idx;
        idx += 1;

        if raw.trim().is_empty() || grammar::is_comment(raw) {
            body.push(raw.clone());
            continue;
        }

        if grammar::starts_block(raw, MENUENTRY_KEYWORD) {
            return Err(syntax(path, line_idx, "menuentry nested inside another stanza"));
        }

        if grammar::starts_block(raw, SUBMENUENTRY_KEYWORD) {
            if raw.trim_end().ends_with('{') {
                depth += 1;
            } else {
                pending_submenu = true;
            }
            body.push(raw.clone());
            continue;
        }

        if grammar::is_block_open(raw) {
            if !pending_submenu {
                return Err(syntax(path, line_idx, "unexpected '{'"));
            }
            pending_submenu = false;
            depth += 1;
            body.push(raw.clone());
            continue;
        }

        if pending_submenu {
            return Err(syntax(path, line_idx, "submenuentry without opening '{'"));
        }

        if grammar::is_block_close(raw) {
            if depth == 0 {
                break raw.clone();
            }
            depth -= 1;
            body.push(raw.clone());
            continue;
        }

        if let Some((_, value)) = grammar::keyword_and_value(raw) {
            grammar::unquote(value).map_err(|reason| syntax(path, line_idx, &reason))?;
        }
        body.push(raw.clone());
    };

    let entry = BootMenuEntry::new(
        title,
        header,
        span,
        body,
        footer,
        path.to_path_buf(),
        start + 1,
    );
    Ok((entry, idx))
}

/// Title, its byte span in `line`, and whether `{` closes the line.
fn parse_title(line: &str) -> std::result::Result<(String, (usize, usize), bool), String> {
    let after_indent = line.trim_start();
    let rest = &after_indent[MENUENTRY_KEYWORD.len()..];
    let title_text = rest.trim_start();
    let start = line.len() - title_text.len();

    if let Some(quoted) = title_text.strip_prefix('"') {
        let close = quoted
            .find('"')
            .ok_or_else(|| "unterminated quote in menuentry title".to_string())?;
        let title = quoted[..close].to_string();
        let end = start + close + 2;
        let trailer = line[end..].trim();

        return match trailer {
            "" => Ok((title, (start, end), false)),
            "{" => Ok((title, (start, end), true)),
            other => Err(format!("unexpected '{other}' after menuentry title")),
        };
    }

    let trimmed = title_text.trim_end();
    let (title, brace) = match trimmed.strip_suffix('{') {
        Some(title) => (title.trim_end(), true),
        None => (trimmed, false),
    };

    if title.is_empty() {
        return Err("menuentry without a title".to_string());
    }

    Ok((title.to_string(), (start, start + title.len()), brace))
}

fn syntax(path: &Path, line_idx: usize, reason: &str) -> RefindError {
    RefindError::Syntax {
        path: path.to_path_buf(),
        line: line_idx + 1,
        reason: reason.to_string(),
    }
}

/// Find the root configuration named `file_name` below the ESP mount point.
///
/// The FAT filesystem is case-insensitive, so names are compared that way.
/// Shallower matches win; ties resolve in path order.
pub fn find_config_file(esp_mount: &Path, file_name: &str) -> Result<PathBuf> {
    let mut level = vec![esp_mount.to_path_buf()];

    for _ in 0..=CONFIG_SEARCH_DEPTH {
        let mut matches = Vec::new();
        let mut next = Vec::new();

        for dir in &level {
            let Ok(entries) = fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                if file_type.is_dir() {
                    next.push(path);
                } else if entry
                    .file_name()
                    .to_string_lossy()
                    .eq_ignore_ascii_case(file_name)
                {
                    matches.push(path);
                }
            }
        }

        if !matches.is_empty() {
            matches.sort();
            return Ok(matches.swap_remove(0));
        }

        next.sort();
        level = next;
    }

    Err(RefindError::ConfigNotFound {
        esp: esp_mount.to_path_buf(),
        file_name: file_name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFIND_CONF: &str = "\
# rEFInd configuration
timeout 20
use_nvram false

include themes/minimal/theme.conf

menuentry \"Arch Linux\" {
    icon     /EFI/refind/icons/os_arch.png
    loader   /@/boot/vmlinuz-linux
    initrd   /@/boot/initramfs-linux.img
    options  \"root=PARTUUID=5028fa50 rw rootflags=subvol=@\"
    submenuentry \"Fallback\"
    {
        initrd /@/boot/initramfs-linux-fallback.img
    }
}

menuentry Windows {
\tloader \\EFI\\Microsoft\\Boot\\bootmgfw.efi
}
";

    #[test]
    fn round_trips_unmodified_text() {
        let file = parse_config(Path::new("refind.conf"), REFIND_CONF).unwrap();
        assert_eq!(file.render(), REFIND_CONF);

        let no_newline = REFIND_CONF.trim_end_matches('\n');
        let file = parse_config(Path::new("refind.conf"), no_newline).unwrap();
        assert_eq!(file.render(), no_newline);
    }

    #[test]
    fn parses_entries_and_includes() {
        let file = parse_config(Path::new("refind.conf"), REFIND_CONF).unwrap();
        assert_eq!(file.includes, vec!["themes/minimal/theme.conf".to_string()]);
        assert_eq!(file.entries.len(), 2);
        assert_eq!(file.entries[0].title(), "Arch Linux");
        assert_eq!(file.entries[0].line(), 7);
        assert_eq!(file.entries[1].title(), "Windows");
        assert_eq!(
            file.entries[1].loader(),
            Some("\\EFI\\Microsoft\\Boot\\bootmgfw.efi")
        );
        // entry text is kept verbatim
        assert!(REFIND_CONF.contains(&file.entries[0].render()));
    }

    #[test]
    fn accepts_brace_on_following_line() {
        let file = parse_config(
            Path::new("refind.conf"),
            "menuentry \"Linux\"\n{\n  loader /vmlinuz\n}\n",
        )
        .unwrap();
        assert_eq!(file.entries[0].loader(), Some("/vmlinuz"));
        assert_eq!(file.entries[0].render(), "menuentry \"Linux\"\n{\n  loader /vmlinuz\n}");
    }

    #[test]
    fn reports_malformed_syntax_with_line_numbers() {
        let cases = [
            ("menuentry \"Linux\" {\n  loader /vmlinuz\n", 1),
            ("timeout 5\n}\n", 2),
            ("menuentry \"Linux\"\n  loader /vmlinuz\n}\n", 1),
            ("menuentry \"Linux {\n}\n", 1),
            ("menuentry \"Linux\" {\n  options \"root=/dev/sda2\n}\n", 2),
        ];

        for (text, line) in cases {
            match parse_config(Path::new("bad.conf"), text) {
                Err(RefindError::Syntax { line: got, .. }) => assert_eq!(got, line, "{text}"),
                other => panic!("expected syntax error for {text:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn follows_includes_and_tolerates_missing_targets() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("refind.conf");
        let managed_dir = dir.path().join("btrfs-snapshot-stanzas");
        fs::create_dir_all(&managed_dir).unwrap();

        fs::write(
            &root,
            "include missing.conf\ninclude extra.conf\ninclude btrfs-snapshot-stanzas/arch.conf\ninclude extra.conf\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("extra.conf"),
            "include refind.conf\nmenuentry Extra {\n loader /x\n}\n",
        )
        .unwrap();
        fs::write(
            managed_dir.join("arch.conf"),
            "menuentry \"Extra\" {\n loader /y\n}\n",
        )
        .unwrap();

        let config = load_config(&root, &managed_dir).unwrap();
        assert_eq!(config.files.len(), 3);
        assert_eq!(config.entries().count(), 2);
        assert_eq!(config.managed_entries().count(), 1);
        assert_eq!(config.find_template("Extra").unwrap().loader(), Some("/x"));
        assert!(config.root().has_include("./extra.conf"));
    }

    #[test]
    fn missing_root_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("refind.conf"), dir.path()).unwrap_err();
        assert!(matches!(err, RefindError::Io { .. }));
    }

    #[test]
    fn drops_named_include_lines() {
        let file = parse_config(
            Path::new("refind.conf"),
            "timeout 5\ninclude ./btrfs-snapshot-stanzas/old.conf\ninclude themes/theme.conf\n",
        )
        .unwrap();

        assert_eq!(
            file.render_with_includes(
                &["btrfs-snapshot-stanzas/old.conf".to_string()],
                Some("btrfs-snapshot-stanzas/new.conf")
            ),
            "timeout 5\ninclude themes/theme.conf\ninclude btrfs-snapshot-stanzas/new.conf\n"
        );
        assert_eq!(
            file.render_with_includes(&["themes/theme.conf".to_string()], None),
            "timeout 5\ninclude ./btrfs-snapshot-stanzas/old.conf\n"
        );
    }

    #[test]
    fn appends_include_lines() {
        let file = parse_config(Path::new("refind.conf"), "timeout 5").unwrap();
        assert_eq!(
            file.render_with_include("btrfs-snapshot-stanzas/arch.conf"),
            "timeout 5\ninclude btrfs-snapshot-stanzas/arch.conf\n"
        );
    }

    #[test]
    fn locates_config_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let refind = dir.path().join("EFI/refind");
        fs::create_dir_all(&refind).unwrap();
        fs::create_dir_all(dir.path().join("EFI/refind/backup/old")).unwrap();
        fs::write(refind.join("REFIND.CONF"), "").unwrap();
        fs::write(dir.path().join("EFI/refind/backup/old/refind.conf"), "").unwrap();

        let found = find_config_file(dir.path(), "refind.conf").unwrap();
        assert_eq!(found, refind.join("REFIND.CONF"));

        let err = find_config_file(dir.path(), "grub.cfg").unwrap_err();
        assert!(matches!(err, RefindError::ConfigNotFound { .. }));
    }
}
