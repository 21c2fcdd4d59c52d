// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{RefindError, Result};
use crate::grammar::{
    self, BootOption, COLUMN_SEPARATOR, INITRD_KEYWORD, LOADER_KEYWORD, OPTIONS_KEYWORD,
    ROOTFLAGS_OPTION, ROOTFLAGS_PREFIX, SUBMENUENTRY_KEYWORD, SUBVOL_OPTION, SUBVOLID_OPTION,
};

/// Which `rootflags` item selects the subvolume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubvolumeKey {
    /// `subvol=<path>`
    Path,
    /// `subvolid=<id>`
    Id,
}

impl SubvolumeKey {
    pub fn as_str(self) -> &'static str {
        match self {
            SubvolumeKey::Path => SUBVOL_OPTION,
            SubvolumeKey::Id => SUBVOLID_OPTION,
        }
    }
}

/// The subvolume-selection parameter of a `rootflags` option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubvolumeSelector {
    pub key: SubvolumeKey,
    pub value: String,
}

impl fmt::Display for SubvolumeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key.as_str(), self.value)
    }
}

impl SubvolumeSelector {
    fn parse(item: &str) -> Option<Self> {
        let (key, value) = item.split_once('=')?;
        let key = match key {
            SUBVOL_OPTION => SubvolumeKey::Path,
            SUBVOLID_OPTION => SubvolumeKey::Id,
            _ => return None,
        };
        Some(Self {
            key,
            value: value.to_string(),
        })
    }
}

/// A `menuentry` stanza.
///
/// Raw lines are kept verbatim; accessors interpret them on demand so an
/// entry that is never rewritten renders exactly as it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootMenuEntry {
    title: String,
    header: Vec<String>,
    /// Byte range of the (possibly quoted) title inside `header[0]`
    title_span: (usize, usize),
    body: Vec<String>,
    footer: String,
    source: PathBuf,
    line: usize,
    managed: bool,
}

impl BootMenuEntry {
    pub(crate) fn new(
        title: String,
        header: Vec<String>,
        title_span: (usize, usize),
        body: Vec<String>,
        footer: String,
        source: PathBuf,
        line: usize,
    ) -> Self {
        Self {
            title,
            header,
            title_span,
            body,
            footer,
            source,
            line,
            managed: false,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// File the entry was read from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// 1-based line of the `menuentry` keyword.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Whether the entry lives in a generated stanza file.
    pub fn is_managed(&self) -> bool {
        self.managed
    }

    pub(crate) fn set_managed(&mut self, managed: bool) {
        self.managed = managed;
    }

    pub fn body(&self) -> &[String] {
        &self.body
    }

    /// `(body index, keyword, raw value)` of every line outside submenus.
    fn top_level(&self) -> Vec<(usize, &str, &str)> {
        let mut lines = Vec::new();
        let mut depth = 0usize;

        for (idx, raw) in self.body.iter().enumerate() {
            if grammar::starts_block(raw, SUBMENUENTRY_KEYWORD) {
                if raw.trim_end().ends_with('{') {
                    depth += 1;
                }
                continue;
            }
            if grammar::is_block_open(raw) {
                depth += 1;
                continue;
            }
            if grammar::is_block_close(raw) {
                depth = depth.saturating_sub(1);
                continue;
            }
            if depth > 0 {
                continue;
            }
            if let Some((keyword, value)) = grammar::keyword_and_value(raw) {
                lines.push((idx, keyword, value));
            }
        }

        lines
    }

    /// First top-level value for `keyword`, unquoted.
    pub fn option_value(&self, keyword: &str) -> Option<&str> {
        self.top_level()
            .into_iter()
            .find(|(_, kw, _)| *kw == keyword)
            .map(|(_, _, value)| grammar::unquote(value).unwrap_or(value))
    }

    pub fn loader(&self) -> Option<&str> {
        self.option_value(LOADER_KEYWORD)
    }

    pub fn initrd(&self) -> Option<&str> {
        self.option_value(INITRD_KEYWORD)
    }

    /// The kernel command line from the `options` keyword.
    pub fn kernel_options(&self) -> Option<&str> {
        self.option_value(OPTIONS_KEYWORD)
    }

    /// The single `subvol=`/`subvolid=` item inside `rootflags`.
    pub fn subvolume_selector(&self) -> Result<SubvolumeSelector> {
        let options = self
            .kernel_options()
            .ok_or_else(|| self.invalid("has no options line"))?;

        let (_, items) = rootflags_items(options).map_err(|reason| self.invalid(&reason))?;
        let mut selectors = items.iter().filter_map(|item| SubvolumeSelector::parse(item));

        match (selectors.next(), selectors.next()) {
            (Some(selector), None) => Ok(selector),
            (None, _) => Err(self.invalid("rootflags has no subvol or subvolid item")),
            (Some(_), Some(_)) => Err(self.invalid("rootflags has more than one subvolume item")),
        }
    }

    /// Clone this entry for another subvolume.
    ///
    /// Only the title and the `rootflags` subvolume item change; every other
    /// byte of the entry is carried over.
    pub fn derive(&self, title: &str, selector: &SubvolumeSelector) -> Result<BootMenuEntry> {
        let (idx, _, value) = self
            .top_level()
            .into_iter()
            .find(|(_, kw, _)| *kw == OPTIONS_KEYWORD)
            .ok_or_else(|| self.invalid("has no options line"))?;

        let options = grammar::unquote(value).map_err(|reason| self.invalid(&reason))?;
        let rewritten =
            rewrite_subvolume(options, selector).map_err(|reason| self.invalid(&reason))?;

        let raw = &self.body[idx];
        let value_start = raw
            .find(value)
            .ok_or_else(|| self.invalid("options line changed while rewriting"))?;
        let value_end = value_start + value.len();
        let quoted = value.starts_with('"');
        let new_value = if quoted {
            format!("\"{rewritten}\"")
        } else {
            rewritten
        };

        let mut derived = self.clone();
        derived.body[idx] = format!("{}{}{}", &raw[..value_start], new_value, &raw[value_end..]);
        derived.retitle(title);
        derived.managed = true;
        Ok(derived)
    }

    /// Quote `title` into the header; embedded `"` would end the quoted
    /// title early, so they become `'`.
    fn retitle(&mut self, title: &str) {
        let title = title.replace('"', "'");
        let (start, end) = self.title_span;
        let first = &self.header[0];
        let quoted = format!("\"{title}\"");
        let replaced = format!("{}{}{}", &first[..start], quoted, &first[end..]);
        self.title_span = (start, start + quoted.len());
        self.header[0] = replaced;
        self.title = title;
    }

    pub fn render(&self) -> String {
        let mut lines: Vec<&str> = self.header.iter().map(String::as_str).collect();
        lines.extend(self.body.iter().map(String::as_str));
        lines.push(&self.footer);
        lines.join("\n")
    }

    fn invalid(&self, reason: &str) -> RefindError {
        RefindError::InvalidEntry {
            title: self.title.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Locate the one `rootflags=` token and split its comma-separated items.
fn rootflags_items(options: &str) -> std::result::Result<(usize, Vec<String>), String> {
    let mut found = grammar::split_boot_options(options)
        .into_iter()
        .enumerate()
        .filter_map(|(idx, token)| match BootOption::parse(token) {
            BootOption::Parameterized { key, value } if key == ROOTFLAGS_OPTION => Some((idx, value)),
            _ => None,
        });

    match (found.next(), found.next()) {
        (Some((idx, value)), None) => Ok((
            idx,
            value.split(COLUMN_SEPARATOR).map(String::from).collect(),
        )),
        (None, _) => Err("options line has no rootflags".to_string()),
        (Some(_), Some(_)) => Err("options line has more than one rootflags".to_string()),
    }
}

/// Replace the subvolume item of the `rootflags` token in `options`.
pub fn rewrite_subvolume(
    options: &str,
    selector: &SubvolumeSelector,
) -> std::result::Result<String, String> {
    let (token_idx, items) = rootflags_items(options)?;

    let positions: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| SubvolumeSelector::parse(item).is_some())
        .map(|(idx, _)| idx)
        .collect();

    let &[position] = positions.as_slice() else {
        return Err(format!(
            "rootflags must contain exactly one subvol or subvolid item, found {}",
            positions.len()
        ));
    };

    let replacement = selector.to_string();
    let items: Vec<&str> = items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            if idx == position {
                replacement.as_str()
            } else {
                item.as_str()
            }
        })
        .collect();

    let rootflags = format!(
        "{ROOTFLAGS_PREFIX}{}",
        items.join(&COLUMN_SEPARATOR.to_string())
    );
    let tokens: Vec<String> = grammar::split_boot_options(options)
        .into_iter()
        .enumerate()
        .map(|(idx, token)| {
            if idx == token_idx {
                rootflags.clone()
            } else {
                token.to_string()
            }
        })
        .collect();

    Ok(grammar::join_boot_options(&tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_config;

    const CONFIG: &str = "menuentry \"Arch Linux\" {\n    icon     /EFI/refind/icons/os_arch.png\n    volume   \"Arch Linux\"\n    loader   /boot/vmlinuz-linux\n    initrd   /boot/initramfs-linux.img\n    options  \"root=PARTUUID=5028fa50 rw  rootflags=compress=zstd,subvol=@,ssd add_efi_memmap\"\n    submenuentry \"Boot using fallback initramfs\" {\n        initrd /boot/initramfs-linux-fallback.img\n    }\n}";

    fn entry() -> BootMenuEntry {
        parse_config(std::path::Path::new("refind.conf"), CONFIG)
            .unwrap()
            .entries
            .remove(0)
    }

    #[test]
    fn exposes_loader_initrd_and_options() {
        let entry = entry();
        assert_eq!(entry.title(), "Arch Linux");
        assert_eq!(entry.loader(), Some("/boot/vmlinuz-linux"));
        // submenu initrd must not shadow the entry's own
        assert_eq!(entry.initrd(), Some("/boot/initramfs-linux.img"));
        assert_eq!(
            entry.kernel_options(),
            Some("root=PARTUUID=5028fa50 rw  rootflags=compress=zstd,subvol=@,ssd add_efi_memmap")
        );
    }

    #[test]
    fn finds_subvolume_selector() {
        assert_eq!(
            entry().subvolume_selector().unwrap(),
            SubvolumeSelector {
                key: SubvolumeKey::Path,
                value: "@".to_string()
            }
        );
    }

    #[test]
    fn derive_rewrites_only_the_subvolume_item() {
        let template = entry();
        let selector = SubvolumeSelector {
            key: SubvolumeKey::Path,
            value: "@snapshots/12/snapshot".to_string(),
        };
        let derived = template.derive("Arch Linux (12)", &selector).unwrap();

        assert_eq!(derived.header[0], "menuentry \"Arch Linux (12)\" {");
        assert!(derived.is_managed());

        let changed: Vec<(&String, &String)> = template
            .body()
            .iter()
            .zip(derived.body())
            .filter(|(a, b)| a != b)
            .collect();
        assert_eq!(changed.len(), 1);
        assert_eq!(
            changed[0].1,
            "    options  \"root=PARTUUID=5028fa50 rw  rootflags=compress=zstd,subvol=@snapshots/12/snapshot,ssd add_efi_memmap\""
        );
    }

    #[test]
    fn derive_can_switch_to_subvolid() {
        let selector = SubvolumeSelector {
            key: SubvolumeKey::Id,
            value: "301".to_string(),
        };
        let derived = entry().derive("x", &selector).unwrap();
        assert_eq!(
            derived.subvolume_selector().unwrap().to_string(),
            "subvolid=301"
        );
    }

    #[test]
    fn derived_titles_stay_parseable() {
        let config = "menuentry Foo\"bar {\n    options \"rootflags=subvol=@\"\n}\n";
        let template = parse_config(std::path::Path::new("refind.conf"), config)
            .unwrap()
            .entries
            .remove(0);
        assert_eq!(template.title(), "Foo\"bar");

        let selector = SubvolumeSelector {
            key: SubvolumeKey::Path,
            value: "@snapshots/1/snapshot".to_string(),
        };
        let derived = template
            .derive(&format!("{} (1)", template.title()), &selector)
            .unwrap();
        assert_eq!(derived.title(), "Foo'bar (1)");

        let reparsed = parse_config(std::path::Path::new("generated.conf"), &derived.render()).unwrap();
        assert_eq!(reparsed.entries[0].title(), "Foo'bar (1)");
    }

    #[test]
    fn rejects_ambiguous_or_missing_selectors() {
        let selector = SubvolumeSelector {
            key: SubvolumeKey::Path,
            value: "@x".to_string(),
        };
        assert!(rewrite_subvolume("root=/dev/sda2 rw", &selector).is_err());
        assert!(rewrite_subvolume("rootflags=subvol=@,subvolid=256", &selector).is_err());
        assert!(rewrite_subvolume("rootflags=compress=zstd", &selector).is_err());
        assert_eq!(
            rewrite_subvolume("rw rootflags=subvolid=256", &selector).unwrap(),
            "rw rootflags=subvol=@x"
        );
    }
}
