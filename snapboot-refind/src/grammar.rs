// SPDX-License-Identifier: GPL-3.0-only

//! Lexical rules of the rEFInd configuration language

pub const MENUENTRY_KEYWORD: &str = "menuentry";
pub const SUBMENUENTRY_KEYWORD: &str = "submenuentry";
pub const INCLUDE_KEYWORD: &str = "include";
pub const OPTIONS_KEYWORD: &str = "options";
pub const LOADER_KEYWORD: &str = "loader";
pub const INITRD_KEYWORD: &str = "initrd";

pub const ROOTFLAGS_OPTION: &str = "rootflags";
pub const ROOTFLAGS_PREFIX: &str = "rootflags=";
pub const SUBVOL_OPTION: &str = "subvol";
pub const SUBVOLID_OPTION: &str = "subvolid";

pub const PARAMETERIZED_OPTION_SEPARATOR: char = '=';
pub const BOOT_OPTION_SEPARATOR: char = ' ';
pub const COLUMN_SEPARATOR: char = ',';

/// `^\s*#.*`
pub fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// `^include .+$`; returns the include target.
pub fn include_target(line: &str) -> Option<&str> {
    line.strip_prefix(INCLUDE_KEYWORD)
        .and_then(|rest| rest.strip_prefix(' '))
        .map(str::trim_end)
        .filter(|target| !target.trim().is_empty())
        .map(str::trim)
}

/// `^\S+=`: a `key=value` token with no whitespace before the separator.
pub fn is_parameterized(token: &str) -> bool {
    match token.find(PARAMETERIZED_OPTION_SEPARATOR) {
        Some(0) | None => false,
        Some(idx) => !token[..idx].chars().any(char::is_whitespace),
    }
}

/// Whether `line` opens a block introduced by `keyword`.
pub fn starts_block(line: &str, keyword: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed
        .strip_prefix(keyword)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
}

pub fn is_block_open(line: &str) -> bool {
    line.trim() == "{"
}

pub fn is_block_close(line: &str) -> bool {
    line.trim() == "}"
}

/// Split an entry line into its keyword and the raw value that follows.
pub fn keyword_and_value(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || is_comment(trimmed) {
        return None;
    }

    match trimmed.find(char::is_whitespace) {
        Some(idx) => Some((&trimmed[..idx], trimmed[idx..].trim_start())),
        None => Some((trimmed, "")),
    }
}

/// Strip surrounding double quotes; an opening quote without a closing one
/// is a syntax error.
pub fn unquote(value: &str) -> Result<&str, String> {
    match value.strip_prefix('"') {
        Some(inner) => inner
            .strip_suffix('"')
            .ok_or_else(|| format!("unterminated quote in '{value}'")),
        None => Ok(value),
    }
}

/// One token of a kernel options line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootOption {
    Parameterized { key: String, value: String },
    Bare(String),
}

impl BootOption {
    pub fn parse(token: &str) -> Self {
        if is_parameterized(token) {
            if let Some((key, value)) = token.split_once(PARAMETERIZED_OPTION_SEPARATOR) {
                return BootOption::Parameterized {
                    key: key.to_string(),
                    value: value.to_string(),
                };
            }
        }
        BootOption::Bare(token.to_string())
    }
}

/// Tokens of an options line. Splitting on the single-space separator keeps
/// empty tokens so joining them restores the original text exactly.
pub fn split_boot_options(options: &str) -> Vec<&str> {
    options.split(BOOT_OPTION_SEPARATOR).collect()
}

pub fn join_boot_options(tokens: &[String]) -> String {
    tokens.join(&BOOT_OPTION_SEPARATOR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_comments_and_includes() {
        assert!(is_comment("   # timeout 20"));
        assert!(!is_comment("timeout 20 # trailing"));
        assert_eq!(include_target("include themes/rEFInd-minimal/theme.conf"), Some("themes/rEFInd-minimal/theme.conf"));
        assert_eq!(include_target("include "), None);
        assert_eq!(include_target("  include manual.conf"), None);
        assert_eq!(include_target("includes manual.conf"), None);
    }

    #[test]
    fn recognises_parameterized_options() {
        assert!(is_parameterized("root=PARTUUID=abcd"));
        assert!(is_parameterized("rootflags=subvol=@"));
        assert!(!is_parameterized("rw"));
        assert!(!is_parameterized("=value"));
        assert_eq!(
            BootOption::parse("rootflags=subvol=@"),
            BootOption::Parameterized {
                key: "rootflags".to_string(),
                value: "subvol=@".to_string()
            }
        );
        assert_eq!(BootOption::parse("quiet"), BootOption::Bare("quiet".to_string()));
    }

    #[test]
    fn splits_keywords_and_quoted_values() {
        assert_eq!(
            keyword_and_value("    options \"root=UUID=1 rw\""),
            Some(("options", "\"root=UUID=1 rw\""))
        );
        assert_eq!(keyword_and_value("\tdisabled"), Some(("disabled", "")));
        assert_eq!(unquote("\"a b\""), Ok("a b"));
        assert_eq!(unquote("plain"), Ok("plain"));
        assert!(unquote("\"open").is_err());
    }

    #[test]
    fn split_and_join_preserve_spacing() {
        let line = "root=UUID=1  rw quiet";
        let tokens: Vec<String> = split_boot_options(line).into_iter().map(String::from).collect();
        assert_eq!(tokens.len(), 4);
        assert_eq!(join_boot_options(&tokens), line);
    }

    #[test]
    fn detects_block_keywords() {
        assert!(starts_block("menuentry \"Arch Linux\" {", MENUENTRY_KEYWORD));
        assert!(starts_block("  submenuentry \"Fallback\" {", SUBMENUENTRY_KEYWORD));
        assert!(!starts_block("menuentryfoo", MENUENTRY_KEYWORD));
        assert!(!starts_block("submenuentry x", MENUENTRY_KEYWORD));
    }
}
