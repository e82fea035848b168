// SPDX-License-Identifier: MIT

//! `file_contexts` parsing: `REGEX [MODE-FLAG] CONTEXT` lines, compiled and
//! ready for the Label Resolver's longest-literal-prefix matching (spec
//! §4.3, §6).

use regex::Regex;
use tracing::error;

use crate::context::SELinuxContext;

/// stat(2) file-type bits, matching the `-b -c -d -p -- -l -s` mode flags
/// `file_contexts` uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeFlag {
    Block,
    Char,
    Dir,
    Fifo,
    Regular,
    Symlink,
    Socket,
}

impl ModeFlag {
    fn from_flag(flag: &str) -> Option<ModeFlag> {
        match flag {
            "-b" => Some(ModeFlag::Block),
            "-c" => Some(ModeFlag::Char),
            "-d" => Some(ModeFlag::Dir),
            "-p" => Some(ModeFlag::Fifo),
            "--" => Some(ModeFlag::Regular),
            "-l" => Some(ModeFlag::Symlink),
            "-s" => Some(ModeFlag::Socket),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileContextRule {
    pub pattern: String,
    pub regex: Regex,
    pub mode: Option<ModeFlag>,
    pub context: SELinuxContext,
    /// Length, in characters, of the prefix of `pattern` before the first
    /// regex metacharacter. Precomputed once at parse time since the
    /// label resolver consults it for every path in the VFS.
    pub literal_prefix_len: usize,
}

const METACHARACTERS: &[char] = &['.', '^', '$', '?', '*', '+', '|', '[', '(', '{'];

fn literal_prefix_len(pattern: &str) -> usize {
    match pattern.find(METACHARACTERS) {
        Some(byte_idx) => pattern[..byte_idx].chars().count(),
        None => pattern.chars().count(),
    }
}

/// Parse a `file_contexts`-format text blob into compiled rules. Malformed
/// lines (wrong field count, regex that fails to compile) are logged and
/// skipped; subsequent lines still load, matching spec §7's recoverable
/// parsing policy and §8's boundary behavior ("subsequent lines still
/// load").
pub fn parse(text: &str) -> Vec<FileContextRule> {
    let mut rules = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let collapsed: String = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
        let components: Vec<&str> = collapsed.split(' ').collect();

        let (pattern, mode, context_str) = match components.as_slice() {
            [pattern, mode_flag, context] => {
                let Some(mode) = ModeFlag::from_flag(mode_flag) else {
                    error!(
                        "file_contexts line {}: unknown mode flag {:?}",
                        line_no + 1,
                        mode_flag
                    );
                    continue;
                };
                (*pattern, Some(mode), *context)
            }
            [pattern, context] => (*pattern, None, *context),
            _ => {
                error!(
                    "file_contexts line {}: malformed entry {:?}",
                    line_no + 1,
                    trimmed
                );
                continue;
            }
        };

        // Every pattern is anchored whole-path, even if the author already
        // wrote ^...$ themselves (matching the original's unconditional
        // re-wrap; spec SPEC_FULL §C.5).
        let anchored = format!("^{pattern}$");
        let regex = match Regex::new(&anchored) {
            Ok(r) => r,
            Err(_) => {
                error!("file_contexts line {}: invalid regex {:?}", line_no + 1, pattern);
                continue;
            }
        };

        let context: SELinuxContext = match context_str.parse() {
            Ok(c) => c,
            Err(_) => {
                error!(
                    "file_contexts line {}: invalid context {:?}",
                    line_no + 1,
                    context_str
                );
                continue;
            }
        };

        rules.push(FileContextRule {
            literal_prefix_len: literal_prefix_len(pattern),
            pattern: pattern.to_string(),
            regex,
            mode,
            context,
        });
    }

    rules
}

/// Find the file-context match for `path`, breaking ties toward the
/// longest literal prefix, then toward the longer pattern (spec §4.3 point
/// 1, §8 boundary behavior).
pub fn best_match<'a>(rules: &'a [FileContextRule], path: &str) -> Option<&'a FileContextRule> {
    rules
        .iter()
        .filter(|rule| rule.regex.is_match(path))
        .max_by(|a, b| {
            a.literal_prefix_len
                .cmp(&b.literal_prefix_len)
                .then(a.pattern.len().cmp(&b.pattern.len()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_literal_prefix_beats_leading_metacharacter() {
        let rules = parse(
            "/exact/literal/path u:object_r:foo_file:s0\n.*anything u:object_r:bar_file:s0\n",
        );
        let m = best_match(&rules, "/exact/literal/path").unwrap();
        assert_eq!(m.context.ty, "foo_file");
    }

    #[test]
    fn tiebreak_prefers_longest_literal_prefix() {
        // Scenario S3 from spec §8.
        let text = "/odm/etc/permissions(/.*)? u:object_r:odm_xml_file:s0\n\
                    /(odm|vendor/odm)/etc(/.*)? u:object_r:vendor_configs_file:s0\n";
        let rules = parse(text);
        let m = best_match(&rules, "/odm/etc/permissions/foo.xml").unwrap();
        assert_eq!(m.context.ty, "odm_xml_file");
    }

    #[test]
    fn invalid_regex_is_dropped_but_parsing_continues() {
        let text = "/bad[ u:object_r:bad_file:s0\n/good u:object_r:good_file:s0\n";
        let rules = parse(text);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].context.ty, "good_file");
    }

    #[test]
    fn mode_flag_is_parsed() {
        let rules = parse("/dev/foo -c u:object_r:foo_device:s0\n");
        assert_eq!(rules[0].mode, Some(ModeFlag::Char));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let rules = parse("# comment\n\n/a u:object_r:a_file:s0\n");
        assert_eq!(rules.len(), 1);
    }
}
