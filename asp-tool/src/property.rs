// SPDX-License-Identifier: MIT

//! The Android property store: key/value map with multi-file merge and
//! `${key}` expansion (spec §4.1).

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyStore {
    props: BTreeMap<String, String>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.props.insert(key.into(), value.into());
    }

    pub fn get_default<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Try each key in order, returning the value of the first one present
    /// (not the first non-empty one — an explicit empty-string property
    /// still wins), matching `get_multi_default`.
    pub fn get_any<'a>(&'a self, keys: &[&str], default: &'a str) -> &'a str {
        for &key in keys {
            if let Some(v) = self.get(key) {
                return v;
            }
        }
        default
    }

    pub fn merge(&mut self, other: &BTreeMap<String, String>) {
        for (k, v) in other {
            self.props.insert(k.clone(), v.clone());
        }
    }

    /// Parse `key = value` lines from text, ignoring `#` comments, blank
    /// lines, and `import` lines, then merge the result in (overwriting any
    /// existing keys), matching `AndroidPropertyList.from_file`.
    pub fn merge_text(&mut self, text: &str) {
        let mut parsed = BTreeMap::new();

        for line in text.lines() {
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("import") {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim();
                if key.is_empty() {
                    continue;
                }
                parsed.insert(key.to_string(), value.to_string());
            }
        }

        self.merge(&parsed);
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut store = Self::new();
        store.merge_text(&text);
        Ok(store)
    }

    /// Expand every `${KEY}` occurrence in `s`, substituting the property
    /// value or an empty string when the key is unset. Unexpanded text
    /// (including a `${` with no matching `}`) is preserved verbatim.
    pub fn expand(&self, s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        let bytes = s.as_bytes();
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
                if let Some(end) = s[i + 2..].find('}') {
                    let key = &s[i + 2..i + 2 + end];
                    out.push_str(self.get(key).unwrap_or(""));
                    i = i + 2 + end + 1;
                    continue;
                }
            }
            // Push one UTF-8 char worth of bytes.
            let ch_len = utf8_char_len(bytes[i]);
            out.push_str(&s[i..i + ch_len]);
            i += ch_len;
        }

        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.props.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serialize as `KEY=VALUE` lines, matching `to_file`.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.props {
            out.push_str(k);
            out.push('=');
            out.push_str(v);
            out.push('\n');
        }
        out
    }
}

fn utf8_char_len(first_byte: u8) -> usize {
    if first_byte & 0x80 == 0 {
        1
    } else if first_byte & 0xE0 == 0xC0 {
        2
    } else if first_byte & 0xF0 == 0xE0 {
        3
    } else {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_text_ignores_comments_and_imports() {
        let mut store = PropertyStore::new();
        store.merge_text("# comment\nimport /init.rc\nro.debuggable = 1\n\nro.build.type=user\n");
        assert_eq!(store.get("ro.debuggable"), Some("1"));
        assert_eq!(store.get("ro.build.type"), Some("user"));
    }

    #[test]
    fn get_any_returns_first_present_key_even_if_empty() {
        let mut store = PropertyStore::new();
        store.set("ro.hardware.first", "");
        store.set("ro.hardware.second", "qcom");
        assert_eq!(
            store.get_any(&["ro.hardware.first", "ro.hardware.second"], "default"),
            ""
        );
        assert_eq!(
            store.get_any(&["ro.hardware.missing", "ro.hardware.second"], "default"),
            "qcom"
        );
    }

    #[test]
    fn expand_substitutes_known_keys_and_empties_unknown() {
        let mut store = PropertyStore::new();
        store.set("ro.hardware", "qcom");
        assert_eq!(
            store.expand("/vendor/lib/${ro.hardware}/libfoo.so"),
            "/vendor/lib/qcom/libfoo.so"
        );
        assert_eq!(store.expand("${ro.missing}x"), "x");
    }

    #[test]
    fn expand_preserves_unterminated_braces() {
        let store = PropertyStore::new();
        assert_eq!(store.expand("${unterminated"), "${unterminated");
    }

    #[test]
    fn merge_overwrites_existing_keys() {
        let mut store = PropertyStore::new();
        store.set("a", "1");
        let mut other = BTreeMap::new();
        other.insert("a".to_string(), "2".to_string());
        store.merge(&other);
        assert_eq!(store.get("a"), Some("2"));
    }
}
