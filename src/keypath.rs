// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Key path resolution for in-place JSON edits.
//!
//! A __key path__ addresses a value inside a JSON document through a chain of
//! object keys separated by dots, e.g., `editor.fontSize`. Editors love to use
//! dots inside their own setting names, e.g., `workbench.colorTheme` is a
//! single key in VS Code's settings file. So a backslash escapes the next
//! character, making `workbench\.colorTheme` one segment instead of two.
//!
//! Key paths only ever address objects. Setting a value creates missing
//! intermediate objects, and replaces whatever sat in the way, regardless of
//! its type.

use serde_json::{Map, Value};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Parsed key path.
///
/// # Invariant
///
/// - Always holds at least one segment.
/// - No segment is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    segments: Vec<String>,
}

impl KeyPath {
    /// Parse key path from its textual form.
    ///
    /// # Errors
    ///
    /// - Return [`KeyPathError::EmptySegment`] if path or any segment is
    ///   empty.
    /// - Return [`KeyPathError::DanglingEscape`] if path ends in the middle of
    ///   an escape sequence.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(KeyPathError::EmptySegment(raw.into()));
        }

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut escaped = false;

        for ch in trimmed.chars() {
            if escaped {
                current.push(ch);
                escaped = false;
                continue;
            }

            match ch {
                '\\' => escaped = true,
                '.' => {
                    if current.is_empty() {
                        return Err(KeyPathError::EmptySegment(raw.into()));
                    }
                    segments.push(std::mem::take(&mut current));
                }
                _ => current.push(ch),
            }
        }

        if escaped {
            return Err(KeyPathError::DanglingEscape(raw.into()));
        }

        if current.is_empty() {
            return Err(KeyPathError::EmptySegment(raw.into()));
        }
        segments.push(current);

        Ok(Self { segments })
    }

    /// Object key segments in traversal order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Set value at key path inside JSON document.
    ///
    /// Missing intermediate keys become empty objects. Anything that is not
    /// an object along the way, including the document root, is replaced by
    /// an object. The terminal key is overwritten no matter what it held.
    pub fn set(&self, document: &mut Value, value: Value) {
        let Some((last, parents)) = self.segments.split_last() else {
            return;
        };

        let mut current = document;
        for segment in parents {
            let object = ensure_object(current);
            current = object
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }

        ensure_object(current).insert(last.clone(), value);
    }

    /// Lookup value at key path.
    pub fn get<'doc>(&self, document: &'doc Value) -> Option<&'doc Value> {
        self.segments
            .iter()
            .try_fold(document, |current, segment| current.get(segment))
    }
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }

    match value {
        Value::Object(object) => object,
        _ => unreachable!("value was just replaced with an object"),
    }
}

impl FromStr for KeyPath {
    type Err = KeyPathError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl Display for KeyPath {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let escaped = self
            .segments
            .iter()
            .map(|segment| segment.replace('\\', "\\\\").replace('.', "\\."))
            .collect::<Vec<_>>();
        fmt.write_str(&escaped.join("."))
    }
}

/// Key path parsing error types.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum KeyPathError {
    /// Key path is empty, or contains an empty segment.
    #[error("malformed key path {0:?}: key path contains an empty segment")]
    EmptySegment(String),

    /// Key path ends with a lone escape character.
    #[error("malformed key path {0:?}: key path ends with an escape character")]
    DanglingEscape(String),
}

/// Friendly result alias :3
type Result<T, E = KeyPathError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use simple_test_case::test_case;

    #[test_case("theme.colors.primary", &["theme", "colors", "primary"]; "basic")]
    #[test_case("workbench\\.colorTheme", &["workbench.colorTheme"]; "escaped dot")]
    #[test_case("workbench\\.colorTheme.ui", &["workbench.colorTheme", "ui"]; "mixed escape")]
    #[test_case("a\\\\b.c", &["a\\b", "c"]; "escaped backslash")]
    #[test_case("  theme  ", &["theme"]; "trimmed")]
    #[test]
    fn parse_splits_on_unescaped_dots(input: &str, expect: &[&str]) {
        use pretty_assertions::assert_eq;
        let result = KeyPath::parse(input).expect("valid key path");
        assert_eq!(result.segments(), expect);
    }

    #[test]
    fn parse_trailing_escape_is_error() {
        let result = KeyPath::parse("workbench\\.colorTheme\\");
        assert!(matches!(result, Err(KeyPathError::DanglingEscape(_))));
        assert!(result.unwrap_err().to_string().contains("escape"));
    }

    #[test_case("workbench..colorTheme"; "double dot")]
    #[test_case(".theme"; "leading dot")]
    #[test_case("theme."; "trailing dot")]
    #[test_case("   "; "blank")]
    #[test]
    fn parse_empty_segment_is_error(input: &str) {
        assert!(matches!(
            KeyPath::parse(input),
            Err(KeyPathError::EmptySegment(_))
        ));
    }

    #[test]
    fn display_round_trips_escapes() {
        let path = KeyPath::parse("workbench\\.colorTheme.a\\\\b").unwrap();
        assert_eq!(path.to_string(), "workbench\\.colorTheme.a\\\\b");
        assert_eq!(path.to_string().parse::<KeyPath>().unwrap(), path);
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut document = json!({ "editor.fontSize": 14 });
        KeyPath::parse("misfit.panels.glow").unwrap().set(&mut document, json!(true));
        assert_eq!(
            document,
            json!({ "editor.fontSize": 14, "misfit": { "panels": { "glow": true } } })
        );
    }

    #[test]
    fn set_escaped_key_stays_flat() {
        let mut document = json!({});
        KeyPath::parse("workbench\\.colorTheme")
            .unwrap()
            .set(&mut document, json!("Neon"));
        assert_eq!(document, json!({ "workbench.colorTheme": "Neon" }));
    }

    #[test]
    fn set_overwrites_type_of_existing_values() {
        let mut document = json!({ "custom": "plain", "deep": 3 });
        KeyPath::parse("custom").unwrap().set(&mut document, json!({ "a": 1 }));
        KeyPath::parse("deep.inner").unwrap().set(&mut document, json!([1, 2]));
        assert_eq!(
            document,
            json!({ "custom": { "a": 1 }, "deep": { "inner": [1, 2] } })
        );
    }

    #[test]
    fn set_replaces_non_object_root() {
        let mut document = json!([1, 2, 3]);
        KeyPath::parse("theme").unwrap().set(&mut document, json!("dark"));
        assert_eq!(document, json!({ "theme": "dark" }));
    }

    #[test]
    fn get_follows_segments() {
        let document = json!({ "a": { "b.c": 5 } });
        assert_eq!(KeyPath::parse("a.b\\.c").unwrap().get(&document), Some(&json!(5)));
        assert_eq!(KeyPath::parse("a.missing").unwrap().get(&document), None);
    }
}
