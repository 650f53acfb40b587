// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Marker block patching.
//!
//! A __marker block__ is a region of a text file delimited by a start marker
//! and an end marker, e.g., `/* neon:start */` and `/* neon:end */`. Whatever
//! sits between the two markers belongs to us, and everything else belongs to
//! the application that owns the file.
//!
//! # Patch Modes
//!
//! In block mode the markers are written back around the new content. Thus,
//! patching the same file again simply swaps the old block for the new one
//! instead of stacking a second copy on top of it. If the start marker cannot
//! be found, the block is appended to the end of the file as a first install.
//!
//! In one-shot mode the markers are stripped, and the content takes their
//! place for good. The file ends up cleaner, but it can no longer be
//! re-patched through the same markers.

use crate::fs_utils::write_atomic;

use std::{collections::BTreeMap, fs, io, path::Path, path::PathBuf};
use tracing::{debug, instrument};

/// How patched content is written into a file.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchMode {
    /// Keep markers around content so the block can be patched again.
    #[default]
    Block,

    /// Strip markers so content replaces them permanently.
    OneShot,
}

impl PatchMode {
    /// Select patch mode from manifest advanced mode flag.
    pub fn from_advanced(advanced: bool) -> Self {
        if advanced {
            Self::OneShot
        } else {
            Self::Block
        }
    }
}

/// What patching did to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Existing marker block was replaced.
    Replaced,

    /// No marker block existed, so content was appended.
    Appended,
}

/// Start and end marker pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Markers<'a> {
    pub start: &'a str,
    pub end: &'a str,
}

impl<'a> Markers<'a> {
    /// Construct new marker pair.
    pub fn new(start: &'a str, end: &'a str) -> Self {
        Self { start, end }
    }

    /// Patch text in memory.
    ///
    /// Only the first start marker, and the first end marker after it, are
    /// considered. Any later marker pairs are left alone.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::UnterminatedBlock`] if start marker has no end
    ///   marker after it.
    pub fn patch(
        &self,
        text: &str,
        content: &str,
        mode: PatchMode,
    ) -> Result<(String, PatchOutcome), PatchError> {
        let block = match mode {
            PatchMode::Block => format!("{}{content}{}", self.start, self.end),
            PatchMode::OneShot => content.replace(self.start, "").replace(self.end, ""),
        };

        let Some(start_idx) = text.find(self.start) else {
            let mut out = String::with_capacity(text.len() + block.len() + 2);
            out.push_str(text);
            out.push('\n');
            out.push_str(&block);
            out.push('\n');
            return Ok((out, PatchOutcome::Appended));
        };

        let search_from = start_idx + self.start.len();
        let end_idx = text[search_from..]
            .find(self.end)
            .map(|offset| search_from + offset + self.end.len())
            .ok_or_else(|| PatchError::UnterminatedBlock {
                start_marker: self.start.into(),
                end_marker: self.end.into(),
            })?;

        let mut out = String::with_capacity(text.len() + block.len());
        out.push_str(&text[..start_idx]);
        out.push_str(&block);
        out.push_str(&text[end_idx..]);

        Ok((out, PatchOutcome::Replaced))
    }

    /// Patch file on disk.
    ///
    /// Target is rewritten through a temporary file, so it is never left half
    /// patched.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::MissingPatchTarget`] if target does not exist.
    /// - Return [`PatchError::UnterminatedBlock`] if markers are unbalanced.
    /// - Return [`PatchError::Read`] or [`PatchError::Write`] on I/O failure.
    #[instrument(skip(self, content), level = "debug")]
    pub fn patch_file(
        &self,
        target: &Path,
        content: &str,
        mode: PatchMode,
    ) -> Result<PatchOutcome, PatchError> {
        let text = match fs::read_to_string(target) {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(PatchError::MissingPatchTarget(target.to_path_buf()))
            }
            Err(source) => {
                return Err(PatchError::Read {
                    source,
                    path: target.to_path_buf(),
                })
            }
        };

        let (patched, outcome) = self.patch(&text, content, mode)?;
        debug!("{outcome:?} marker block in {:?}", target.display());
        write_atomic(target, patched).map_err(|source| PatchError::Write {
            source,
            path: target.to_path_buf(),
        })?;

        Ok(outcome)
    }
}

/// Apply literal token substitutions to content.
///
/// Tokens are substituted in key order, one after the other.
pub fn apply_replacements(content: &str, replacements: &BTreeMap<String, String>) -> String {
    replacements
        .iter()
        .filter(|(token, _)| !token.is_empty())
        .fold(content.to_owned(), |acc, (token, value)| {
            acc.replace(token.as_str(), value)
        })
}

/// Marker patching error types.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// File to patch does not exist.
    #[error("patch target {:?} does not exist", .0.display())]
    MissingPatchTarget(PathBuf),

    /// Start marker was found, but no end marker follows it.
    #[error("start marker {start_marker:?} has no matching end marker {end_marker:?}")]
    UnterminatedBlock {
        start_marker: String,
        end_marker: String,
    },

    #[error("failed to read patch target {:?}", path.display())]
    Read {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error("failed to write patch target {:?}", path.display())]
    Write {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    const START: &str = "/* neon:start */";
    const END: &str = "/* neon:end */";

    #[test]
    fn patch_appends_when_start_marker_missing() -> anyhow::Result<()> {
        let markers = Markers::new(START, END);
        let (result, outcome) = markers.patch("body {}", "\n.glow {}\n", PatchMode::Block)?;

        let expect = indoc! {"
            body {}
            /* neon:start */
            .glow {}
            /* neon:end */
        "};
        assert_eq!(result, expect);
        assert_eq!(outcome, PatchOutcome::Appended);
        assert_eq!(result.matches(START).count(), 1);

        Ok(())
    }

    #[test]
    fn patch_twice_leaves_one_block() -> anyhow::Result<()> {
        let markers = Markers::new(START, END);
        let (first, _) = markers.patch("body {}\n", "\n.one {}\n", PatchMode::Block)?;
        let (second, outcome) = markers.patch(&first, "\n.two {}\n", PatchMode::Block)?;

        assert_eq!(outcome, PatchOutcome::Replaced);
        assert_eq!(second.matches(START).count(), 1);
        assert_eq!(second.matches(END).count(), 1);
        assert!(!second.contains(".one"));
        assert!(second.contains(".two"));
        assert!(second.starts_with("body {}\n"));

        Ok(())
    }

    #[test]
    fn patch_replaces_first_block_only() -> anyhow::Result<()> {
        let markers = Markers::new("<s>", "<e>");
        let text = "a<s>old<e>b<s>keep<e>c";
        let (result, _) = markers.patch(text, "new", PatchMode::Block)?;
        assert_eq!(result, "a<s>new<e>b<s>keep<e>c");

        Ok(())
    }

    #[test]
    fn patch_one_shot_strips_markers() -> anyhow::Result<()> {
        let markers = Markers::new("<s>", "<e>");
        let (result, outcome) =
            markers.patch("a<s>old<e>b", "<s>fresh<e>", PatchMode::OneShot)?;
        assert_eq!(result, "afreshb");
        assert_eq!(outcome, PatchOutcome::Replaced);

        let (result, outcome) = markers.patch("a", "fresh", PatchMode::OneShot)?;
        assert_eq!(result, "a\nfresh\n");
        assert_eq!(outcome, PatchOutcome::Appended);

        Ok(())
    }

    #[test]
    fn patch_unterminated_block_is_error() {
        let markers = Markers::new(START, END);
        let result = markers.patch("x /* neon:start */ dangling", "y", PatchMode::Block);
        assert!(matches!(result, Err(PatchError::UnterminatedBlock { .. })));
    }

    #[test]
    fn replacements_apply_in_key_order() {
        let replacements = BTreeMap::from([
            ("{{accent}}".to_string(), "#f0f".to_string()),
            ("{{glow}}".to_string(), "{{accent}}".to_string()),
            (String::new(), "ignored".to_string()),
        ]);
        let result = apply_replacements("color: {{accent}}; glow: {{glow}};", &replacements);
        assert_eq!(result, "color: #f0f; glow: {{accent}};");
    }

    #[sealed_test]
    fn patch_file_missing_target_is_error() {
        let markers = Markers::new(START, END);
        let result = markers.patch_file(Path::new("missing.css"), "x", PatchMode::Block);
        assert!(matches!(result, Err(PatchError::MissingPatchTarget(_))));
        assert!(!Path::new("missing.css").exists());
    }

    #[sealed_test]
    fn patch_file_rewrites_target() -> anyhow::Result<()> {
        fs::write("workbench.css", "body {}\n")?;
        let markers = Markers::new(START, END);
        markers.patch_file(Path::new("workbench.css"), "\n.a {}\n", PatchMode::Block)?;
        markers.patch_file(Path::new("workbench.css"), "\n.b {}\n", PatchMode::Block)?;

        let expect = indoc! {"
            body {}

            /* neon:start */
            .b {}
            /* neon:end */
        "};
        assert_eq!(fs::read_to_string("workbench.css")?, expect);

        Ok(())
    }
}
