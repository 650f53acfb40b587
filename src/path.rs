// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way: well-known user directories,
//! target path expansion, payload-relative path normalization, and manifest
//! discovery.

use std::{
    borrow::Cow,
    env,
    path::{Component, Path, PathBuf},
};
use tracing::debug;

/// Canonical file name of an install manifest.
pub const MANIFEST_FILE_NAME: &str = "install.manifest.json";

/// Directory inside a bundle that holds the manifest.
pub const MANIFEST_DIR_NAME: &str = "manifests";

/// Name of the sentinel file marking tool-owned build output.
pub const BUILD_SENTINEL: &str = ".misfit-studio";

/// Environment variable overriding the backups root.
pub const BACKUP_ROOT_ENV: &str = "MISFIT_BACKUP_ROOT";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf, NoWayHome> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine absolute path to user's documents directory.
///
/// Falls back to `$HOME/Documents` when the platform does not report a
/// documents directory, e.g., XDG user directories are not configured.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn document_dir() -> Result<PathBuf, NoWayHome> {
    match dirs::document_dir() {
        Some(path) => Ok(path),
        None => home_dir().map(|home| home.join("Documents")),
    }
}

/// Determine root directory of all backup archives.
///
/// Uses `$MISFIT_BACKUP_ROOT` if set, otherwise `Documents/MisfitBackups`.
/// This root doubles as the legacy shared backup location that predates
/// per-application scoping.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_backups_root() -> Result<PathBuf, NoWayHome> {
    if let Some(root) = env::var_os(BACKUP_ROOT_ENV).filter(|root| !root.is_empty()) {
        return Ok(PathBuf::from(root));
    }

    document_dir().map(|docs| docs.join("MisfitBackups"))
}

/// Turn application name into a directory name safe for backup scoping.
///
/// Every character outside `[A-Za-z0-9._-]` becomes `_`. Blank names map to
/// "default".
pub fn backup_namespace(app_name: &str) -> String {
    let trimmed = app_name.trim();
    if trimmed.is_empty() {
        return "default".into();
    }

    sanitize_component(trimmed)
}

/// Replace characters that are unsafe in a single path component.
pub(crate) fn sanitize_component(input: &str) -> String {
    let out: String = input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();

    if out.is_empty() {
        "_".into()
    } else {
        out
    }
}

/// Expand environment variables and leading tilde in target path.
///
/// Supports `~`, `$VAR`, `${VAR}`, and `%VAR%`. Unknown variables are left
/// verbatim so a typo shows up in the resulting path instead of silently
/// collapsing to an empty string.
pub fn expand_target(raw: &str) -> String {
    let percent = expand_percent_vars(raw.trim());
    shellexpand::full_with_context_no_errors(
        &*percent,
        || dirs::home_dir().map(|home| home.to_string_lossy().into_owned()),
        |name| env::var(name).ok(),
    )
    .into_owned()
}

/// Resolve target path against a base directory.
///
/// Performs [`expand_target`] first. Absolute results are returned as is.
pub fn resolve_target(base: &Path, raw: &str) -> PathBuf {
    let expanded = PathBuf::from(expand_target(raw));
    let resolved = if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    };
    debug!("resolved target {raw:?} to {:?}", resolved.display());

    resolved
}

fn expand_percent_vars(input: &str) -> Cow<'_, str> {
    if !input.contains('%') {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('%') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        out.push('%');
                        out.push_str(name);
                        out.push('%');
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('%');
                rest = after;
            }
        }
    }
    out.push_str(rest);

    Cow::Owned(out)
}

/// Normalize a path that must stay relative to some root.
///
/// Drops `.` components. Empty input, or input that normalizes to nothing,
/// is accepted as `.` only if `allow_current` is set.
///
/// # Errors
///
/// - Return [`RelPathError`] if path is empty, absolute, or climbs out with
///   `..`.
pub fn normalize_rel_path(raw: &str, allow_current: bool) -> Result<PathBuf, RelPathError> {
    let trimmed = raw.trim();
    let mut normalized = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(os) => normalized.push(os),
            Component::CurDir => {}
            Component::ParentDir => return Err(RelPathError::ParentDir(trimmed.into())),
            Component::RootDir | Component::Prefix(_) => {
                return Err(RelPathError::NotRelative(trimmed.into()))
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        if allow_current {
            return Ok(PathBuf::from("."));
        }
        return Err(RelPathError::Empty);
    }

    Ok(normalized)
}

/// Validate build project name as exactly one normal path component.
///
/// # Errors
///
/// - Return [`RelPathError`] if name is empty or is anything other than a
///   single folder name.
pub fn validate_project_name(name: &str) -> Result<String, RelPathError> {
    let trimmed = name.trim();
    let mut components = Path::new(trimmed).components();
    let first = components.next().ok_or(RelPathError::Empty)?;
    if components.next().is_some() {
        return Err(RelPathError::NotSingleComponent(trimmed.into()));
    }

    match first {
        Component::Normal(os) => Ok(os.to_string_lossy().into_owned()),
        Component::CurDir => Err(RelPathError::Empty),
        Component::ParentDir => Err(RelPathError::ParentDir(trimmed.into())),
        Component::RootDir | Component::Prefix(_) => Err(RelPathError::NotRelative(trimmed.into())),
    }
}

/// Location of a discovered manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestLocation {
    /// Path to manifest file itself.
    pub manifest: PathBuf,

    /// Directory payload references are rooted under.
    pub bundle_root: PathBuf,
}

impl ManifestLocation {
    /// Locate bundle root of an explicitly given manifest file.
    ///
    /// A manifest inside a `manifests/` directory belongs to the bundle one
    /// level up. Otherwise the manifest's own directory is the bundle root.
    pub fn from_manifest_path(manifest: impl Into<PathBuf>) -> Self {
        let manifest = manifest.into();
        let parent = manifest
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let bundle_root = match (parent.file_name(), parent.parent()) {
            (Some(name), Some(grandparent)) if name == MANIFEST_DIR_NAME => {
                if grandparent.as_os_str().is_empty() {
                    PathBuf::from(".")
                } else {
                    grandparent.to_path_buf()
                }
            }
            _ => parent,
        };

        Self {
            manifest,
            bundle_root,
        }
    }

    /// Directory relative target paths resolve against.
    pub fn install_root(&self) -> PathBuf {
        self.manifest
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Look for a bundled manifest under given base directory.
///
/// Checks `manifests/install.manifest.json` first, then
/// `install.manifest.json` at the top-level.
pub fn locate_manifest(base: &Path) -> Option<ManifestLocation> {
    [
        base.join(MANIFEST_DIR_NAME).join(MANIFEST_FILE_NAME),
        base.join(MANIFEST_FILE_NAME),
    ]
    .into_iter()
    .find(|candidate| candidate.is_file())
    .map(|manifest| ManifestLocation {
        manifest,
        bundle_root: base.to_path_buf(),
    })
}

/// Directory containing the running executable.
pub fn exe_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Relative path normalization error types.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RelPathError {
    #[error("path cannot be empty")]
    Empty,

    #[error("path {0:?} cannot contain '..'")]
    ParentDir(String),

    #[error("path {0:?} must be relative")]
    NotRelative(String),

    #[error("{0:?} must be a single folder name")]
    NotSingleComponent(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    #[test_case("theme/a.css", "theme/a.css"; "plain")]
    #[test_case("./theme/./a.css", "theme/a.css"; "current dir components")]
    #[test_case("  payloads  ", "payloads"; "surrounding whitespace")]
    #[test]
    fn normalize_rel_path_accepts(input: &str, expect: &str) {
        use pretty_assertions::assert_eq;
        assert_eq!(normalize_rel_path(input, false), Ok(PathBuf::from(expect)));
    }

    #[test_case("../etc/passwd"; "parent dir")]
    #[test_case("theme/../../x"; "nested parent dir")]
    #[test_case("/etc/passwd"; "absolute")]
    #[test_case(""; "empty")]
    #[test_case("./"; "current only")]
    #[test]
    fn normalize_rel_path_rejects(input: &str) {
        assert!(normalize_rel_path(input, false).is_err());
    }

    #[test]
    fn normalize_rel_path_allows_current_when_asked() {
        assert_eq!(normalize_rel_path("", true), Ok(PathBuf::from(".")));
        assert_eq!(normalize_rel_path(".", true), Ok(PathBuf::from(".")));
    }

    #[test_case("My Theme!", "My_Theme_"; "spaces and punctuation")]
    #[test_case("  neon-pack_2.0 ", "neon-pack_2.0"; "already safe")]
    #[test_case("   ", "default"; "blank")]
    #[test]
    fn backup_namespace_sanitizes(input: &str, expect: &str) {
        use pretty_assertions::assert_eq;
        assert_eq!(backup_namespace(input), expect);
    }

    #[test]
    fn validate_project_name_single_component_only() {
        assert_eq!(validate_project_name(" neon "), Ok("neon".into()));
        assert!(validate_project_name("a/b").is_err());
        assert!(validate_project_name("..").is_err());
        assert!(validate_project_name("").is_err());
        assert!(validate_project_name("/abs").is_err());
    }

    #[sealed_test(env = [("MISFIT_TEST_DIR", "/opt/editor"), ("HOME", "/home/blah")])]
    fn expand_target_handles_all_syntaxes() {
        assert_eq!(expand_target("$MISFIT_TEST_DIR/a"), "/opt/editor/a");
        assert_eq!(expand_target("${MISFIT_TEST_DIR}/b"), "/opt/editor/b");
        assert_eq!(expand_target("%MISFIT_TEST_DIR%/c"), "/opt/editor/c");
        assert_eq!(expand_target("~/settings.json"), "/home/blah/settings.json");
        assert_eq!(expand_target("%NOT_A_REAL_VAR_X%/d"), "%NOT_A_REAL_VAR_X%/d");
        assert_eq!(expand_target("100% sure"), "100% sure");
    }

    #[test_case("bundle/manifests/install.manifest.json", "bundle"; "inside manifests dir")]
    #[test_case("manifests/install.manifest.json", "."; "relative manifests dir")]
    #[test_case("bundle/install.manifest.json", "bundle"; "top level")]
    #[test_case("install.manifest.json", "."; "bare file name")]
    #[test]
    fn from_manifest_path_finds_bundle_root(input: &str, expect: &str) {
        use pretty_assertions::assert_eq;
        let location = ManifestLocation::from_manifest_path(input);
        assert_eq!(location.bundle_root, PathBuf::from(expect));
        assert_eq!(location.manifest, PathBuf::from(input));
    }

    #[sealed_test]
    fn locate_manifest_prefers_manifests_dir() -> anyhow::Result<()> {
        let base = std::env::current_dir()?;
        assert_eq!(locate_manifest(&base), None);

        std::fs::write(base.join(MANIFEST_FILE_NAME), "{}")?;
        let found = locate_manifest(&base).expect("root manifest");
        assert_eq!(found.manifest, base.join(MANIFEST_FILE_NAME));

        std::fs::create_dir_all(base.join(MANIFEST_DIR_NAME))?;
        std::fs::write(base.join(MANIFEST_DIR_NAME).join(MANIFEST_FILE_NAME), "{}")?;
        let found = locate_manifest(&base).expect("nested manifest");
        assert_eq!(found.install_root(), base.join(MANIFEST_DIR_NAME));
        assert_eq!(found.bundle_root, base);

        Ok(())
    }
}
