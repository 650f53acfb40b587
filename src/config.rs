// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of install manifests and presets to simplify the
//! process of serialization and deserialization. Validation of a manifest is
//! done here too, because every check that can be made without touching the
//! target file system must happen before the first step runs.
//!
//! # Manifest Layout
//!
//! An install manifest is a JSON document with a handful of identity fields,
//! a payload directory, and an ordered list of steps. Each step is tagged by
//! its `type` key:
//!
//! ```json
//! {
//!   "appName": "Neon",
//!   "version": "1.0.0",
//!   "publisher": "Misfit",
//!   "description": "Neon editor theme",
//!   "advancedMode": false,
//!   "payloadDir": "payloads",
//!   "steps": [
//!     { "type": "copy", "src": "theme/a.css", "dest": "out/a.css" },
//!     { "type": "setJsonValue", "file": "out/settings.json",
//!       "keyPath": "workbench\\.colorTheme", "valueType": "string", "valueRaw": "Neon" }
//!   ]
//! }
//! ```

use crate::{
    keypath::{KeyPath, KeyPathError},
    path::{normalize_rel_path, RelPathError},
};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs,
    path::{Component, Path, PathBuf},
    str::FromStr,
};

/// Install manifest layout.
///
/// Declarative install plan: identity, payload root, and ordered steps.
/// Identity fields are descriptive only.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Name of application being installed. Scopes backups.
    pub app_name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub publisher: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_path: Option<String>,

    /// Permit absolute paths, and strip markers when patching.
    #[serde(default, deserialize_with = "null_as_default")]
    pub advanced_mode: bool,

    /// Root directory all relative payload references resolve against.
    #[serde(default)]
    pub payload_dir: String,

    /// Ordered install steps.
    #[serde(default, alias = "installSteps")]
    pub steps: Vec<Step>,
}

impl Manifest {
    /// Load manifest from file.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file is not a valid manifest.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        fs::read_to_string(path)
            .map_err(|source| ConfigError::Read {
                source,
                path: path.to_path_buf(),
            })?
            .parse()
    }

    /// Write manifest to file as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Write`] if file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_pretty(path.as_ref(), self)
    }

    /// Check every enabled step before anything gets executed.
    ///
    /// # Errors
    ///
    /// - Return [`ValidationError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.app_name.trim().is_empty() {
            return Err(ValidationError::MissingField("appName"));
        }
        normalize_rel_path(&self.payload_dir, true).map_err(ValidationError::PayloadDir)?;

        for (index, step) in self.steps.iter().enumerate() {
            if step.enabled {
                step.decree.validate(index, self.advanced_mode)?;
            }
        }

        Ok(())
    }

    /// Determine payload root under a bundle root.
    ///
    /// # Errors
    ///
    /// - Return [`ValidationError::PayloadDir`] if payload directory escapes
    ///   the bundle root.
    pub fn payload_root(&self, bundle_root: &Path) -> Result<PathBuf, ValidationError> {
        let payload_dir =
            normalize_rel_path(&self.payload_dir, true).map_err(ValidationError::PayloadDir)?;
        Ok(bundle_root.join(payload_dir))
    }

    /// Iterate over steps that will actually run.
    pub fn enabled_steps(&self) -> impl Iterator<Item = (usize, &Decree)> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, step)| step.enabled)
            .map(|(index, step)| (index, &step.decree))
    }
}

impl FromStr for Manifest {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        // INVARIANT: Editors on Windows like to prepend a BOM.
        let data = data.strip_prefix('\u{feff}').unwrap_or(data);
        serde_json::from_str(data).map_err(ConfigError::Deserialize)
    }
}

impl Display for Manifest {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            serde_json::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Single install step.
///
/// Pairs the decree to carry out with a builder-side toggle. Disabled steps
/// are kept in the manifest but never validated nor executed.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Step {
    #[serde(default = "enabled_default", skip_serializing_if = "is_enabled")]
    pub enabled: bool,

    #[serde(flatten)]
    pub decree: Decree,
}

impl Step {
    /// Construct new enabled step.
    pub fn new(decree: Decree) -> Self {
        Self {
            enabled: true,
            decree,
        }
    }

    /// Construct new disabled step.
    pub fn disabled(decree: Decree) -> Self {
        Self {
            enabled: false,
            decree,
        }
    }
}

impl From<Decree> for Step {
    fn from(decree: Decree) -> Self {
        Self::new(decree)
    }
}

fn enabled_default() -> bool {
    true
}

fn is_enabled(enabled: &bool) -> bool {
    *enabled
}

/// Atomic mutation instruction.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Decree {
    /// Copy payload file or directory to destination.
    Copy { src: String, dest: String },

    /// Replace or append a marker-delimited block in a text file.
    PatchBlock {
        file: String,
        start_marker: String,
        end_marker: String,
        #[serde(default)]
        content_file: String,
        #[serde(
            default,
            deserialize_with = "null_as_default",
            skip_serializing_if = "BTreeMap::is_empty"
        )]
        replacements: BTreeMap<String, String>,
    },

    /// Set value at key path in a JSON file.
    SetJsonValue {
        file: String,
        key_path: String,
        #[serde(default)]
        value_type: ValueKind,
        #[serde(default)]
        value_raw: String,
    },

    /// Substitute base64 encoding of payload file for placeholder text.
    Base64Embed {
        file: String,
        placeholder: String,
        input_file: String,
    },

    /// Run external command without a shell.
    RunCommand {
        command: String,
        #[serde(default, deserialize_with = "null_as_default")]
        args: Vec<String>,
    },
}

impl Decree {
    /// Kind of decree, for reporting.
    pub fn kind(&self) -> DecreeKind {
        match self {
            Self::Copy { .. } => DecreeKind::Copy,
            Self::PatchBlock { .. } => DecreeKind::PatchBlock,
            Self::SetJsonValue { .. } => DecreeKind::SetJsonValue,
            Self::Base64Embed { .. } => DecreeKind::Base64Embed,
            Self::RunCommand { .. } => DecreeKind::RunCommand,
        }
    }

    /// Payload-relative path this decree reads from, if any.
    pub fn payload_ref(&self) -> Option<&str> {
        match self {
            Self::Copy { src, .. } => Some(src),
            Self::PatchBlock { content_file, .. } => Some(content_file),
            Self::Base64Embed { input_file, .. } => Some(input_file),
            Self::SetJsonValue { .. } | Self::RunCommand { .. } => None,
        }
    }

    /// Target path this decree mutates, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Copy { dest, .. } => Some(dest),
            Self::PatchBlock { file, .. }
            | Self::SetJsonValue { file, .. }
            | Self::Base64Embed { file, .. } => Some(file),
            Self::RunCommand { .. } => None,
        }
    }

    fn validate(&self, index: usize, advanced: bool) -> Result<(), ValidationError> {
        let kind = self.kind();
        let required = |field: &'static str, value: &str| {
            if value.trim().is_empty() {
                Err(ValidationError::StepField { index, kind, field })
            } else {
                Ok(())
            }
        };

        match self {
            Self::Copy { src, dest } => {
                required("src", src)?;
                required("dest", dest)?;
            }
            Self::PatchBlock {
                file,
                start_marker,
                end_marker,
                content_file,
                ..
            } => {
                required("file", file)?;
                required("contentFile", content_file)?;
                if start_marker.is_empty() || end_marker.is_empty() {
                    return Err(ValidationError::EmptyMarker { index });
                }
            }
            Self::SetJsonValue {
                file,
                key_path,
                value_type,
                value_raw,
            } => {
                required("file", file)?;
                KeyPath::parse(key_path)
                    .map_err(|source| ValidationError::KeyPath { index, source })?;
                JsonValue::parse(*value_type, value_raw)
                    .map_err(|source| ValidationError::Value { index, source })?;
            }
            Self::Base64Embed {
                file,
                placeholder,
                input_file,
            } => {
                required("file", file)?;
                required("placeholder", placeholder)?;
                required("inputFile", input_file)?;
            }
            Self::RunCommand { command, .. } => required("command", command)?,
        }

        if let Some(payload) = self.payload_ref() {
            PayloadRef::parse(payload, advanced).map_err(|source| {
                ValidationError::PayloadEscape {
                    index,
                    path: payload.into(),
                    source,
                }
            })?;
        }

        if let Some(target) = self.target() {
            if !advanced && is_unsafe_target(target) {
                return Err(ValidationError::UnsafeTarget {
                    index,
                    path: target.into(),
                });
            }
        }

        Ok(())
    }
}

// INVARIANT: Only the literal text counts. Expanded variables name places
// the manifest author asked for explicitly.
fn is_unsafe_target(raw: &str) -> bool {
    let path = Path::new(raw.trim());
    path.has_root()
        || path
            .components()
            .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
}

/// Kind of decree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecreeKind {
    Copy,
    PatchBlock,
    SetJsonValue,
    Base64Embed,
    RunCommand,
}

impl Display for DecreeKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Copy => "copy",
            Self::PatchBlock => "patchBlock",
            Self::SetJsonValue => "setJsonValue",
            Self::Base64Embed => "base64Embed",
            Self::RunCommand => "runCommand",
        })
    }
}

/// Payload reference checked against the payload boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadRef {
    /// Normalized path relative to payload root.
    Relative(PathBuf),

    /// Explicit absolute path, only allowed in advanced mode.
    Absolute(PathBuf),
}

impl PayloadRef {
    /// Check raw payload reference.
    ///
    /// # Errors
    ///
    /// - Return [`RelPathError`] if reference leaves the payload root, unless
    ///   it is absolute and advanced mode is set.
    pub fn parse(raw: &str, advanced: bool) -> Result<Self, RelPathError> {
        let trimmed = raw.trim();
        if advanced && Path::new(trimmed).is_absolute() {
            return Ok(Self::Absolute(PathBuf::from(trimmed)));
        }

        normalize_rel_path(trimmed, false).map(Self::Relative)
    }

    /// Resolve reference under payload root.
    pub fn resolve(&self, payload_root: &Path) -> PathBuf {
        match self {
            Self::Relative(path) => payload_root.join(path),
            Self::Absolute(path) => path.clone(),
        }
    }
}

/// Declared kind of a JSON value.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    #[default]
    String,
    Number,
    #[serde(alias = "bool")]
    Boolean,
    Json,
}

impl Display for ValueKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Json => "json",
        })
    }
}

/// JSON value discriminated by its declared kind.
///
/// A `json` value of `"\"dark\""` and a `string` value of `dark` produce the
/// same JSON text, but they are never confused for one another, because the
/// kind is declared rather than sniffed from the raw text.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonValue {
    String(String),
    Number(serde_json::Number),
    Bool(bool),
    Json(Value),
}

impl JsonValue {
    /// Parse raw text as declared kind.
    ///
    /// # Errors
    ///
    /// - Return [`ValueError`] if raw text is not a valid instance of kind.
    pub fn parse(kind: ValueKind, raw: &str) -> Result<Self, ValueError> {
        let invalid = || ValueError {
            kind,
            raw: raw.into(),
        };

        match kind {
            ValueKind::String => Ok(Self::String(raw.into())),
            ValueKind::Number => match serde_json::from_str::<Value>(raw.trim()) {
                Ok(Value::Number(number)) => Ok(Self::Number(number)),
                _ => Err(invalid()),
            },
            ValueKind::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Self::Bool(true)),
                "false" => Ok(Self::Bool(false)),
                _ => Err(invalid()),
            },
            ValueKind::Json => serde_json::from_str(raw)
                .map(Self::Json)
                .map_err(|_| invalid()),
        }
    }

    /// Convert into plain JSON tree.
    pub fn into_value(self) -> Value {
        match self {
            Self::String(value) => Value::String(value),
            Self::Number(value) => Value::Number(value),
            Self::Bool(value) => Value::Bool(value),
            Self::Json(value) => value,
        }
    }
}

/// Raw text that does not match its declared kind.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("value {raw:?} is not a valid {kind}")]
pub struct ValueError {
    pub kind: ValueKind,
    pub raw: String,
}

/// Named manifest template.
///
/// Presets carry the same shape as a manifest. They are imported and
/// exported as JSON, and never handed to the installer directly.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Preset {
    pub name: String,
    pub data: Manifest,
}

impl Preset {
    /// Construct new preset from manifest.
    pub fn new(name: impl Into<String>, data: Manifest) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Load preset from file.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file is not a valid preset.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        fs::read_to_string(path)
            .map_err(|source| ConfigError::Read {
                source,
                path: path.to_path_buf(),
            })?
            .parse()
    }

    /// Write preset to file as pretty JSON.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Write`] if file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_pretty(path.as_ref(), self)
    }
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let data = data.strip_prefix('\u{feff}').unwrap_or(data);
        serde_json::from_str(data).map_err(ConfigError::Deserialize)
    }
}

impl Display for Preset {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            serde_json::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn write_pretty(path: &Path, value: &impl Serialize) -> Result<()> {
    let data = serde_json::to_string_pretty(value).map_err(ConfigError::Serialize)?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            source,
            path: parent.to_path_buf(),
        })?;
    }

    fs::write(path, data).map_err(|source| ConfigError::Write {
        source,
        path: path.to_path_buf(),
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error("failed to parse manifest")]
    Deserialize(#[source] serde_json::Error),

    /// Failed to serialize configuration.
    #[error("failed to serialize manifest")]
    Serialize(#[source] serde_json::Error),

    /// Failed to read configuration file.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to write configuration file.
    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Manifest validation error types.
///
/// Always raised before anything on the target gets touched.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("manifest field {0:?} is required")]
    MissingField(&'static str),

    #[error("invalid payload directory")]
    PayloadDir(#[source] RelPathError),

    #[error("step {index} ({kind}): field {field:?} is required")]
    StepField {
        index: usize,
        kind: DecreeKind,
        field: &'static str,
    },

    #[error("step {index}: payload reference {path:?} must stay inside payload directory")]
    PayloadEscape {
        index: usize,
        path: String,
        #[source]
        source: RelPathError,
    },

    #[error("step {index}: target {path:?} must be relative without '..' unless advanced mode is enabled")]
    UnsafeTarget { index: usize, path: String },

    #[error("step {index}: malformed key path")]
    KeyPath {
        index: usize,
        #[source]
        source: KeyPathError,
    },

    #[error("step {index}: invalid value")]
    Value {
        index: usize,
        #[source]
        source: ValueError,
    },

    #[error("step {index}: start and end markers cannot be empty")]
    EmptyMarker { index: usize },

    #[error("staged payload {:?} is claimed by both {:?} and {:?}", staged.display(), first.display(), second.display())]
    PayloadCollision {
        staged: PathBuf,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("staged payload path {path:?} must stay inside payload directory")]
    StagedPath {
        path: String,
        #[source]
        source: RelPathError,
    },

    #[error("staged payload {:?} would overwrite bundle file {:?}", staged.display(), reserved.display())]
    ReservedPayload { staged: PathBuf, reserved: PathBuf },

    #[error("step {index}: payload {path:?} is not staged by the build")]
    UnstagedPayload { index: usize, path: String },

    #[error("invalid project name")]
    ProjectName(#[source] RelPathError),
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
