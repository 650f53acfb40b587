// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Bundle building.
//!
//! A __bundle__ is a self-contained directory that can replay a manifest on
//! some other machine. It holds a copy of this very executable renamed after
//! the project, the manifest itself, and every staged payload:
//!
//! ```text
//! <output>/
//! ├── .misfit-studio                  build sentinel
//! ├── <project>[.exe]
//! ├── manifests/install.manifest.json
//! └── <payloadDir>/...                staged payloads
//! ```
//!
//! # Output Safety
//!
//! Building wipes the output directory first. The sentinel file tells us a
//! directory was produced by an earlier build, so replacing it only needs a
//! single confirmation. An absolute output directory without the sentinel
//! could be anything, so it takes two.

use crate::{
    config::{ConfigError, Manifest, PayloadRef, ValidationError},
    fs_utils::{remove_path_if_exists, write_atomic},
    path::{
        document_dir, exe_dir, normalize_rel_path, validate_project_name, NoWayHome, RelPathError,
        BUILD_SENTINEL, MANIFEST_DIR_NAME, MANIFEST_FILE_NAME,
    },
    progress::ProgressLog,
    prompt::{Confirm, Prompt, PromptError},
};

use ignore::WalkBuilder;
use serde::Serialize;
use std::{
    collections::{btree_map::Entry, BTreeMap},
    env, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info, instrument, warn};

/// Contents of the build sentinel file.
pub const SENTINEL_CONTENTS: &str = "Misfit Studio output";

/// Payload to stage into a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFile {
    /// File or directory to take payload from.
    pub source: PathBuf,

    /// Path relative to payload directory of bundle.
    pub staged: String,
}

impl PayloadFile {
    /// Construct new payload file.
    pub fn new(source: impl Into<PathBuf>, staged: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            staged: staged.into(),
        }
    }
}

impl FromStr for PayloadFile {
    type Err = PayloadFileError;

    /// Parse `SOURCE=STAGED`, or just `SOURCE` to stage under its file name.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if let Some((source, staged)) = raw.split_once('=') {
            if source.trim().is_empty() {
                return Err(PayloadFileError(raw.into()));
            }
            return Ok(Self::new(source.trim(), staged.trim()));
        }

        let source = PathBuf::from(raw.trim());
        let staged = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| PayloadFileError(raw.into()))?;

        Ok(Self { source, staged })
    }
}

/// Malformed payload file argument.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("payload {0:?} must look like SOURCE=STAGED")]
pub struct PayloadFileError(pub String);

/// Everything needed to build a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub project_name: String,
    pub manifest: Manifest,
    pub payload_files: Vec<PayloadFile>,

    /// Skip every overwrite confirmation.
    pub force_overwrite: bool,
}

/// Resolved output location of a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub path: PathBuf,
    pub project_name: String,
    pub is_absolute: bool,
}

/// Determine where a bundle goes.
///
/// With advanced mode, an absolute project name is taken as the output path
/// itself. Otherwise the project name must be a single folder name under the
/// dist base.
///
/// # Errors
///
/// - Return [`ValidationError::ProjectName`] if project name is unusable.
pub fn resolve_output(
    project_name: &str,
    advanced: bool,
    dist_base: &Path,
) -> Result<OutputTarget, ValidationError> {
    let trimmed = project_name.trim();
    let raw = Path::new(trimmed);
    if advanced && raw.is_absolute() {
        let name = raw
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ValidationError::ProjectName(RelPathError::NotSingleComponent(trimmed.into()))
            })?;
        return Ok(OutputTarget {
            path: raw.to_path_buf(),
            project_name: name,
            is_absolute: true,
        });
    }

    let name = validate_project_name(trimmed).map_err(ValidationError::ProjectName)?;
    Ok(OutputTarget {
        path: dist_base.join(&name),
        project_name: name,
        is_absolute: false,
    })
}

/// Snapshot of build output destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTargetInfo {
    pub path: PathBuf,
    pub exists: bool,
    pub has_marker: bool,
    pub is_absolute: bool,
}

impl BuildTargetInfo {
    /// Confirmation needed before this destination may be replaced.
    pub fn clearance(&self) -> Clearance {
        match (self.exists, self.has_marker, self.is_absolute) {
            (false, _, _) => Clearance::Proceed,
            (true, false, true) => Clearance::ConfirmTwice,
            (true, _, _) => Clearance::ConfirmOnce,
        }
    }
}

/// Inspect output destination right before building into it.
pub fn inspect_target(target: &OutputTarget) -> BuildTargetInfo {
    let exists = fs::symlink_metadata(&target.path).is_ok();
    let has_marker = target.path.join(BUILD_SENTINEL).is_file();
    BuildTargetInfo {
        path: target.path.clone(),
        exists,
        has_marker,
        is_absolute: target.is_absolute,
    }
}

/// Confirmation tier of a build destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Clearance {
    /// Nothing exists yet.
    Proceed,

    /// Replacing needs one confirmation.
    ConfirmOnce,

    /// Replacing needs a warning and a destructive confirmation.
    ConfirmTwice,
}

/// Places relative payload sources are searched in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSearch {
    bases: Vec<PathBuf>,
}

impl SourceSearch {
    /// Construct search over given base directories, in order.
    pub fn new(bases: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            bases: bases.into_iter().map(Into::into).collect(),
        }
    }

    /// Search current directory and four of its ancestors, then the
    /// executable's directory and three of its ancestors.
    pub fn from_env() -> Self {
        let mut bases = Vec::new();
        if let Ok(cwd) = env::current_dir() {
            bases.extend(cwd.ancestors().take(5).map(Path::to_path_buf));
        }
        if let Some(exe_dir) = exe_dir() {
            bases.extend(exe_dir.ancestors().take(4).map(Path::to_path_buf));
        }

        Self { bases }
    }

    /// Locate payload source.
    ///
    /// Absolute sources are taken as is.
    pub fn resolve(&self, raw: &Path) -> Option<PathBuf> {
        if raw.is_absolute() {
            return raw.exists().then(|| raw.to_path_buf());
        }

        self.bases
            .iter()
            .map(|base| base.join(raw))
            .find(|candidate| candidate.exists())
    }
}

/// Flat set of files to stage into a bundle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PayloadPlan {
    files: BTreeMap<PathBuf, PathBuf>,
    dirs: BTreeMap<PathBuf, PathBuf>,
}

impl PayloadPlan {
    /// Staged path to source path of every file.
    pub fn files(&self) -> &BTreeMap<PathBuf, PathBuf> {
        &self.files
    }

    /// Staged path to source path of every directory, including empty ones.
    pub fn dirs(&self) -> &BTreeMap<PathBuf, PathBuf> {
        &self.dirs
    }

    /// Every source the plan reads from.
    pub fn sources(&self) -> impl Iterator<Item = &Path> {
        self.files.values().chain(self.dirs.values()).map(PathBuf::as_path)
    }

    /// Check if staged path is a staged file, or lies below a staged
    /// directory.
    pub fn covers(&self, staged: &Path) -> bool {
        self.dirs.keys().any(|dir| staged.starts_with(dir))
            || self.files.keys().any(|file| file.starts_with(staged))
    }

    /// Check that every payload reference of every enabled step is staged.
    ///
    /// Absolute references in advanced mode point outside the bundle, and are
    /// never staged.
    ///
    /// # Errors
    ///
    /// - Return [`ValidationError::UnstagedPayload`] for the first reference
    ///   that is not covered.
    pub fn verify_references(&self, manifest: &Manifest) -> Result<(), ValidationError> {
        for (index, decree) in manifest.enabled_steps() {
            let Some(raw) = decree.payload_ref() else {
                continue;
            };

            let reference = PayloadRef::parse(raw, manifest.advanced_mode).map_err(|source| {
                ValidationError::PayloadEscape {
                    index,
                    path: raw.into(),
                    source,
                }
            })?;

            if let PayloadRef::Relative(staged) = reference {
                if !self.covers(&staged) {
                    return Err(ValidationError::UnstagedPayload {
                        index,
                        path: raw.into(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Check that no staged path lands on a file the bundle itself needs.
    ///
    /// Reserved paths are relative to bundle root, staged paths relative to
    /// `payload_dir`.
    ///
    /// # Errors
    ///
    /// - Return [`ValidationError::ReservedPayload`] for the first staged
    ///   path that would overwrite, or sit below, a reserved file.
    pub fn verify_reserved(
        &self,
        payload_dir: &Path,
        reserved: &[PathBuf],
    ) -> Result<(), ValidationError> {
        let in_bundle = |staged: &Path| {
            if payload_dir == Path::new(".") {
                staged.to_path_buf()
            } else {
                payload_dir.join(staged)
            }
        };

        for staged in self.files.keys() {
            let bundle_path = in_bundle(staged.as_path());
            if let Some(hit) = reserved
                .iter()
                .find(|name| name.starts_with(&bundle_path) || bundle_path.starts_with(name))
            {
                return Err(ValidationError::ReservedPayload {
                    staged: staged.clone(),
                    reserved: hit.clone(),
                });
            }
        }

        for staged in self.dirs.keys() {
            let bundle_path = in_bundle(staged.as_path());
            if let Some(hit) = reserved.iter().find(|name| bundle_path.starts_with(name)) {
                return Err(ValidationError::ReservedPayload {
                    staged: staged.clone(),
                    reserved: hit.clone(),
                });
            }
        }

        Ok(())
    }

    fn insert_dir(&mut self, staged: PathBuf, source: PathBuf) -> Result<(), ValidationError> {
        // INVARIANT: A staged file cannot also be a directory, or sit above one.
        if let Some((file, first)) = self.files.iter().find(|(file, _)| staged.starts_with(file)) {
            return Err(ValidationError::PayloadCollision {
                staged: file.clone(),
                first: first.clone(),
                second: source,
            });
        }

        self.dirs.entry(staged).or_insert(source);
        Ok(())
    }

    fn insert_file(&mut self, staged: PathBuf, source: PathBuf) -> Result<(), ValidationError> {
        if let Some((_, first)) = self.dirs.iter().find(|(dir, _)| dir.starts_with(&staged)) {
            return Err(ValidationError::PayloadCollision {
                staged,
                first: first.clone(),
                second: source,
            });
        }
        if let Some((file, first)) = self
            .files
            .iter()
            .find(|(file, _)| **file != staged && (file.starts_with(&staged) || staged.starts_with(file)))
        {
            return Err(ValidationError::PayloadCollision {
                staged: file.clone(),
                first: first.clone(),
                second: source,
            });
        }

        match self.files.entry(staged) {
            Entry::Vacant(entry) => {
                entry.insert(source);
                Ok(())
            }
            Entry::Occupied(entry) if *entry.get() == source => Ok(()),
            Entry::Occupied(entry) => Err(ValidationError::PayloadCollision {
                staged: entry.key().clone(),
                first: entry.get().clone(),
                second: source,
            }),
        }
    }
}

/// Resolve payload files into a flat, collision free plan.
///
/// Directory sources are expanded into every file below them, hidden files
/// included.
///
/// # Errors
///
/// - Return [`BuildError::PayloadNotFound`] if a source cannot be located.
/// - Return [`BuildError::Validation`] if a staged path is unsafe, two
///   distinct sources claim the same staged path, or a staged file would
///   have to double as a directory.
/// - Return [`BuildError::Walk`] if a directory source cannot be walked.
#[instrument(skip(files, search), level = "debug")]
pub fn plan_payloads(files: &[PayloadFile], search: &SourceSearch) -> Result<PayloadPlan> {
    let mut plan = PayloadPlan::default();
    for file in files {
        let source = search
            .resolve(&file.source)
            .ok_or_else(|| BuildError::PayloadNotFound(file.source.clone()))?;
        let source = std::path::absolute(&source).map_err(|error| BuildError::Io {
            source: error,
            path: source.clone(),
        })?;
        let staged = normalize_rel_path(&file.staged, false).map_err(|source| {
            ValidationError::StagedPath {
                path: file.staged.clone(),
                source,
            }
        })?;

        if !source.is_dir() {
            debug!("stage {:?} as {:?}", source.display(), staged.display());
            plan.insert_file(staged, source)?;
            continue;
        }

        plan.insert_dir(staged.clone(), source.clone())?;
        let walker = WalkBuilder::new(&source)
            .standard_filters(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();
        for entry in walker {
            let entry = entry?;
            let Ok(rel) = entry.path().strip_prefix(&source) else {
                continue;
            };
            if rel.as_os_str().is_empty() {
                continue;
            }

            let staged_path = staged.join(rel);
            if entry.file_type().is_some_and(|kind| kind.is_dir()) {
                plan.insert_dir(staged_path, entry.path().to_path_buf())?;
            } else {
                plan.insert_file(staged_path, entry.path().to_path_buf())?;
            }
        }
    }

    Ok(plan)
}

/// Default base directory of build output.
///
/// Prefers `./dist`, falling back to `Documents/MisfitStudio/dist` if the
/// current directory is not writable.
///
/// # Errors
///
/// - Return [`BuildError::NoWayHome`] if fallback is needed but the home
///   directory cannot be determined.
pub fn default_dist_base() -> Result<PathBuf> {
    if let Ok(cwd) = env::current_dir() {
        let local = cwd.join("dist");
        if is_writable_dir(&local) {
            return Ok(local);
        }
        warn!("{:?} is not writable, using documents directory", local.display());
    }

    Ok(document_dir()?.join("MisfitStudio").join("dist"))
}

fn is_writable_dir(dir: &Path) -> bool {
    if fs::create_dir_all(dir).is_err() {
        return false;
    }

    let scratch = dir.join(".misfit-write-test");
    let writable = fs::write(&scratch, b"").is_ok();
    let _ = fs::remove_file(&scratch);

    writable
}

/// Bundle builder.
#[derive(Debug)]
pub struct Builder<C> {
    dist_base: PathBuf,
    exe_path: PathBuf,
    search: SourceSearch,
    confirm: C,
    log: ProgressLog,
}

impl<C: Confirm> Builder<C> {
    /// Construct new builder.
    ///
    /// The executable at `exe_path` is what gets copied into bundles.
    pub fn new(
        dist_base: impl Into<PathBuf>,
        exe_path: impl Into<PathBuf>,
        search: SourceSearch,
        confirm: C,
        log: ProgressLog,
    ) -> Self {
        Self {
            dist_base: dist_base.into(),
            exe_path: exe_path.into(),
            search,
            confirm,
            log,
        }
    }

    /// Where a build of the project would go, and what is there right now.
    ///
    /// # Errors
    ///
    /// - Return [`BuildError::Validation`] if project name is unusable.
    pub fn inspect(&self, project_name: &str, advanced: bool) -> Result<BuildTargetInfo> {
        let target = resolve_output(project_name, advanced, &self.dist_base)?;
        Ok(inspect_target(&target))
    }

    /// Build bundle, returning its output directory.
    ///
    /// # Errors
    ///
    /// - Return [`BuildError::Validation`] if manifest, project name, or
    ///   payload plan are invalid.
    /// - Return [`BuildError::Declined`] if operator refused to overwrite.
    /// - Return [`BuildError::Refused`] if output would clobber the file
    ///   system root or the home directory.
    /// - Return [`BuildError`] I/O variants if writing fails.
    #[instrument(skip(self, request), fields(project = %request.project_name), level = "debug")]
    pub fn build(&mut self, request: &BuildRequest) -> Result<PathBuf> {
        let manifest = &request.manifest;
        if let Err(error) = manifest.validate() {
            self.log.error(format!("Invalid manifest: {error}"));
            return Err(error.into());
        }
        let payload_dir = normalize_rel_path(&manifest.payload_dir, true).map_err(ValidationError::PayloadDir)?;
        let target = resolve_output(&request.project_name, manifest.advanced_mode, &self.dist_base)?;
        refuse_dangerous_output(&target.path)?;

        let plan = plan_payloads(&request.payload_files, &self.search)?;
        plan.verify_references(manifest)?;
        let exe_name = format!("{}{}", target.project_name, env::consts::EXE_SUFFIX);
        let reserved = [
            PathBuf::from(BUILD_SENTINEL),
            PathBuf::from(&exe_name),
            Path::new(MANIFEST_DIR_NAME).join(MANIFEST_FILE_NAME),
        ];
        plan.verify_reserved(&payload_dir, &reserved)?;
        self.refuse_inputs_inside(&target.path, &plan)?;

        let info = inspect_target(&target);
        self.clear(&info, request.force_overwrite)?;

        let root = &target.path;
        self.log.info(format!("Building {} into {:?}", target.project_name, root.display()));
        remove_path_if_exists(root).map_err(|source| io_error(source, root))?;
        fs::create_dir_all(root).map_err(|source| io_error(source, root))?;

        let sentinel = root.join(BUILD_SENTINEL);
        write_atomic(&sentinel, SENTINEL_CONTENTS).map_err(|source| io_error(source, &sentinel))?;

        let exe_dest = root.join(&exe_name);
        fs::copy(&self.exe_path, &exe_dest).map_err(|source| io_error(source, &self.exe_path))?;
        self.log.info(format!("Copied installer to {:?}", exe_dest.display()));

        let manifest_path = root.join(MANIFEST_DIR_NAME).join(MANIFEST_FILE_NAME);
        manifest.save(&manifest_path)?;

        let payload_root = root.join(payload_dir);
        for dir in plan.dirs().keys() {
            let dest = payload_root.join(dir);
            fs::create_dir_all(&dest).map_err(|source| io_error(source, &dest))?;
        }
        for (staged, source) in plan.files() {
            let dest = payload_root.join(staged);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|source| io_error(source, parent))?;
            }
            fs::copy(source, &dest).map_err(|error| io_error(error, source))?;
            debug!("staged {:?}", dest.display());
        }
        self.log.info(format!("Staged {} payload files", plan.files().len()));

        info!("built {:?}", root.display());
        self.log.info(format!("Project built successfully at: {}", root.display()));

        Ok(root.clone())
    }

    // INVARIANT: Output gets wiped before anything is copied, so nothing we
    //   read from may live inside it.
    fn refuse_inputs_inside(&self, output: &Path, plan: &PayloadPlan) -> Result<()> {
        let output = std::path::absolute(output).map_err(|source| io_error(source, output))?;
        let exe = std::path::absolute(&self.exe_path).map_err(|source| io_error(source, &self.exe_path))?;
        if let Some(input) = std::iter::once(exe.as_path())
            .chain(plan.sources())
            .find(|input| input.starts_with(&output))
        {
            return Err(BuildError::InputInsideOutput {
                input: input.to_path_buf(),
                output,
            });
        }

        Ok(())
    }

    fn clear(&mut self, info: &BuildTargetInfo, force: bool) -> Result<()> {
        let clearance = info.clearance();
        if clearance == Clearance::Proceed {
            return Ok(());
        }

        if force {
            self.log.warn(format!("Overwriting {:?} without confirmation", info.path.display()));
            return Ok(());
        }

        let prompts = match clearance {
            Clearance::Proceed => vec![],
            Clearance::ConfirmOnce => vec![Prompt::OverwriteBuild {
                path: info.path.clone(),
            }],
            Clearance::ConfirmTwice => vec![
                Prompt::MissingSentinel {
                    path: info.path.clone(),
                },
                Prompt::DeleteUnmarked {
                    path: info.path.clone(),
                },
            ],
        };

        for prompt in prompts {
            if !self.confirm.confirm(&prompt)? {
                self.log.warn("Build cancelled");
                return Err(BuildError::Declined(info.path.clone()));
            }
        }

        Ok(())
    }
}

fn refuse_dangerous_output(path: &Path) -> Result<()> {
    let absolute = std::path::absolute(path).map_err(|source| io_error(source, path))?;
    let is_root = absolute.parent().is_none();
    let is_home = dirs::home_dir().is_some_and(|home| home == absolute);
    if is_root || is_home {
        return Err(BuildError::Refused(absolute));
    }

    Ok(())
}

fn io_error(source: io::Error, path: &Path) -> BuildError {
    BuildError::Io {
        source,
        path: path.to_path_buf(),
    }
}

/// Build error types.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("build failed validation")]
    Validation(#[from] ValidationError),

    #[error("payload source {:?} not found", .0.display())]
    PayloadNotFound(PathBuf),

    #[error("failed to walk payload directory")]
    Walk(#[from] ignore::Error),

    #[error("overwriting {:?} was declined", .0.display())]
    Declined(PathBuf),

    #[error("refusing to build into {:?}", .0.display())]
    Refused(PathBuf),

    #[error("{:?} lies inside build output {:?}, which gets wiped first", input.display(), output.display())]
    InputInsideOutput { input: PathBuf, output: PathBuf },

    #[error("failed to write {:?}", path.display())]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),
}

/// Friendly result alias :3
type Result<T, E = BuildError> = std::result::Result<T, E>;
