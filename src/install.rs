// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Step execution.
//!
//! The [`Installer`] carries out the steps of an install manifest against the
//! target file system, one at a time, in manifest order.
//!
//! # Run Lifecycle
//!
//! 1. Validate the whole manifest. Nothing is touched if this fails.
//! 2. Check that the payload root exists.
//! 3. For every enabled step: resolve its paths, back up whatever it is about
//!    to mutate, perform the mutation, and report it.
//!
//! The first failing step halts the run. Steps that already ran stay
//! applied, and their originals stay in the backup archive, so a restore can
//! undo them.

pub mod command;

use crate::{
    backup::{BackupError, BackupRecord, BackupSession, Snapshot},
    config::{Decree, DecreeKind, JsonValue, Manifest, PayloadRef, ValidationError, ValueError},
    fs_utils::{copy_path, write_atomic},
    keypath::{KeyPath, KeyPathError},
    patch::{apply_replacements, Markers, PatchError, PatchMode, PatchOutcome},
    path::{resolve_target, RelPathError},
    progress::ProgressLog,
    prompt::{Confirm, Prompt, PromptError},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use command::{syscall_non_interactive, CommandError};
use serde_json::Value;
use std::{
    error::Error as StdError,
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{info, instrument, warn};

/// Where an install run reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    /// Directory relative target paths resolve against.
    pub install_root: PathBuf,

    /// Directory relative payload references resolve against.
    pub payload_root: PathBuf,

    /// Working directory of external commands.
    pub command_dir: PathBuf,

    /// Root directory of backup archives.
    pub backups_root: PathBuf,
}

/// Summary of a finished install run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub steps_run: usize,
    pub steps_skipped: usize,

    /// Backup record of this run, if anything was archived.
    pub backup: Option<BackupRecord>,
}

/// Manifest step executor.
#[derive(Debug)]
pub struct Installer<'m, C> {
    manifest: &'m Manifest,
    options: InstallOptions,
    confirm: C,
    log: ProgressLog,
    backup: BackupSession,
}

impl<'m, C: Confirm> Installer<'m, C> {
    /// Construct new installer for one run of a manifest.
    pub fn new(manifest: &'m Manifest, options: InstallOptions, confirm: C, log: ProgressLog) -> Self {
        let backup = BackupSession::new(&options.backups_root, &manifest.app_name);
        Self {
            manifest,
            options,
            confirm,
            log,
            backup,
        }
    }

    /// Replace backup session, e.g., to pin its timestamp.
    pub fn with_backup_session(mut self, backup: BackupSession) -> Self {
        self.backup = backup;
        self
    }

    /// Execute every enabled step in order.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError::Validation`] if manifest is invalid.
    /// - Return [`InstallError::MissingPayloadRoot`] if payload root is gone.
    /// - Return [`InstallError::Cancelled`] if operator declined a command.
    /// - Return [`InstallError::StepFailed`] for the first step that fails.
    #[instrument(skip(self), fields(app = %self.manifest.app_name), level = "debug")]
    pub fn run(mut self) -> Result<InstallReport> {
        if let Err(error) = self.manifest.validate() {
            self.log.error(format!("Invalid manifest: {}", error_chain(&error)));
            return Err(error.into());
        }

        if !self.options.payload_root.is_dir() {
            self.log.error(format!(
                "Payload folder {:?} does not exist",
                self.options.payload_root.display()
            ));
            return Err(InstallError::MissingPayloadRoot(self.options.payload_root));
        }

        self.log.info(format!(
            "Installing {} {}",
            self.manifest.app_name, self.manifest.version
        ));

        let manifest = self.manifest;
        let mut steps_run = 0;
        let mut steps_skipped = 0;
        for (index, step) in manifest.steps.iter().enumerate() {
            let kind = step.decree.kind();
            if !step.enabled {
                self.log.info(format!("Skipping disabled step {index} ({kind})"));
                steps_skipped += 1;
                continue;
            }

            match self.execute(&step.decree) {
                Ok(()) => steps_run += 1,
                Err(StepError::Declined) => {
                    self.log.warn(format!("Step {index} ({kind}) declined, cancelling install"));
                    return Err(InstallError::Cancelled { index });
                }
                Err(source) => {
                    self.log.error(format!("Step {index} ({kind}) failed: {}", error_chain(&source)));
                    return Err(InstallError::StepFailed {
                        index,
                        kind,
                        source,
                    });
                }
            }
        }

        if let Some(dir) = self.backup.archive_dir() {
            self.log.info(format!("Originals backed up to {:?}", dir.display()));
        }
        self.log.info("Installation complete!");

        Ok(InstallReport {
            steps_run,
            steps_skipped,
            backup: self.backup.into_record(),
        })
    }

    fn execute(&mut self, decree: &Decree) -> Result<(), StepError> {
        match decree {
            Decree::Copy { src, dest } => {
                let src = self.payload(src)?;
                let dest = self.target(dest);
                self.snapshot(&dest)?;
                info!("copy {:?} to {:?}", src.display(), dest.display());
                copy_path(&src, &dest).map_err(|source| StepError::Write {
                    source,
                    path: dest.clone(),
                })?;
                self.log.info(format!("Copied {:?} to {:?}", src.display(), dest.display()));
            }
            Decree::PatchBlock {
                file,
                start_marker,
                end_marker,
                content_file,
                replacements,
            } => {
                let content_path = self.payload(content_file)?;
                let content = read_text(&content_path)?;
                let content = apply_replacements(&content, replacements);
                let target = self.target(file);
                self.snapshot(&target)?;

                let mode = PatchMode::from_advanced(self.manifest.advanced_mode);
                let outcome = Markers::new(start_marker, end_marker).patch_file(&target, &content, mode)?;
                let verb = match outcome {
                    PatchOutcome::Replaced => "Replaced marker block in",
                    PatchOutcome::Appended => "Appended marker block to",
                };
                self.log.info(format!("{verb} {:?}", target.display()));
            }
            Decree::SetJsonValue {
                file,
                key_path,
                value_type,
                value_raw,
            } => {
                let key_path = KeyPath::parse(key_path)?;
                let value = JsonValue::parse(*value_type, value_raw)?.into_value();
                let target = self.target(file);
                let mut document = read_json_or_empty(&target)?;
                self.snapshot(&target)?;

                key_path.set(&mut document, value);
                let data = serde_json::to_string_pretty(&document).map_err(|source| StepError::Json {
                    source,
                    path: target.clone(),
                })?;
                write_atomic(&target, data).map_err(|source| StepError::Write {
                    source,
                    path: target.clone(),
                })?;
                self.log.info(format!("Set {key_path} in {:?}", target.display()));
            }
            Decree::Base64Embed {
                file,
                placeholder,
                input_file,
            } => {
                let input = self.payload(input_file)?;
                let bytes = fs::read(&input).map_err(|source| StepError::Read {
                    source,
                    path: input.clone(),
                })?;
                let encoded = STANDARD.encode(bytes);
                let target = self.target(file);
                let text = read_text(&target)?;

                if !text.contains(placeholder.as_str()) {
                    warn!("placeholder {placeholder:?} not found in {:?}", target.display());
                    self.log.warn(format!(
                        "Placeholder {placeholder:?} not found in {:?}, nothing embedded",
                        target.display()
                    ));
                    return Ok(());
                }

                self.snapshot(&target)?;
                write_atomic(&target, text.replace(placeholder.as_str(), &encoded)).map_err(
                    |source| StepError::Write {
                        source,
                        path: target.clone(),
                    },
                )?;
                self.log.info(format!("Embedded {:?} into {:?}", input.display(), target.display()));
            }
            Decree::RunCommand { command, args } => {
                let prompt = Prompt::RunCommand {
                    command: command.clone(),
                    args: args.clone(),
                };
                if !self.confirm.confirm(&prompt)? {
                    return Err(StepError::Declined);
                }

                self.log.info(format!("Running {command} {}", args.join(" ")));
                let output = syscall_non_interactive(command, args, &self.options.command_dir)?;
                if !output.is_empty() {
                    self.log.info(output);
                }
            }
        }

        Ok(())
    }

    fn payload(&self, raw: &str) -> Result<PathBuf, StepError> {
        let path = PayloadRef::parse(raw, self.manifest.advanced_mode)?.resolve(&self.options.payload_root);
        if !path.exists() {
            return Err(StepError::MissingPayload(path));
        }

        Ok(path)
    }

    fn target(&self, raw: &str) -> PathBuf {
        resolve_target(&self.options.install_root, raw)
    }

    fn snapshot(&mut self, path: &Path) -> Result<(), StepError> {
        if let Snapshot::Captured(archived) = self.backup.snapshot(path)? {
            self.log.info(format!(
                "Backed up {:?} to {:?}",
                path.display(),
                archived.display()
            ));
        }

        Ok(())
    }
}

fn read_text(path: &Path) -> Result<String, StepError> {
    fs::read_to_string(path).map_err(|source| StepError::Read {
        source,
        path: path.to_path_buf(),
    })
}

// INVARIANT: Missing or blank JSON files start out as an empty object.
fn read_json_or_empty(path: &Path) -> Result<Value, StepError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(error) if error.kind() == io::ErrorKind::NotFound => String::new(),
        Err(source) => {
            return Err(StepError::Read {
                source,
                path: path.to_path_buf(),
            })
        }
    };

    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    if text.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }

    serde_json::from_str(text).map_err(|source| StepError::Json {
        source,
        path: path.to_path_buf(),
    })
}

/// Render error with all of its sources on one line.
pub fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}

/// Failure of a single step.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("payload {:?} does not exist", .0.display())]
    MissingPayload(PathBuf),

    #[error("payload reference leaves payload directory")]
    PayloadPath(#[from] RelPathError),

    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error("{:?} does not hold valid JSON", path.display())]
    Json {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    KeyPath(#[from] KeyPathError),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("operator declined")]
    Declined,
}

/// Install error types.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("manifest failed validation")]
    Validation(#[from] ValidationError),

    #[error("payload directory {:?} does not exist", .0.display())]
    MissingPayloadRoot(PathBuf),

    #[error("install cancelled at step {index}")]
    Cancelled { index: usize },

    #[error("step {index} ({kind}) failed")]
    StepFailed {
        index: usize,
        kind: DecreeKind,
        #[source]
        source: StepError,
    },
}

/// Friendly result alias :3
type Result<T, E = InstallError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::{command::CommandError, *};
    use crate::{
        config::{Step, ValueKind},
        progress::{LogLevel, LogLine},
    };
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::collections::{BTreeMap, VecDeque};
    use tokio::sync::mpsc::UnboundedReceiver;

    #[derive(Debug, Default)]
    struct Scripted {
        answers: VecDeque<bool>,
        asked: Vec<Prompt>,
    }

    impl Scripted {
        fn answering(answers: impl IntoIterator<Item = bool>) -> Self {
            Self {
                answers: answers.into_iter().collect(),
                asked: Vec::new(),
            }
        }
    }

    impl Confirm for Scripted {
        fn confirm(&mut self, prompt: &Prompt) -> Result<bool, PromptError> {
            self.asked.push(prompt.clone());
            Ok(self.answers.pop_front().unwrap_or(false))
        }
    }

    fn options() -> anyhow::Result<InstallOptions> {
        let cwd = std::env::current_dir()?;
        fs::create_dir_all(cwd.join("payloads"))?;
        Ok(InstallOptions {
            install_root: cwd.join("target"),
            payload_root: cwd.join("payloads"),
            command_dir: cwd.clone(),
            backups_root: cwd.join("backups"),
        })
    }

    fn manifest(steps: Vec<Step>) -> Manifest {
        Manifest {
            app_name: "Neon".into(),
            version: "1.0.0".into(),
            payload_dir: "payloads".into(),
            steps,
            ..Default::default()
        }
    }

    fn drain(mut receiver: UnboundedReceiver<LogLine>) -> Vec<LogLine> {
        let mut lines = Vec::new();
        while let Ok(line) = receiver.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[sealed_test]
    fn copy_then_set_json_value() -> anyhow::Result<()> {
        let options = options()?;
        fs::create_dir_all("payloads/theme")?;
        fs::write("payloads/theme/a.css", ".glow { color: #f0f; }")?;
        let manifest = manifest(vec![
            Step::new(Decree::Copy {
                src: "theme/a.css".into(),
                dest: "out/a.css".into(),
            }),
            Step::new(Decree::SetJsonValue {
                file: "out/settings.json".into(),
                key_path: "theme".into(),
                value_type: ValueKind::String,
                value_raw: "dark".into(),
            }),
        ]);

        let report = Installer::new(&manifest, options, Scripted::default(), ProgressLog::detached()).run()?;

        assert_eq!(report.steps_run, 2);
        assert_eq!(report.backup, None);
        assert_eq!(fs::read("target/out/a.css")?, fs::read("payloads/theme/a.css")?);
        let settings: Value = serde_json::from_str(&fs::read_to_string("target/out/settings.json")?)?;
        assert_eq!(settings, serde_json::json!({ "theme": "dark" }));

        Ok(())
    }

    #[sealed_test]
    fn invalid_manifest_touches_nothing() -> anyhow::Result<()> {
        let options = options()?;
        fs::write("payloads/a.css", "a")?;
        let manifest = manifest(vec![
            Step::new(Decree::Copy {
                src: "a.css".into(),
                dest: "out/a.css".into(),
            }),
            Step::new(Decree::SetJsonValue {
                file: "out/settings.json".into(),
                key_path: "editor.fontSize".into(),
                value_type: ValueKind::Number,
                value_raw: "fourteen".into(),
            }),
        ]);

        let result = Installer::new(&manifest, options, Scripted::default(), ProgressLog::detached()).run();

        assert!(matches!(result, Err(InstallError::Validation(ValidationError::Value { index: 1, .. }))));
        assert!(!Path::new("target").exists());
        assert!(!Path::new("backups").exists());

        Ok(())
    }

    #[sealed_test]
    fn missing_payload_root_is_error() -> anyhow::Result<()> {
        let mut options = options()?;
        options.payload_root = options.payload_root.join("gone");
        let manifest = manifest(vec![]);

        let result = Installer::new(&manifest, options, Scripted::default(), ProgressLog::detached()).run();
        assert!(matches!(result, Err(InstallError::MissingPayloadRoot(_))));

        Ok(())
    }

    #[sealed_test]
    fn patch_block_backs_up_and_replaces() -> anyhow::Result<()> {
        let options = options()?;
        fs::write("payloads/block.css", "\n.glow { color: {{accent}}; }\n")?;
        fs::create_dir_all("target")?;
        fs::write("target/workbench.css", "body {}\n")?;
        let manifest = manifest(vec![Step::new(Decree::PatchBlock {
            file: "workbench.css".into(),
            start_marker: "/* neon:start */".into(),
            end_marker: "/* neon:end */".into(),
            content_file: "block.css".into(),
            replacements: BTreeMap::from([("{{accent}}".into(), "#f0f".into())]),
        })]);

        let session = BackupSession::with_timestamp(&options.backups_root, "Neon", "20250101_120000");
        let report = Installer::new(&manifest, options.clone(), Scripted::default(), ProgressLog::detached())
            .with_backup_session(session)
            .run()?;

        let expect = indoc! {"
            body {}

            /* neon:start */
            .glow { color: #f0f; }
            /* neon:end */
        "};
        assert_eq!(fs::read_to_string("target/workbench.css")?, expect);

        let record = report.backup.expect("original was backed up");
        assert_eq!(record.timestamp_id, "20250101_120000");
        assert_eq!(record.entries.len(), 1);
        assert_eq!(
            record.entries[0].original,
            options.install_root.join("workbench.css")
        );

        // Second run replaces, never stacks.
        Installer::new(&manifest, options, Scripted::default(), ProgressLog::detached()).run()?;
        assert_eq!(fs::read_to_string("target/workbench.css")?, expect);

        Ok(())
    }

    #[sealed_test]
    fn base64_embed_replaces_every_placeholder() -> anyhow::Result<()> {
        let options = options()?;
        fs::write("payloads/logo.bin", [0u8, 1, 2, 253, 254, 255])?;
        fs::create_dir_all("target")?;
        fs::write("target/panel.html", "<img src=\"data:;base64,__LOGO__\"> __LOGO__")?;
        let manifest = manifest(vec![Step::new(Decree::Base64Embed {
            file: "panel.html".into(),
            placeholder: "__LOGO__".into(),
            input_file: "logo.bin".into(),
        })]);

        Installer::new(&manifest, options, Scripted::default(), ProgressLog::detached()).run()?;

        assert_eq!(
            fs::read_to_string("target/panel.html")?,
            "<img src=\"data:;base64,AAEC/f7/\"> AAEC/f7/"
        );

        Ok(())
    }

    #[sealed_test]
    fn disabled_steps_are_skipped() -> anyhow::Result<()> {
        let options = options()?;
        let manifest = manifest(vec![Step::disabled(Decree::Copy {
            src: "missing.css".into(),
            dest: "out/missing.css".into(),
        })]);

        let report = Installer::new(&manifest, options, Scripted::default(), ProgressLog::detached()).run()?;
        assert_eq!(report.steps_run, 0);
        assert_eq!(report.steps_skipped, 1);

        Ok(())
    }

    #[cfg(unix)]
    #[sealed_test]
    fn failing_command_halts_run() -> anyhow::Result<()> {
        let options = options()?;
        fs::write("payloads/a.css", "a")?;
        let manifest = manifest(vec![
            Step::new(Decree::RunCommand {
                command: "sh".into(),
                args: vec!["-c".into(), "echo nope >&2; exit 1".into()],
            }),
            Step::new(Decree::Copy {
                src: "a.css".into(),
                dest: "out/a.css".into(),
            }),
        ]);
        let (log, receiver) = ProgressLog::channel();

        let result = Installer::new(&manifest, options, Scripted::answering([true]), log).run();

        assert!(matches!(
            result,
            Err(InstallError::StepFailed {
                index: 0,
                kind: DecreeKind::RunCommand,
                source: StepError::Command(CommandError::Failed { .. }),
            })
        ));
        assert!(!Path::new("target/out/a.css").exists());

        let lines = drain(receiver);
        let last = lines.last().expect("log lines were emitted");
        assert_eq!(last.level, LogLevel::Error);
        assert!(last.message.contains("stderr: nope"));
        assert!(lines.windows(2).all(|pair| pair[0].seq < pair[1].seq));

        Ok(())
    }

    #[sealed_test]
    fn declined_command_cancels_run() -> anyhow::Result<()> {
        let options = options()?;
        let manifest = manifest(vec![Step::new(Decree::RunCommand {
            command: "code".into(),
            args: vec!["--install-extension".into(), "neon.vsix".into()],
        })]);
        let mut confirm = Scripted::answering([false]);

        let result = Installer::new(&manifest, options, &mut confirm, ProgressLog::detached()).run();

        assert!(matches!(result, Err(InstallError::Cancelled { index: 0 })));
        assert_eq!(
            confirm.asked,
            vec![Prompt::RunCommand {
                command: "code".into(),
                args: vec!["--install-extension".into(), "neon.vsix".into()],
            }]
        );

        Ok(())
    }

    #[test]
    fn error_chain_joins_sources() {
        let error = InstallError::StepFailed {
            index: 2,
            kind: DecreeKind::PatchBlock,
            source: StepError::Patch(PatchError::MissingPatchTarget(PathBuf::from("a.css"))),
        };
        assert_eq!(
            error_chain(&error),
            "step 2 (patchBlock) failed: patch target \"a.css\" does not exist"
        );
    }
}
