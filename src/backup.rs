// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Backup archive management.
//!
//! Before an install touches anything that already exists on the target,
//! the original is copied into a __backup archive__. Archives are scoped per
//! application, and per install run.
//!
//! # Backup Archive Layout
//!
//! ```text
//! <backups root>/                     e.g. Documents/MisfitBackups
//! └── <app namespace>/
//!     └── backup_<YYYYMMDD_HHMMSS>/
//!         ├── restore_map.json        backup record
//!         └── abs/...                 originals, mirrored by absolute path
//! ```
//!
//! Timestamps sort lexicographically, so the newest archive is simply the
//! greatest directory name. Archives that predate app scoping live directly
//! under the backups root.
//!
//! # First Touch Wins
//!
//! A backup session considers each path at most once. The first time a path
//! is handed over, whatever sits there gets archived. If nothing sits there,
//! that is remembered too. Later requests for the same path, or for anything
//! beneath a directory that was already considered, are ignored. Thus, the
//! archive always reflects the state before the run started, never some
//! state a previous step left behind.
//!
//! A directory handed over after some of its contents were already
//! considered keeps those earlier captures. Descendants archived earlier stay
//! as they were, and descendants that did not exist are left out.

pub mod restore;

use crate::{
    fs_utils::{copy_path, copy_recursively_except, write_atomic},
    path::{backup_namespace, sanitize_component},
};

use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Name of backup record file inside each backup archive.
pub const RECORD_FILE_NAME: &str = "restore_map.json";

/// Prefix of every backup archive directory name.
pub const BACKUP_DIR_PREFIX: &str = "backup_";

/// Backup record of one install run.
///
/// # Invariant
///
/// - Entries are only ever appended.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub app_name: String,
    pub timestamp_id: String,
    pub entries: Vec<BackupEntry>,
}

/// Archived original.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct BackupEntry {
    /// Absolute path of original.
    pub original: PathBuf,

    /// Path of archived copy relative to backup archive directory.
    pub archived: PathBuf,
}

/// Result of handing a path to a backup session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    /// Original was archived at given path.
    Captured(PathBuf),

    /// Nothing existed at path, so there is nothing to archive.
    Absent,

    /// Path was already considered earlier in this run.
    AlreadyConsidered,
}

/// Backup session of a single install run.
#[derive(Debug)]
pub struct BackupSession {
    app_dir: PathBuf,
    archive_dir: Option<PathBuf>,
    record: BackupRecord,
    considered: Vec<PathBuf>,
}

impl BackupSession {
    /// Construct new backup session stamped with current local time.
    ///
    /// Nothing is written until the first original gets captured.
    pub fn new(backups_root: &Path, app_name: &str) -> Self {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        Self::with_timestamp(backups_root, app_name, timestamp)
    }

    /// Construct new backup session with explicit timestamp identifier.
    pub fn with_timestamp(
        backups_root: &Path,
        app_name: &str,
        timestamp_id: impl Into<String>,
    ) -> Self {
        Self {
            app_dir: backups_root.join(backup_namespace(app_name)),
            archive_dir: None,
            record: BackupRecord {
                app_name: app_name.into(),
                timestamp_id: timestamp_id.into(),
                entries: Vec::new(),
            },
            considered: Vec::new(),
        }
    }

    /// Capture original at path, unless already considered this run.
    ///
    /// Directories are captured recursively. A missing path is a successful
    /// no-op.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError`] if original cannot be archived.
    #[instrument(skip(self), level = "debug")]
    pub fn snapshot(&mut self, path: &Path) -> Result<Snapshot> {
        let original = std::path::absolute(path).map_err(|source| BackupError::Resolve {
            source,
            path: path.to_path_buf(),
        })?;

        if self
            .considered
            .iter()
            .any(|seen| original.starts_with(seen))
        {
            debug!("{:?} already considered", original.display());
            return Ok(Snapshot::AlreadyConsidered);
        }
        let metadata = match fs::symlink_metadata(&original) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!("nothing to back up at {:?}", original.display());
                self.considered.push(original);
                return Ok(Snapshot::Absent);
            }
            Err(source) => {
                return Err(BackupError::Resolve {
                    source,
                    path: original,
                })
            }
        };

        let archive_dir = self.ensure_archive_dir()?;
        let archived = archive_rel_path(&original);
        let dest = archive_dir.join(&archived);
        let copied = if metadata.is_dir() {
            // INVARIANT: Descendants considered earlier already hold their
            //   pre-run state in the archive, or had none.
            let earlier = self.considered_below(&original);
            copy_recursively_except(&original, &dest, &|path| {
                earlier.iter().any(|seen| seen == path)
            })
        } else {
            copy_path(&original, &dest)
        };
        copied.map_err(|source| BackupError::Archive {
            source,
            path: original.clone(),
        })?;

        info!("backed up {:?} to {:?}", original.display(), dest.display());
        self.considered.push(original.clone());
        self.record.entries.push(BackupEntry { original, archived });
        self.write_record(&archive_dir)?;

        Ok(Snapshot::Captured(dest))
    }

    /// Backup record, if anything was captured this run.
    pub fn record(&self) -> Option<&BackupRecord> {
        self.archive_dir.as_ref().map(|_| &self.record)
    }

    /// Backup archive directory, if anything was captured this run.
    pub fn archive_dir(&self) -> Option<&Path> {
        self.archive_dir.as_deref()
    }

    /// Finish session, and hand back its record if anything was captured.
    pub fn into_record(self) -> Option<BackupRecord> {
        self.archive_dir.map(|_| self.record)
    }

    fn considered_below(&self, dir: &Path) -> Vec<PathBuf> {
        self.considered
            .iter()
            .filter(|seen| seen.starts_with(dir))
            .cloned()
            .collect()
    }

    fn ensure_archive_dir(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.archive_dir {
            return Ok(dir.clone());
        }

        fs::create_dir_all(&self.app_dir).map_err(|source| BackupError::CreateArchive {
            source,
            path: self.app_dir.clone(),
        })?;

        // INVARIANT: Claim a fresh directory, even if another run used the
        //   same second.
        let base = format!("{BACKUP_DIR_PREFIX}{}", self.record.timestamp_id);
        let mut attempt = 0usize;
        loop {
            let name = match attempt {
                0 => base.clone(),
                n => format!("{base}_{n}"),
            };
            let candidate = self.app_dir.join(name);
            match fs::create_dir(&candidate) {
                Ok(()) => {
                    info!("created backup archive {:?}", candidate.display());
                    self.archive_dir = Some(candidate.clone());
                    return Ok(candidate);
                }
                Err(error) if error.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(source) => {
                    return Err(BackupError::CreateArchive {
                        source,
                        path: candidate,
                    })
                }
            }
        }
    }

    fn write_record(&self, archive_dir: &Path) -> Result<()> {
        let path = archive_dir.join(RECORD_FILE_NAME);
        let data = serde_json::to_string_pretty(&self.record).map_err(BackupError::Serialize)?;
        write_atomic(&path, data).map_err(|source| BackupError::WriteRecord { source, path })
    }
}

/// Mirror absolute path under `abs/` inside a backup archive.
///
/// Root components are dropped, and Windows drive prefixes become a single
/// sanitized component.
pub fn archive_rel_path(original: &Path) -> PathBuf {
    let mut rel = PathBuf::from("abs");
    for component in original.components() {
        match component {
            Component::Prefix(prefix) => {
                rel.push(sanitize_component(&prefix.as_os_str().to_string_lossy()))
            }
            Component::Normal(os) => rel.push(os),
            Component::RootDir | Component::CurDir | Component::ParentDir => {}
        }
    }

    rel
}

/// Backup error types.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("failed to resolve {:?} for backup", path.display())]
    Resolve {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error("failed to create backup archive {:?}", path.display())]
    CreateArchive {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error("failed to archive {:?}", path.display())]
    Archive {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error("failed to serialize backup record")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to write backup record {:?}", path.display())]
    WriteRecord {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
type Result<T, E = BackupError> = std::result::Result<T, E>;
