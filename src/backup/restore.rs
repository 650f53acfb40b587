// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Replay backup archives over their original locations.
//!
//! Restoration only needs an application name. The newest archive in the
//! application's namespace wins. If the namespace holds nothing, the legacy
//! shared root is searched instead, because archives written before backups
//! were scoped per application still live there.

use crate::{
    backup::{BackupRecord, BACKUP_DIR_PREFIX, RECORD_FILE_NAME},
    fs_utils::{copy_path, remove_path_if_exists},
    path::{backup_namespace, normalize_rel_path, RelPathError},
};

use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{info, instrument, warn};

/// What a restore replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// Backup archive that was replayed.
    pub backup_dir: PathBuf,

    /// Original locations that were overwritten, shallowest first.
    pub restored: Vec<PathBuf>,
}

/// Restore latest backup archive of an application.
///
/// Searches `<backups_root>/<namespace>` first, then `<backups_root>` itself.
/// Passing no application name searches the legacy shared root only.
///
/// Every archived copy is checked before anything gets overwritten. Each
/// original is then fully replaced: directories are removed before the
/// archived tree is copied back, so nothing is merged. Files created by the
/// install that had no original are left alone.
///
/// # Errors
///
/// - Return [`RestoreError::NoBackupFound`] if no backup archive exists.
/// - Return [`RestoreError::MissingRecord`] if chosen archive has no record.
/// - Return [`RestoreError::MissingArchive`] if record points at a copy that
///   is not inside the archive.
/// - Return [`RestoreError`] I/O variants if replay fails.
#[instrument(level = "debug")]
pub fn restore(backups_root: &Path, app_name: Option<&str>) -> Result<RestoreReport> {
    let backup_dir = find_latest(backups_root, app_name)?;
    info!("restore from {:?}", backup_dir.display());

    let record_path = backup_dir.join(RECORD_FILE_NAME);
    let data = match fs::read_to_string(&record_path) {
        Ok(data) => data,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            return Err(RestoreError::MissingRecord(record_path))
        }
        Err(source) => {
            return Err(RestoreError::Read {
                source,
                path: record_path,
            })
        }
    };
    let record: RecordFile = serde_json::from_str(&data).map_err(|source| RestoreError::Parse {
        source,
        path: record_path.clone(),
    })?;

    let mut plan = Vec::new();
    for (archived, original) in record.into_pairs() {
        let archived = normalize_rel_path(&archived.to_string_lossy(), false)?;
        let source = backup_dir.join(archived);
        if fs::symlink_metadata(&source).is_err() {
            return Err(RestoreError::MissingArchive(source));
        }
        plan.push((source, original));
    }

    // INVARIANT: Ancestors replay before descendants, so a file archived on
    //   its own wins over the copy inside its directory's archive.
    plan.sort_by_key(|(_, original)| original.components().count());

    let mut restored = Vec::with_capacity(plan.len());
    for (source, original) in plan {
        if source.is_dir() || original.is_dir() {
            remove_path_if_exists(&original).map_err(|source| RestoreError::Replay {
                source,
                path: original.clone(),
            })?;
        }
        copy_path(&source, &original).map_err(|source| RestoreError::Replay {
            source,
            path: original.clone(),
        })?;
        info!("restored {:?}", original.display());
        restored.push(original);
    }

    Ok(RestoreReport {
        backup_dir,
        restored,
    })
}

/// Find latest backup archive, falling back to legacy shared root.
///
/// # Errors
///
/// - Return [`RestoreError::NoBackupFound`] if neither location holds an
///   archive.
pub fn find_latest(backups_root: &Path, app_name: Option<&str>) -> Result<PathBuf> {
    if let Some(app_name) = app_name {
        let scoped = backups_root.join(backup_namespace(app_name));
        if let Some(latest) = latest_backup_dir(&scoped)? {
            return Ok(latest);
        }
        warn!(
            "no backups for {app_name:?} in {:?}, trying legacy location",
            scoped.display()
        );
    }

    latest_backup_dir(backups_root)?.ok_or_else(|| RestoreError::NoBackupFound {
        app_name: app_name.map(Into::into),
    })
}

/// Latest `backup_*` directory inside root, if any.
///
/// Names are compared segment by segment between underscores, numerically
/// where a segment is a number, so `backup_X_10` comes after `backup_X_9`.
pub fn latest_backup_dir(root: &Path) -> Result<Option<PathBuf>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(RestoreError::Read {
                source,
                path: root.to_path_buf(),
            })
        }
    };

    let mut latest: Option<(Vec<NameSegment>, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|source| RestoreError::Read {
            source,
            path: root.to_path_buf(),
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(stamp) = name.strip_prefix(BACKUP_DIR_PREFIX) else {
            continue;
        };
        if !entry.path().is_dir() {
            continue;
        }

        let key = stamp.split('_').map(NameSegment::parse).collect::<Vec<_>>();
        if latest.as_ref().map_or(true, |(best, _)| key > *best) {
            latest = Some((key, entry.path()));
        }
    }

    Ok(latest.map(|(_, path)| path))
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum NameSegment {
    Number(u64),
    Text(String),
}

impl NameSegment {
    fn parse(segment: &str) -> Self {
        segment
            .parse()
            .map_or_else(|_| Self::Text(segment.into()), Self::Number)
    }
}

// INVARIANT: Current record format is tried first. Legacy archives map
//   archived relative paths straight to original absolute paths.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordFile {
    Current(BackupRecord),
    Legacy(BTreeMap<PathBuf, PathBuf>),
}

impl RecordFile {
    fn into_pairs(self) -> Vec<(PathBuf, PathBuf)> {
        match self {
            Self::Current(record) => record
                .entries
                .into_iter()
                .map(|entry| (entry.archived, entry.original))
                .collect(),
            Self::Legacy(map) => map.into_iter().collect(),
        }
    }
}

/// Restore error types.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("no backup found{}", app_name.as_ref().map(|name| format!(" for {name:?}")).unwrap_or_default())]
    NoBackupFound { app_name: Option<String> },

    #[error("backup record {:?} does not exist", .0.display())]
    MissingRecord(PathBuf),

    #[error("archived copy {:?} does not exist", .0.display())]
    MissingArchive(PathBuf),

    #[error("backup record lists an archived path outside of its archive")]
    ArchivedPath(#[from] RelPathError),

    #[error("failed to parse backup record {:?}", path.display())]
    Parse {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error("failed to restore {:?}", path.display())]
    Replay {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
type Result<T, E = RestoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupEntry, BackupSession};
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test]
    fn restore_without_backup_is_error() {
        let result = restore(Path::new("backups"), Some("Neon"));
        assert!(matches!(
            result,
            Err(RestoreError::NoBackupFound { app_name: Some(ref name) }) if name == "Neon"
        ));
    }

    #[sealed_test]
    fn restore_picks_latest_archive() -> anyhow::Result<()> {
        fs::write("settings.json", "oldest")?;
        BackupSession::with_timestamp(Path::new("backups"), "Neon", "20240101_000000")
            .snapshot(Path::new("settings.json"))?;
        fs::write("settings.json", "newest")?;
        BackupSession::with_timestamp(Path::new("backups"), "Neon", "20250101_000000")
            .snapshot(Path::new("settings.json"))?;
        fs::write("settings.json", "clobbered")?;

        let report = restore(Path::new("backups"), Some("Neon"))?;
        assert_eq!(
            report.backup_dir,
            PathBuf::from("backups/Neon/backup_20250101_000000")
        );
        assert_eq!(fs::read_to_string("settings.json")?, "newest");

        Ok(())
    }

    #[sealed_test]
    fn restore_replaces_directories_without_merging() -> anyhow::Result<()> {
        fs::create_dir_all("theme")?;
        fs::write("theme/a.css", "original")?;
        let mut session = BackupSession::with_timestamp(Path::new("backups"), "Neon", "1");
        session.snapshot(Path::new("theme"))?;

        fs::write("theme/a.css", "patched")?;
        fs::write("theme/extra.css", "added by install")?;

        let report = restore(Path::new("backups"), Some("Neon"))?;
        assert_eq!(report.restored, vec![std::path::absolute("theme")?]);
        assert_eq!(fs::read_to_string("theme/a.css")?, "original");
        assert!(!Path::new("theme/extra.css").exists());

        Ok(())
    }

    #[sealed_test]
    fn restore_falls_back_to_legacy_root() -> anyhow::Result<()> {
        let original = std::path::absolute("settings.json")?;
        fs::create_dir_all("backups/backup_20230101_000000/abs")?;
        fs::write("backups/backup_20230101_000000/abs/settings.json", "legacy")?;
        let legacy = BTreeMap::from([(PathBuf::from("abs/settings.json"), original.clone())]);
        fs::write(
            "backups/backup_20230101_000000/restore_map.json",
            serde_json::to_string(&legacy)?,
        )?;

        let report = restore(Path::new("backups"), Some("Neon"))?;
        assert_eq!(report.restored, vec![original]);
        assert_eq!(fs::read_to_string("settings.json")?, "legacy");

        Ok(())
    }

    #[sealed_test]
    fn restore_requires_record() -> anyhow::Result<()> {
        fs::create_dir_all("backups/Neon/backup_20250101_000000")?;
        let result = restore(Path::new("backups"), Some("Neon"));
        assert!(matches!(result, Err(RestoreError::MissingRecord(_))));

        Ok(())
    }

    #[sealed_test]
    fn latest_backup_dir_ignores_unrelated_entries() -> anyhow::Result<()> {
        fs::create_dir_all("root/backup_20240101_000000")?;
        fs::create_dir_all("root/backup_20240101_000000_1")?;
        fs::create_dir_all("root/zzz-not-a-backup")?;
        fs::write("root/backup_99999999_999999", "a file, not an archive")?;

        assert_eq!(
            latest_backup_dir(Path::new("root"))?,
            Some(PathBuf::from("root/backup_20240101_000000_1"))
        );

        fs::create_dir_all("root/backup_20240101_000000_9")?;
        fs::create_dir_all("root/backup_20240101_000000_10")?;
        assert_eq!(
            latest_backup_dir(Path::new("root"))?,
            Some(PathBuf::from("root/backup_20240101_000000_10"))
        );
        assert_eq!(latest_backup_dir(Path::new("missing"))?, None);

        Ok(())
    }

    #[sealed_test]
    fn restore_keeps_file_captured_before_its_directory() -> anyhow::Result<()> {
        fs::create_dir_all("theme")?;
        fs::write("theme/a.css", "original")?;
        let mut session = BackupSession::with_timestamp(Path::new("backups"), "Neon", "1");

        session.snapshot(Path::new("theme/a.css"))?;
        fs::write("theme/a.css", "patched")?;
        session.snapshot(Path::new("theme/new.css"))?;
        fs::write("theme/new.css", "created by install")?;
        session.snapshot(Path::new("theme"))?;
        fs::write("theme/a.css", "copied over")?;

        restore(Path::new("backups"), Some("Neon"))?;
        assert_eq!(fs::read_to_string("theme/a.css")?, "original");
        assert!(!Path::new("theme/new.css").exists());

        Ok(())
    }

    #[sealed_test]
    fn restore_replays_ancestors_before_descendants() -> anyhow::Result<()> {
        let theme = std::path::absolute("theme")?;
        let file = theme.join("a.css");
        fs::create_dir_all(&theme)?;
        fs::write(&file, "clobbered")?;

        let archive = Path::new("backups/Neon/backup_1");
        fs::create_dir_all(archive.join("file"))?;
        fs::create_dir_all(archive.join("dir"))?;
        fs::write(archive.join("file/a.css"), "original")?;
        fs::write(archive.join("dir/a.css"), "patched")?;
        let record = BackupRecord {
            app_name: "Neon".into(),
            timestamp_id: "1".into(),
            entries: vec![
                BackupEntry {
                    original: file.clone(),
                    archived: PathBuf::from("file/a.css"),
                },
                BackupEntry {
                    original: theme.clone(),
                    archived: PathBuf::from("dir"),
                },
            ],
        };
        fs::write(archive.join(RECORD_FILE_NAME), serde_json::to_string(&record)?)?;

        let report = restore(Path::new("backups"), Some("Neon"))?;
        assert_eq!(report.restored, vec![theme, file.clone()]);
        assert_eq!(fs::read_to_string(&file)?, "original");

        Ok(())
    }
}
