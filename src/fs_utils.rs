// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! File system helpers shared by install, backup, and build logic.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// Replace file contents through a sibling temporary file and a rename.
///
/// Readers either see the old contents or the new ones, never a truncated
/// file. Parent directories are created as needed.
pub fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> io::Result<()> {
    let parent = match path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent)?;
            parent.to_path_buf()
        }
        None => PathBuf::from("."),
    };

    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::other(format!("{} has no file name", path.display())))?;
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(file_name);
    tmp_name.push(".misfit-tmp");
    let tmp_path = parent.join(tmp_name);

    fs::write(&tmp_path, contents)?;
    if let Err(error) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(error);
    }

    Ok(())
}

/// Copy file or directory to destination, creating parents as needed.
///
/// Directories are merged into an existing destination directory. Symbolic
/// links are recreated as links on unix, and followed elsewhere.
pub fn copy_path(src: &Path, dest: &Path) -> io::Result<()> {
    let file_type = fs::symlink_metadata(src)?.file_type();
    if file_type.is_dir() {
        return copy_recursively(src, dest);
    }

    if let Some(parent) = dest.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    if file_type.is_symlink() {
        return copy_symlink(src, dest);
    }
    fs::copy(src, dest)?;

    Ok(())
}

/// Copy directory tree to destination.
pub fn copy_recursively(src: &Path, dest: &Path) -> io::Result<()> {
    copy_recursively_except(src, dest, &|_| false)
}

/// Copy directory tree to destination, leaving out every source path that
/// `skip` accepts.
///
/// Whatever already sits at a skipped path's destination is left alone.
pub fn copy_recursively_except(
    src: &Path,
    dest: &Path,
    skip: &dyn Fn(&Path) -> bool,
) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        if skip(&path) {
            continue;
        }

        let target = dest.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_recursively_except(&path, &target, skip)?;
        } else if file_type.is_symlink() {
            copy_symlink(&path, &target)?;
        } else {
            fs::copy(&path, &target)?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    let link = fs::read_link(src)?;
    remove_path_if_exists(dest)?;
    std::os::unix::fs::symlink(link, dest)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    if fs::metadata(src)?.is_dir() {
        return copy_recursively(src, dest);
    }
    fs::copy(src, dest).map(|_| ())
}

/// Remove file or directory if it exists.
pub fn remove_path_if_exists(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test]
    fn write_atomic_replaces_and_leaves_no_temp_file() -> anyhow::Result<()> {
        write_atomic(Path::new("nested/dir/file.txt"), "one")?;
        write_atomic(Path::new("nested/dir/file.txt"), "two")?;
        assert_eq!(fs::read_to_string("nested/dir/file.txt")?, "two");

        let entries = fs::read_dir("nested/dir")?.count();
        assert_eq!(entries, 1);

        Ok(())
    }

    #[sealed_test]
    fn copy_path_handles_files_and_trees() -> anyhow::Result<()> {
        fs::create_dir_all("src/sub")?;
        fs::write("src/a.txt", "a")?;
        fs::write("src/sub/b.txt", "b")?;

        copy_path(Path::new("src"), Path::new("dest/tree"))?;
        copy_path(Path::new("src/a.txt"), Path::new("dest/single/a.txt"))?;

        assert_eq!(fs::read_to_string("dest/tree/a.txt")?, "a");
        assert_eq!(fs::read_to_string("dest/tree/sub/b.txt")?, "b");
        assert_eq!(fs::read_to_string("dest/single/a.txt")?, "a");

        remove_path_if_exists(Path::new("dest/tree"))?;
        remove_path_if_exists(Path::new("dest/single/a.txt"))?;
        remove_path_if_exists(Path::new("dest/missing"))?;
        assert!(!Path::new("dest/tree").exists());
        assert!(!Path::new("dest/single/a.txt").exists());

        Ok(())
    }

    #[sealed_test]
    fn copy_recursively_except_leaves_skipped_paths_alone() -> anyhow::Result<()> {
        fs::create_dir_all("src/sub")?;
        fs::write("src/a.txt", "new a")?;
        fs::write("src/sub/b.txt", "new b")?;
        fs::create_dir_all("dest/sub")?;
        fs::write("dest/a.txt", "kept a")?;

        let skipped = std::path::absolute("src/a.txt")?;
        copy_recursively_except(&std::path::absolute("src")?, Path::new("dest"), &|path| {
            path == skipped.as_path()
        })?;

        assert_eq!(fs::read_to_string("dest/a.txt")?, "kept a");
        assert_eq!(fs::read_to_string("dest/sub/b.txt")?, "new b");

        Ok(())
    }

    #[cfg(unix)]
    #[sealed_test]
    fn copy_path_recreates_symlinks() -> anyhow::Result<()> {
        fs::create_dir_all("src/real")?;
        fs::write("src/real/a.txt", "a")?;
        std::os::unix::fs::symlink("real", "src/linked")?;
        std::os::unix::fs::symlink("src/real", "top-link")?;

        copy_path(Path::new("src"), Path::new("dest"))?;
        copy_path(Path::new("top-link"), Path::new("copied-link"))?;

        assert!(fs::symlink_metadata("dest/linked")?.file_type().is_symlink());
        assert_eq!(fs::read_link("dest/linked")?, PathBuf::from("real"));
        assert_eq!(fs::read_to_string("dest/linked/a.txt")?, "a");
        assert_eq!(fs::read_link("copied-link")?, PathBuf::from("src/real"));

        Ok(())
    }
}
