//! Scratch directories for in-progress root filesystems.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Prefix of every scratch directory name.
pub const SCRATCH_PREFIX: &str = "rootfsbuilder-";

/// A uniquely named directory owned by exactly one build.
///
/// Removed by [`ScratchDir::cleanup`] or, failing that, on drop. Removal
/// never crosses into another filesystem, so a bind mount that failed to
/// unmount is left alone instead of being emptied.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    removed: bool,
}

impl ScratchDir {
    /// Create a fresh scratch directory under `parent`.
    pub fn create_in(parent: &Path) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(parent)?;
        let path = dir.keep();

        // The directory becomes `/` of the new system.
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;

        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory. Safe to call more than once; failures are
    /// logged, never returned.
    pub fn cleanup(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;

        match remove_tree(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed scratch directory"),
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "could not fully remove scratch directory"
            ),
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Remove a directory tree without leaving the filesystem it lives on.
///
/// A missing `path` is not an error. Removal continues past failures and
/// reports the first one.
pub fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    }

    let mut first_error: Option<io::Error> = None;
    let walker = WalkDir::new(path)
        .same_file_system(true)
        .contents_first(true);

    for entry in walker {
        let result = match entry {
            Ok(entry) if entry.file_type().is_dir() => fs::remove_dir(entry.path()),
            Ok(entry) => fs::remove_file(entry.path()),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            if e.kind() != io::ErrorKind::NotFound && first_error.is_none() {
                first_error = Some(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn test_scratch_dir_is_unique_and_world_readable() {
        let parent = tempfile::tempdir().unwrap();
        let a = ScratchDir::create_in(parent.path()).unwrap();
        let b = ScratchDir::create_in(parent.path()).unwrap();

        assert_ne!(a.path(), b.path());
        assert!(a
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(SCRATCH_PREFIX));

        let mode = fs::metadata(a.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[test]
    fn test_cleanup_twice_is_noop() {
        let parent = tempfile::tempdir().unwrap();
        let mut scratch = ScratchDir::create_in(parent.path()).unwrap();
        fs::create_dir_all(scratch.path().join("usr/bin")).unwrap();
        fs::write(scratch.path().join("usr/bin/tool"), "x").unwrap();

        let path = scratch.path().to_path_buf();
        scratch.cleanup();
        assert!(!path.exists());
        scratch.cleanup();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_removes_directory() {
        let parent = tempfile::tempdir().unwrap();
        let path = {
            let scratch = ScratchDir::create_in(parent.path()).unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_tree_missing_path() {
        let parent = tempfile::tempdir().unwrap();
        let missing = parent.path().join("gone");
        assert!(remove_tree(&missing).is_ok());
        assert!(remove_tree(&missing).is_ok());
    }

    #[test]
    fn test_remove_tree_does_not_follow_symlinks() {
        let parent = tempfile::tempdir().unwrap();
        let outside = parent.path().join("outside");
        fs::create_dir(&outside).unwrap();
        fs::write(outside.join("keep.txt"), "keep").unwrap();

        let tree = parent.path().join("tree");
        fs::create_dir(&tree).unwrap();
        symlink(&outside, tree.join("link")).unwrap();

        remove_tree(&tree).unwrap();

        assert!(!tree.exists());
        assert!(outside.join("keep.txt").exists());
    }
}
