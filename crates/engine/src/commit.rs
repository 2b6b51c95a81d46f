//! Atomic publication of destination files.
//!
//! Output is staged into a uniquely named temporary file in the destination
//! directory and renamed onto the final name only after it has been fully
//! written, synced, and given its permissions. Rename within one directory is
//! atomic on every supported platform, so the final name never exists in a
//! partially written state. This is a create-new-or-fail committer: on any
//! failure the temporary file is removed and a pre-existing destination is
//! left untouched.

use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::PipelineError;

/// Buffer size for staged writes; matches the pipeline's historical 512 KiB.
pub(crate) const WRITE_BUFFER_SIZE: usize = 1 << 19;

/// Process-global counter making staged file names unique across workers.
static NEXT_STAGING_ID: AtomicU64 = AtomicU64::new(0);

/// Guard owning a staged temporary file until it is committed or discarded.
///
/// Dropping the guard without [`CommitGuard::commit`] removes the temporary
/// file and leaves the final path untouched.
pub struct CommitGuard {
    final_path: PathBuf,
    staging_path: PathBuf,
    permissions: Permissions,
    committed: bool,
}

impl CommitGuard {
    /// Stages a new temporary file next to `destination`.
    ///
    /// Creates the destination's parent directories as needed, then creates a
    /// uniquely named temporary file in the same directory so the final
    /// rename cannot cross filesystems. The returned [`File`] is open for
    /// writing; wrap it in the caller's buffered writer of choice.
    pub fn new(destination: &Path, permissions: Permissions) -> Result<(Self, File), PipelineError> {
        if let Some(parent) = destination.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|error| {
                PipelineError::io("create destination directory", parent.to_path_buf(), error)
            })?;
        }

        let file_name = destination
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("output"));
        let directory = destination.parent().unwrap_or_else(|| Path::new("."));
        let pid = std::process::id();

        loop {
            let unique = NEXT_STAGING_ID.fetch_add(1, Ordering::Relaxed);
            let staging_path = directory.join(format!(".{file_name}.{pid}.{unique}.tmp"));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&staging_path)
            {
                Ok(file) => {
                    return Ok((
                        Self {
                            final_path: destination.to_path_buf(),
                            staging_path,
                            permissions,
                            committed: false,
                        },
                        file,
                    ));
                }
                Err(error) if error.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(error) => {
                    return Err(PipelineError::io(
                        "create staging file",
                        staging_path,
                        error,
                    ));
                }
            }
        }
    }

    /// Returns the path of the staged temporary file.
    #[must_use]
    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    /// Flushes `writer`, syncs and re-permissions the staged file, and
    /// publishes it under the final name.
    pub fn commit(mut self, writer: BufWriter<File>) -> Result<(), PipelineError> {
        let file = writer.into_inner().map_err(|error| {
            PipelineError::io(
                "flush staging file",
                self.staging_path.clone(),
                error.into_error(),
            )
        })?;
        file.sync_all().map_err(|error| {
            PipelineError::io("sync staging file", self.staging_path.clone(), error)
        })?;
        file.set_permissions(self.permissions.clone()).map_err(|error| {
            PipelineError::io(
                "apply permissions to staging file",
                self.staging_path.clone(),
                error,
            )
        })?;
        drop(file);

        fs::rename(&self.staging_path, &self.final_path).map_err(|error| {
            PipelineError::io(
                "publish staging file",
                self.final_path.clone(),
                error,
            )
        })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for CommitGuard {
    fn drop(&mut self) {
        if !self.committed {
            // Best effort: the staged file may already be gone.
            let _ = fs::remove_file(&self.staging_path);
        }
    }
}

/// Wraps a staged file in the committer's standard buffered writer.
pub(crate) fn buffered(file: File) -> BufWriter<File> {
    BufWriter::with_capacity(WRITE_BUFFER_SIZE, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn default_permissions(dir: &Path) -> Permissions {
        fs::metadata(dir).expect("metadata").permissions()
    }

    #[test]
    fn commit_publishes_under_final_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("final.bin");

        let (guard, file) =
            CommitGuard::new(&dest, default_permissions(temp.path())).expect("guard");
        let staging = guard.staging_path().to_path_buf();
        let mut writer = buffered(file);
        writer.write_all(b"content").expect("write");
        guard.commit(writer).expect("commit");

        assert_eq!(fs::read(&dest).expect("read"), b"content");
        assert!(!staging.exists());
    }

    #[test]
    fn drop_without_commit_removes_staging_and_spares_destination() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("final.bin");
        fs::write(&dest, b"previous").expect("write existing");

        let staging = {
            let (guard, file) =
                CommitGuard::new(&dest, default_permissions(temp.path())).expect("guard");
            let mut writer = buffered(file);
            writer.write_all(b"half written").expect("write");
            guard.staging_path().to_path_buf()
            // Guard dropped here without commit.
        };

        assert!(!staging.exists());
        assert_eq!(fs::read(&dest).expect("read"), b"previous");
    }

    #[test]
    fn staging_lives_in_destination_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("nested").join("final.bin");

        let (guard, _file) =
            CommitGuard::new(&dest, default_permissions(temp.path())).expect("guard");
        assert_eq!(guard.staging_path().parent(), dest.parent());
        assert!(dest.parent().expect("parent").is_dir());
    }

    #[test]
    fn concurrent_guards_use_distinct_staging_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("final.bin");
        let perms = default_permissions(temp.path());

        let (first, _first_file) = CommitGuard::new(&dest, perms.clone()).expect("first");
        let (second, _second_file) = CommitGuard::new(&dest, perms).expect("second");
        assert_ne!(first.staging_path(), second.staging_path());
    }

    #[cfg(unix)]
    #[test]
    fn commit_applies_requested_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("final.bin");

        let (guard, file) =
            CommitGuard::new(&dest, Permissions::from_mode(0o640)).expect("guard");
        let mut writer = buffered(file);
        writer.write_all(b"data").expect("write");
        guard.commit(writer).expect("commit");

        let mode = fs::metadata(&dest).expect("metadata").permissions().mode() & 0o7777;
        assert_eq!(mode, 0o640);
    }
}
