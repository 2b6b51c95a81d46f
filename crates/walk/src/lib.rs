#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `walk` provides the filesystem traversal used by the sealdir pipeline when
//! discovering files under a source root. The walker yields every entry below
//! the root in depth-first order together with the metadata captured at
//! discovery time and the path relative to the root, which the pipeline uses
//! to re-root output files under the destination directory.
//!
//! # Design
//!
//! - [`Walker::new`] validates the root and returns an [`Iterator`] over
//!   [`WalkEntry`] values. Directory contents are sorted lexicographically
//!   before being yielded so the sequence is stable across platforms and
//!   filesystems.
//! - Symbolic links are reported with their own metadata and never followed,
//!   so a link pointing back at an ancestor cannot produce a cycle.
//! - The first traversal error (unreadable directory, metadata failure) ends
//!   the walk: the iterator yields the error once and then returns `None`.
//!
//! # Invariants
//!
//! - Every yielded [`WalkEntry`] lies strictly below the root; relative paths
//!   never contain `..` segments and are never empty.
//! - Traversal never panics; all filesystem failures surface as
//!   [`WalkError`] values carrying the offending path.

use std::env;
use std::error::Error;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Depth-first iterator over the entries below a root directory.
pub struct Walker {
    stack: Vec<DirectoryState>,
    finished: bool,
}

impl Walker {
    /// Starts a traversal rooted at `root`.
    ///
    /// The root must be an existing directory; it is resolved against the
    /// current working directory when relative. The root itself is not
    /// yielded, traversal starts with its children.
    pub fn new<P: Into<PathBuf>>(root: P) -> Result<Self, WalkError> {
        let root = absolutize(root.into())?;
        let metadata = fs::symlink_metadata(&root)
            .map_err(|error| WalkError::root_metadata(root.clone(), error))?;
        if !metadata.file_type().is_dir() {
            return Err(WalkError::root_not_directory(root));
        }

        let state = DirectoryState::new(root, PathBuf::new())?;
        Ok(Self {
            stack: vec![state],
            finished: false,
        })
    }

    fn prepare_entry(
        &mut self,
        full_path: PathBuf,
        relative_path: PathBuf,
    ) -> Result<WalkEntry, WalkError> {
        let metadata = fs::symlink_metadata(&full_path)
            .map_err(|error| WalkError::metadata(full_path.clone(), error))?;

        if metadata.file_type().is_dir() {
            let state = DirectoryState::new(full_path.clone(), relative_path.clone())?;
            self.stack.push(state);
        }

        Ok(WalkEntry {
            full_path,
            relative_path,
            metadata,
        })
    }
}

impl Iterator for Walker {
    type Item = Result<WalkEntry, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let (full_path, relative_path) = {
                let state = self.stack.last_mut()?;
                if let Some(name) = state.next_name() {
                    let full_path = state.fs_path.join(&name);
                    let relative_path = if state.relative_prefix.as_os_str().is_empty() {
                        PathBuf::from(&name)
                    } else {
                        let mut rel = state.relative_prefix.clone();
                        rel.push(&name);
                        rel
                    };
                    (full_path, relative_path)
                } else {
                    self.stack.pop();
                    continue;
                }
            };

            match self.prepare_entry(full_path, relative_path) {
                Ok(entry) => return Some(Ok(entry)),
                Err(error) => {
                    self.finished = true;
                    return Some(Err(error));
                }
            }
        }
    }
}

struct DirectoryState {
    fs_path: PathBuf,
    relative_prefix: PathBuf,
    entries: Vec<OsString>,
    index: usize,
}

impl DirectoryState {
    fn new(fs_path: PathBuf, relative_prefix: PathBuf) -> Result<Self, WalkError> {
        let read_dir =
            fs::read_dir(&fs_path).map_err(|error| WalkError::read_dir(fs_path.clone(), error))?;
        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|error| WalkError::read_dir_entry(fs_path.clone(), error))?;
            entries.push(entry.file_name());
        }
        entries.sort();

        Ok(Self {
            fs_path,
            relative_prefix,
            entries,
            index: 0,
        })
    }

    fn next_name(&mut self) -> Option<OsString> {
        let name = self.entries.get(self.index)?.clone();
        self.index += 1;
        Some(name)
    }
}

fn absolutize(path: PathBuf) -> Result<PathBuf, WalkError> {
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = env::current_dir()
        .map_err(|error| WalkError::current_dir(path.clone(), error))?;
    Ok(cwd.join(path))
}

/// One entry discovered during traversal.
#[derive(Debug)]
pub struct WalkEntry {
    full_path: PathBuf,
    relative_path: PathBuf,
    metadata: fs::Metadata,
}

impl WalkEntry {
    /// Returns the absolute path of the entry.
    #[must_use]
    pub fn full_path(&self) -> &Path {
        &self.full_path
    }

    /// Returns the path relative to the traversal root.
    #[must_use]
    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }

    /// Provides access to the metadata captured when the entry was found.
    #[must_use]
    pub fn metadata(&self) -> &fs::Metadata {
        &self.metadata
    }

    /// Consumes the entry, returning its absolute and relative paths.
    #[must_use]
    pub fn into_paths(self) -> (PathBuf, PathBuf) {
        (self.full_path, self.relative_path)
    }
}

/// Error returned when traversal fails.
#[derive(Debug)]
pub struct WalkError {
    kind: WalkErrorKind,
}

impl WalkError {
    fn new(kind: WalkErrorKind) -> Self {
        Self { kind }
    }

    fn root_metadata(path: PathBuf, source: io::Error) -> Self {
        Self::new(WalkErrorKind::RootMetadata { path, source })
    }

    fn current_dir(path: PathBuf, source: io::Error) -> Self {
        Self::new(WalkErrorKind::CurrentDir { path, source })
    }

    fn root_not_directory(path: PathBuf) -> Self {
        Self::new(WalkErrorKind::RootNotDirectory { path })
    }

    fn read_dir(path: PathBuf, source: io::Error) -> Self {
        Self::new(WalkErrorKind::ReadDir { path, source })
    }

    fn read_dir_entry(path: PathBuf, source: io::Error) -> Self {
        Self::new(WalkErrorKind::ReadDirEntry { path, source })
    }

    fn metadata(path: PathBuf, source: io::Error) -> Self {
        Self::new(WalkErrorKind::Metadata { path, source })
    }

    /// Returns the specific failure that terminated traversal.
    #[must_use]
    pub fn kind(&self) -> &WalkErrorKind {
        &self.kind
    }

    /// Returns the path involved in the failure.
    #[must_use]
    pub fn path(&self) -> &Path {
        match &self.kind {
            WalkErrorKind::RootMetadata { path, .. }
            | WalkErrorKind::CurrentDir { path, .. }
            | WalkErrorKind::RootNotDirectory { path }
            | WalkErrorKind::ReadDir { path, .. }
            | WalkErrorKind::ReadDirEntry { path, .. }
            | WalkErrorKind::Metadata { path, .. } => path,
        }
    }
}

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            WalkErrorKind::RootMetadata { path, source } => {
                write!(f, "failed to inspect root '{}': {source}", path.display())
            }
            WalkErrorKind::CurrentDir { path, source } => {
                write!(
                    f,
                    "failed to resolve '{}' against the working directory: {source}",
                    path.display()
                )
            }
            WalkErrorKind::RootNotDirectory { path } => {
                write!(f, "root '{}' is not a directory", path.display())
            }
            WalkErrorKind::ReadDir { path, source } => {
                write!(f, "failed to read directory '{}': {source}", path.display())
            }
            WalkErrorKind::ReadDirEntry { path, source } => {
                write!(
                    f,
                    "failed to read an entry of directory '{}': {source}",
                    path.display()
                )
            }
            WalkErrorKind::Metadata { path, source } => {
                write!(f, "failed to inspect '{}': {source}", path.display())
            }
        }
    }
}

impl Error for WalkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            WalkErrorKind::RootMetadata { source, .. }
            | WalkErrorKind::CurrentDir { source, .. }
            | WalkErrorKind::ReadDir { source, .. }
            | WalkErrorKind::ReadDirEntry { source, .. }
            | WalkErrorKind::Metadata { source, .. } => Some(source),
            WalkErrorKind::RootNotDirectory { .. } => None,
        }
    }
}

/// Classification of traversal failures.
#[derive(Debug)]
pub enum WalkErrorKind {
    /// Metadata for the root path could not be queried.
    RootMetadata {
        /// Root path supplied to [`Walker::new`].
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// The working directory could not be determined while resolving a
    /// relative root.
    CurrentDir {
        /// Relative root path supplied to [`Walker::new`].
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// The root path exists but is not a directory.
    RootNotDirectory {
        /// Root path supplied to [`Walker::new`].
        path: PathBuf,
    },
    /// A directory could not be opened for reading.
    ReadDir {
        /// Directory that failed to open.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// Reading the next entry of an open directory failed.
    ReadDirEntry {
        /// Directory being read.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// Metadata for a discovered entry could not be queried.
    Metadata {
        /// Entry that failed.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
}

#[cfg(test)]
mod tests;
