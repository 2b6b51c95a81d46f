use std::error::Error;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use envelope::EnvelopeError;
use walk::WalkError;

/// Error produced when the pipeline fails.
///
/// A tree run surfaces exactly one of these: the first failure observed by
/// any participant.
#[derive(Debug)]
pub struct PipelineError {
    kind: PipelineErrorKind,
}

impl PipelineError {
    fn new(kind: PipelineErrorKind) -> Self {
        Self { kind }
    }

    /// Constructs the error for identical source and destination paths.
    #[must_use]
    pub fn same_file(path: PathBuf) -> Self {
        Self::new(PipelineErrorKind::SameFile { path })
    }

    /// Constructs a filesystem error with action context.
    #[must_use]
    pub fn io(action: &'static str, path: PathBuf, source: io::Error) -> Self {
        Self::new(PipelineErrorKind::Io {
            action,
            path,
            source,
        })
    }

    /// Constructs a transform error for the named file.
    #[must_use]
    pub fn envelope(path: PathBuf, source: EnvelopeError) -> Self {
        Self::new(PipelineErrorKind::Envelope { path, source })
    }

    /// Constructs a traversal error.
    #[must_use]
    pub fn walk(source: WalkError) -> Self {
        Self::new(PipelineErrorKind::Walk { source })
    }

    /// Provides access to the underlying error kind.
    #[must_use]
    pub fn kind(&self) -> &PipelineErrorKind {
        &self.kind
    }

    /// Returns the path the failure is about, when one is known.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.kind {
            PipelineErrorKind::SameFile { path }
            | PipelineErrorKind::Io { path, .. }
            | PipelineErrorKind::Envelope { path, .. } => Some(path),
            PipelineErrorKind::Walk { source } => Some(source.path()),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            PipelineErrorKind::SameFile { path } => {
                write!(
                    f,
                    "source and destination are the same path: '{}'",
                    path.display()
                )
            }
            PipelineErrorKind::Io {
                action,
                path,
                source,
            } => {
                write!(f, "failed to {action} '{}': {source}", path.display())
            }
            PipelineErrorKind::Envelope { path, source } => {
                write!(f, "'{}': {source}", path.display())
            }
            PipelineErrorKind::Walk { source } => write!(f, "{source}"),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            PipelineErrorKind::SameFile { .. } => None,
            PipelineErrorKind::Io { source, .. } => Some(source),
            PipelineErrorKind::Envelope { source, .. } => Some(source),
            PipelineErrorKind::Walk { source } => Some(source),
        }
    }
}

/// Classification of pipeline failures.
#[derive(Debug)]
pub enum PipelineErrorKind {
    /// Source and destination resolve to the same path.
    SameFile {
        /// The offending path.
        path: PathBuf,
    },
    /// Filesystem interaction failed.
    Io {
        /// Action being performed.
        action: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// The message transform rejected a file.
    Envelope {
        /// File being transformed.
        path: PathBuf,
        /// Underlying error.
        source: EnvelopeError,
    },
    /// Directory traversal failed.
    Walk {
        /// Underlying error.
        source: WalkError,
    },
}
