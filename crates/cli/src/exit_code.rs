//! Centralized exit code definitions for the `sealdir` binary.
//!
//! Every terminal error path maps onto one of these codes so scripts can
//! distinguish misuse, input-selection problems, filesystem failures, and
//! envelope failures without parsing diagnostics.

use std::fmt;

use engine::{PipelineError, PipelineErrorKind};

/// Exit codes returned by `sealdir` operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ExitCode {
    /// Successful completion.
    Ok = 0,

    /// Syntax or usage error: invalid flags, flag combinations, or operands.
    Syntax = 1,

    /// Errors selecting input files or keys: identical source and
    /// destination, unreadable key files, or an unusable source root.
    Input = 3,

    /// Filesystem I/O failure while reading, staging, or committing a file.
    FileIo = 11,

    /// Envelope failure: unreadable header, no matching key, or an
    /// authentication error in the payload.
    Transform = 12,
}

impl ExitCode {
    /// Returns the raw process exit code.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Short human-readable description of the code.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Ok => "success",
            Self::Syntax => "syntax or usage error",
            Self::Input => "error selecting input files or keys",
            Self::FileIo => "error in file I/O",
            Self::Transform => "error in envelope processing",
        }
    }

    /// Maps a pipeline failure onto the exit code reported to the caller.
    #[must_use]
    pub fn from_pipeline_error(error: &PipelineError) -> Self {
        match error.kind() {
            PipelineErrorKind::SameFile { .. } | PipelineErrorKind::Walk { .. } => Self::Input,
            PipelineErrorKind::Io { .. } => Self::FileIo,
            PipelineErrorKind::Envelope { .. } => Self::Transform,
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_i32(), self.description())
    }
}
