#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `engine` implements the sealdir pipeline: it moves single files, or whole
//! directory trees, between plaintext and the envelope format while
//! guaranteeing that no destination path is ever visible in a partially
//! written state.
//!
//! # Design
//!
//! - [`Transform`] selects the direction (seal or open) and carries the key
//!   material; the engine only streams bytes through it and never interprets
//!   envelope contents.
//! - [`Processor`] handles one file: it streams the source through the
//!   transform into a staged temporary file that is published under the final
//!   name by an atomic rename, with the source's permissions applied first.
//!   A destination of `-` bypasses staging and writes to standard output.
//! - [`run_tree`] fans a directory tree out to a fixed pool of workers fed by
//!   a rendezvous channel. The first failure from any participant cancels
//!   the rest; the pipeline returns only after every thread has drained, and
//!   surfaces exactly that first error.
//!
//! # Invariants
//!
//! - A successfully processed file exists at `destination/relative` with the
//!   source's permission bits and the transform's exact output.
//! - A failed file leaves nothing behind at its final destination path.
//! - At most `workers` files are being processed at any instant.

mod commit;
mod error;
mod pipeline;
mod process;

pub use commit::CommitGuard;
pub use error::{PipelineError, PipelineErrorKind};
pub use pipeline::{FileTask, PipelineOptions, ProcessFile, TreeSummary, run_tree};
pub use process::{Processor, Transform, is_stdout_sentinel};
