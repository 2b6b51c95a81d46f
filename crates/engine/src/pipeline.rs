//! Tree traversal fanned out over a fixed worker pool.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, warn};
use walk::Walker;

use crate::error::PipelineError;
use crate::process::{self, Processor};

/// One file scheduled for processing.
#[derive(Debug, Clone)]
pub struct FileTask {
    /// Absolute path of the source file.
    pub path: PathBuf,
    /// Path of the file relative to the tree root.
    pub relative: PathBuf,
}

/// Tuning knobs for [`run_tree`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Number of worker threads. At most this many files are in flight.
    pub workers: usize,
    /// Delete each source file after its destination has been committed.
    pub remove_source: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, std::num::NonZero::get),
            remove_source: false,
        }
    }
}

/// Totals reported by a completed [`run_tree`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeSummary {
    /// Number of files committed to the destination tree.
    pub files: u64,
}

/// The per-file operation [`run_tree`] fans out.
///
/// [`Processor`] is the production implementation; the trait exists so tree
/// orchestration can be exercised with instrumented stand-ins.
pub trait ProcessFile: Sync {
    /// Transforms `source` into `destination`.
    fn process_file(&self, source: &Path, destination: &Path) -> Result<(), PipelineError>;
}

impl ProcessFile for Processor {
    fn process_file(&self, source: &Path, destination: &Path) -> Result<(), PipelineError> {
        self.process(source, destination)
    }
}

/// Shared first-error-wins cancellation state.
///
/// The flag and the error slot are written together by whichever participant
/// fails first; later failures are dropped.
struct CancelToken {
    cancelled: AtomicBool,
    first_error: OnceLock<PipelineError>,
}

impl CancelToken {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            first_error: OnceLock::new(),
        }
    }

    fn fail(&self, error: PipelineError) {
        // Losing the race means another error already won; this one is noise.
        let _ = self.first_error.set(error);
        self.cancelled.store(true, Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn into_first_error(self) -> Option<PipelineError> {
        self.first_error.into_inner()
    }
}

/// Processes every regular file under `source_root` into the mirrored path
/// under `destination_root`.
///
/// Files are discovered in deterministic per-directory order and handed to
/// `options.workers` threads over a rendezvous channel, so at most that many
/// files are in flight at once. The first failure from the walker or any
/// worker cancels the run; `run_tree` returns only after every worker has
/// drained, and surfaces exactly that first error.
///
/// Non-file entries (directories, symlinks, devices) are skipped. Missing
/// intermediate directories under `destination_root` are created as files
/// land in them.
pub fn run_tree<P: ProcessFile>(
    source_root: &Path,
    destination_root: &Path,
    processor: &P,
    options: &PipelineOptions,
) -> Result<TreeSummary, PipelineError> {
    if process::same_path(source_root, destination_root) {
        return Err(PipelineError::same_file(source_root.to_path_buf()));
    }
    fs::create_dir_all(destination_root).map_err(|error| {
        PipelineError::io(
            "create destination directory",
            destination_root.to_path_buf(),
            error,
        )
    })?;

    let workers = options.workers.max(1);
    let token = CancelToken::new();
    let committed = AtomicU64::new(0);
    // Rendezvous channel: a zero-capacity queue keeps discovery in lockstep
    // with processing and makes disconnection an immediate wakeup.
    let (sender, receiver) = bounded::<FileTask>(0);

    thread::scope(|scope| {
        for _ in 0..workers {
            let receiver = receiver.clone();
            scope.spawn(|| {
                worker_loop(
                    receiver,
                    destination_root,
                    processor,
                    options.remove_source,
                    &token,
                    &committed,
                );
            });
        }
        drop(receiver);

        produce_tasks(source_root, sender, &token);
    });

    let files = committed.load(Ordering::Acquire);
    match token.into_first_error() {
        Some(error) => Err(error),
        None => {
            debug!(files, source = %source_root.display(), "tree complete");
            Ok(TreeSummary { files })
        }
    }
}

/// Walks the tree and feeds file tasks into the channel.
///
/// Dropping `sender` on return (or error) disconnects the channel, which is
/// what lets blocked workers finish.
fn produce_tasks(source_root: &Path, sender: Sender<FileTask>, token: &CancelToken) {
    let walker = match Walker::new(source_root) {
        Ok(walker) => walker,
        Err(error) => {
            token.fail(PipelineError::walk(error));
            return;
        }
    };
    for entry in walker {
        if token.is_cancelled() {
            return;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                token.fail(PipelineError::walk(error));
                return;
            }
        };
        if !entry.metadata().is_file() {
            continue;
        }
        let (path, relative) = entry.into_paths();
        // A send error means every worker is gone, which only happens on
        // cancellation.
        if sender.send(FileTask { path, relative }).is_err() {
            return;
        }
    }
}

fn worker_loop<P: ProcessFile>(
    receiver: Receiver<FileTask>,
    destination_root: &Path,
    processor: &P,
    remove_source: bool,
    token: &CancelToken,
    committed: &AtomicU64,
) {
    while let Ok(task) = receiver.recv() {
        if token.is_cancelled() {
            return;
        }
        let destination = destination_root.join(&task.relative);
        if let Err(error) = processor.process_file(&task.path, &destination) {
            token.fail(error);
            return;
        }
        committed.fetch_add(1, Ordering::AcqRel);
        if remove_source {
            // Source cleanup is best effort; the destination is already
            // committed, so a straggler source does not fail the run.
            if let Err(error) = fs::remove_file(&task.path) {
                warn!(
                    path = %task.path.display(),
                    %error,
                    "failed to remove source file"
                );
            }
        }
    }
}
