//! Single-file processing: source → message transform → atomic commit.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};

use envelope::{EnvelopeError, EnvelopeKey, Keyring, Opener, Sealer};
use tracing::debug;

use crate::commit::{self, CommitGuard};
use crate::error::PipelineError;

/// Destination sentinel selecting standard output instead of a file.
pub const STDOUT_SENTINEL: &str = "-";

/// Direction and key material for the message transform.
///
/// The pipeline never looks inside the transform's output; this handle is the
/// only place key material enters the engine.
pub enum Transform {
    /// Seal plaintext into envelopes addressed to `recipients`, optionally
    /// signed with `signer`.
    Encrypt {
        /// Keys the output is addressed to. Must not be empty.
        recipients: Vec<EnvelopeKey>,
        /// Optional signing key.
        signer: Option<EnvelopeKey>,
    },
    /// Open envelopes with any matching key in `keyring`.
    Decrypt {
        /// Keys available for opening.
        keyring: Keyring,
    },
}

/// Processes one file through the transform with atomic-commit semantics.
pub struct Processor {
    transform: Transform,
}

impl Processor {
    /// Creates a processor for the given transform.
    #[must_use]
    pub fn new(transform: Transform) -> Self {
        Self { transform }
    }

    /// Transforms `source` into `destination`.
    ///
    /// The destination receives the source's permission bits and becomes
    /// visible only once fully written. A destination of [`STDOUT_SENTINEL`]
    /// (or `/dev/stdout`) bypasses staging and writes directly to standard
    /// output.
    pub fn process(&self, source: &Path, destination: &Path) -> Result<(), PipelineError> {
        if !is_stdout_sentinel(destination) && same_path(source, destination) {
            return Err(PipelineError::same_file(source.to_path_buf()));
        }

        let file = File::open(source)
            .map_err(|error| PipelineError::io("open source file", source.to_path_buf(), error))?;
        let metadata = file.metadata().map_err(|error| {
            PipelineError::io("inspect source file", source.to_path_buf(), error)
        })?;
        let mut reader = BufReader::with_capacity(commit::WRITE_BUFFER_SIZE, file);

        if is_stdout_sentinel(destination) {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            self.stream(&mut reader, &mut handle, source)?;
            handle
                .flush()
                .map_err(|error| PipelineError::io("flush standard output", source.to_path_buf(), error))?;
            debug!(source = %source.display(), "wrote transform output to stdout");
            return Ok(());
        }

        let (guard, staged) = CommitGuard::new(destination, metadata.permissions())?;
        let mut writer = commit::buffered(staged);
        self.stream(&mut reader, &mut writer, source)?;
        guard.commit(writer)?;
        debug!(
            source = %source.display(),
            destination = %destination.display(),
            "committed file"
        );
        Ok(())
    }

    /// Drives the transform from `reader` into `writer`.
    fn stream<R: Read, W: Write>(
        &self,
        reader: &mut R,
        writer: &mut W,
        source: &Path,
    ) -> Result<(), PipelineError> {
        match &self.transform {
            Transform::Encrypt { recipients, signer } => {
                let mut sealer = Sealer::new(&mut *writer, recipients, signer.as_ref())
                    .map_err(|error| classify(source, error.into_io()))?;
                io::copy(reader, &mut sealer).map_err(|error| classify(source, error))?;
                sealer
                    .finish()
                    .map_err(|error| classify(source, error.into_io()))?;
            }
            Transform::Decrypt { keyring } => {
                let mut opener = Opener::new(&mut *reader, keyring)
                    .map_err(|error| classify(source, error.into_io()))?;
                io::copy(&mut opener, writer).map_err(|error| classify(source, error))?;
            }
        }
        Ok(())
    }
}

/// Reports whether `path` denotes the standard-output sentinel.
#[must_use]
pub fn is_stdout_sentinel(path: &Path) -> bool {
    path.as_os_str() == STDOUT_SENTINEL || path.as_os_str() == "/dev/stdout"
}

/// Splits a streaming failure into transform and filesystem errors.
fn classify(source: &Path, error: io::Error) -> PipelineError {
    match EnvelopeError::try_from_io(error) {
        Ok(envelope_error) => PipelineError::envelope(source.to_path_buf(), envelope_error),
        Err(io_error) => PipelineError::io("stream file contents", source.to_path_buf(), io_error),
    }
}

/// Compares two paths after resolving them against the working directory and
/// folding `.` and `..` segments.
///
/// Lexical comparison only: aliases through links are out of scope, matching
/// the pipeline's input-error contract of rejecting the obviously identical.
pub(crate) fn same_path(a: &Path, b: &Path) -> bool {
    normalize(a) == normalize(b)
}

pub(crate) fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut folded = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            // Popping at the root is a no-op, like the filesystem's own "/..".
            Component::ParentDir => {
                folded.pop();
            }
            other => folded.push(other.as_os_str()),
        }
    }
    folded
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;

    fn key_and_ring() -> (EnvelopeKey, Keyring) {
        let key = EnvelopeKey::generate();
        let keyring = Keyring::from_keys(vec![key.clone()]);
        (key, keyring)
    }

    fn encryptor(key: &EnvelopeKey) -> Processor {
        Processor::new(Transform::Encrypt {
            recipients: vec![key.clone()],
            signer: None,
        })
    }

    fn decryptor(keyring: Keyring) -> Processor {
        Processor::new(Transform::Decrypt { keyring })
    }

    #[test]
    fn encrypt_then_decrypt_round_trips_a_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plain = temp.path().join("plain.txt");
        let sealed = temp.path().join("sealed.env");
        let restored = temp.path().join("restored.txt");
        fs::write(&plain, b"the quick brown fox").expect("write");

        let (key, keyring) = key_and_ring();
        encryptor(&key).process(&plain, &sealed).expect("encrypt");
        assert_ne!(fs::read(&sealed).expect("read"), b"the quick brown fox");

        decryptor(keyring).process(&sealed, &restored).expect("decrypt");
        assert_eq!(fs::read(&restored).expect("read"), b"the quick brown fox");
    }

    #[test]
    fn rejects_identical_source_and_destination() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("file.txt");
        fs::write(&path, b"data").expect("write");

        let (key, _) = key_and_ring();
        let error = encryptor(&key).process(&path, &path).expect_err("same path");
        assert!(matches!(
            error.kind(),
            crate::PipelineErrorKind::SameFile { .. }
        ));
        // Rejected before any I/O: the file is untouched.
        assert_eq!(fs::read(&path).expect("read"), b"data");
    }

    #[test]
    fn rejects_destination_aliasing_source_through_parent_dirs() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir(temp.path().join("sub")).expect("mkdir");
        let plain = temp.path().join("plain.txt");
        fs::write(&plain, b"plaintext").expect("write");
        let aliased = temp.path().join("sub").join("..").join("plain.txt");

        let (key, _) = key_and_ring();
        let error = encryptor(&key)
            .process(&plain, &aliased)
            .expect_err("aliased destination");
        assert!(matches!(
            error.kind(),
            crate::PipelineErrorKind::SameFile { .. }
        ));
        assert_eq!(fs::read(&plain).expect("read"), b"plaintext");
    }

    #[test]
    fn missing_source_is_an_open_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (key, _) = key_and_ring();
        let error = encryptor(&key)
            .process(&temp.path().join("absent.txt"), &temp.path().join("out.env"))
            .expect_err("missing source");
        assert!(matches!(error.kind(), crate::PipelineErrorKind::Io { .. }));
    }

    #[test]
    fn wrong_keyring_leaves_no_destination() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plain = temp.path().join("plain.txt");
        let sealed = temp.path().join("sealed.env");
        let restored = temp.path().join("restored.txt");
        fs::write(&plain, b"data").expect("write");

        let (key, _) = key_and_ring();
        encryptor(&key).process(&plain, &sealed).expect("encrypt");

        let stranger = Keyring::from_keys(vec![EnvelopeKey::generate()]);
        let error = decryptor(stranger)
            .process(&sealed, &restored)
            .expect_err("wrong keyring");
        assert!(matches!(
            error.kind(),
            crate::PipelineErrorKind::Envelope { .. }
        ));
        assert!(!restored.exists());
        // No staging leftovers either.
        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .expect("read_dir")
            .map(|entry| entry.expect("entry").file_name())
            .filter(|name| name.to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "staging leftovers: {leftovers:?}");
    }

    #[test]
    fn corrupt_envelope_leaves_no_destination() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plain = temp.path().join("plain.txt");
        let sealed = temp.path().join("sealed.env");
        let restored = temp.path().join("restored.txt");
        fs::write(&plain, vec![3u8; 100_000]).expect("write");

        let (key, keyring) = key_and_ring();
        encryptor(&key).process(&plain, &sealed).expect("encrypt");

        let mut bytes = fs::read(&sealed).expect("read");
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        fs::write(&sealed, bytes).expect("rewrite");

        let error = decryptor(keyring)
            .process(&sealed, &restored)
            .expect_err("corrupt envelope");
        assert!(matches!(
            error.kind(),
            crate::PipelineErrorKind::Envelope { .. }
        ));
        assert!(!restored.exists());
    }

    #[cfg(unix)]
    #[test]
    fn preserves_source_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let plain = temp.path().join("plain.txt");
        let sealed = temp.path().join("sealed.env");
        fs::write(&plain, b"data").expect("write");
        fs::set_permissions(&plain, fs::Permissions::from_mode(0o640)).expect("chmod");

        let (key, _) = key_and_ring();
        encryptor(&key).process(&plain, &sealed).expect("encrypt");

        let mode = fs::metadata(&sealed).expect("metadata").permissions().mode() & 0o7777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn stdout_sentinel_detection() {
        assert!(is_stdout_sentinel(Path::new("-")));
        assert!(is_stdout_sentinel(Path::new("/dev/stdout")));
        assert!(!is_stdout_sentinel(Path::new("out.env")));
    }

    #[test]
    fn signed_envelopes_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plain = temp.path().join("plain.txt");
        let sealed = temp.path().join("sealed.env");
        fs::write(&plain, b"signed data").expect("write");

        let (key, keyring) = key_and_ring();
        let signer = EnvelopeKey::generate();
        Processor::new(Transform::Encrypt {
            recipients: vec![key],
            signer: Some(signer.clone()),
        })
        .process(&plain, &sealed)
        .expect("encrypt");

        let sealed_bytes = fs::read(&sealed).expect("read");
        let mut opener = Opener::new(Cursor::new(&sealed_bytes), &keyring)
            .expect("open")
            .verifying(&signer);
        let mut plaintext = Vec::new();
        opener.read_to_end(&mut plaintext).expect("read");
        assert_eq!(plaintext, b"signed data");
        opener.verify().expect("verify");
    }
}
