#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `cli` implements the thin command-line front-end for the `sealdir`
//! workspace. It recognises three subcommands (`encrypt`, `decrypt`, and
//! `keygen`), loads key material from armored key files, and delegates the
//! actual work to [`engine`]: single files go through
//! [`engine::Processor::process`], directory trees through
//! [`engine::run_tree`].
//!
//! # Design
//!
//! The crate exposes [`run`] as the primary entry point. The function accepts
//! an iterator of arguments together with handles for standard output and
//! error, so the whole surface can be exercised in-process by tests. A
//! [`clap`](https://docs.rs/clap/) command definition performs the parse;
//! diagnostics and exit codes are centralised in [`ExitCode`].
//!
//! # Invariants
//!
//! - `run` never panics; all failures surface as non-zero exit codes with a
//!   diagnostic on standard error.
//! - Key material never appears in diagnostics or logs; errors name key files
//!   by path and keys by their short hex id only.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Once;

use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use engine::{PipelineError, PipelineOptions, Processor, Transform, is_stdout_sentinel, run_tree};
use envelope::{EnvelopeError, EnvelopeKey, Keyring};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod exit_code;

pub use exit_code::ExitCode;

/// Maximum exit code representable by a Unix process.
const MAX_EXIT_CODE: i32 = u8::MAX as i32;

/// Runs the CLI using the provided argument iterator and output handles.
///
/// Returns the process exit code the caller should report. On success `0` is
/// returned; failures are written to `stderr` and mapped through
/// [`ExitCode`].
pub fn run<I, S, Out, Err>(arguments: I, stdout: &mut Out, stderr: &mut Err) -> i32
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
    Out: Write,
    Err: Write,
{
    let args: Vec<OsString> = arguments.into_iter().map(Into::into).collect();
    let matches = match command().try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(error) => {
            return match error.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    let _ = write!(stdout, "{}", error.render());
                    ExitCode::Ok.as_i32()
                }
                _ => {
                    let _ = write!(stderr, "{}", error.render());
                    ExitCode::Syntax.as_i32()
                }
            };
        }
    };

    init_tracing(matches.get_count("verbose"));

    let code = match matches.subcommand() {
        Some(("encrypt", sub)) => run_encrypt(sub, stderr),
        Some(("decrypt", sub)) => run_decrypt(sub, stderr),
        Some(("keygen", sub)) => run_keygen(sub, stdout, stderr),
        _ => unreachable!("subcommand is required"),
    };
    code.as_i32().min(MAX_EXIT_CODE)
}

/// Converts the `i32` status produced by [`run`] into a [`std::process::ExitCode`].
#[must_use]
pub fn exit_code_from(status: i32) -> std::process::ExitCode {
    let clamped = status.clamp(0, MAX_EXIT_CODE);
    // Clamp keeps the cast in range.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    std::process::ExitCode::from(clamped as u8)
}

fn command() -> Command {
    let mode_args = [
        Arg::new("recursive")
            .long("recursive")
            .short('R')
            .action(ArgAction::SetTrue)
            .help("Process every regular file under SRC into the mirrored path under DST"),
        Arg::new("remove-source")
            .long("remove-source")
            .action(ArgAction::SetTrue)
            .help("Delete each source file after its output has been committed (requires --recursive)"),
        Arg::new("workers")
            .long("workers")
            .value_name("N")
            .value_parser(value_parser!(u32).range(1..))
            .help("Number of files processed in parallel (requires --recursive)"),
        Arg::new("source")
            .value_name("SRC")
            .required(true)
            .value_parser(value_parser!(PathBuf))
            .help("Source file, or source tree with --recursive"),
        Arg::new("destination")
            .value_name("DST")
            .required(true)
            .value_parser(value_parser!(PathBuf))
            .help("Destination file or tree; '-' writes a single file to standard output"),
    ];

    Command::new("sealdir")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Encrypts and decrypts files and directory trees with authenticated envelopes")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .global(true)
                .help("Increase log verbosity (repeatable)"),
        )
        .subcommand(
            Command::new("encrypt")
                .about("Seal plaintext into envelopes")
                .arg(
                    Arg::new("recipient")
                        .long("recipient")
                        .short('r')
                        .value_name("KEYFILE")
                        .action(ArgAction::Append)
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Armored key file the output is addressed to (repeatable)"),
                )
                .arg(
                    Arg::new("sign")
                        .long("sign")
                        .value_name("KEYFILE")
                        .value_parser(value_parser!(PathBuf))
                        .help("Sign the payload with the first key in KEYFILE"),
                )
                .args(mode_args.clone()),
        )
        .subcommand(
            Command::new("decrypt")
                .about("Open envelopes back into plaintext")
                .arg(
                    Arg::new("keyring")
                        .long("keyring")
                        .short('k')
                        .value_name("KEYFILE")
                        .action(ArgAction::Append)
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Armored key file tried against each envelope (repeatable)"),
                )
                .args(mode_args),
        )
        .subcommand(
            Command::new("keygen")
                .about("Generate a new armored key")
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .value_name("FILE")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the key to FILE (mode 0600) instead of standard output"),
                ),
        )
}

fn init_tracing(verbosity: u8) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let directive = match verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

fn run_encrypt<Err: Write>(matches: &ArgMatches, stderr: &mut Err) -> ExitCode {
    let recipients = match load_keys(matches.get_many::<PathBuf>("recipient"), stderr) {
        Ok(keys) => keys,
        Err(code) => return code,
    };
    let signer = match matches.get_one::<PathBuf>("sign") {
        Some(path) => match load_signing_key(path, stderr) {
            Ok(key) => Some(key),
            Err(code) => return code,
        },
        None => None,
    };
    execute_transform(matches, Transform::Encrypt { recipients, signer }, stderr)
}

fn run_decrypt<Err: Write>(matches: &ArgMatches, stderr: &mut Err) -> ExitCode {
    let keys = match load_keys(matches.get_many::<PathBuf>("keyring"), stderr) {
        Ok(keys) => keys,
        Err(code) => return code,
    };
    execute_transform(
        matches,
        Transform::Decrypt {
            keyring: Keyring::from_keys(keys),
        },
        stderr,
    )
}

fn run_keygen<Out: Write, Err: Write>(
    matches: &ArgMatches,
    stdout: &mut Out,
    stderr: &mut Err,
) -> ExitCode {
    let key = EnvelopeKey::generate();
    let armored = key.armor();
    match matches.get_one::<PathBuf>("output") {
        Some(path) => {
            if let Err(error) = write_key_file(path, &armored) {
                let _ = writeln!(
                    stderr,
                    "sealdir: failed to write key file '{}': {error}",
                    path.display()
                );
                return ExitCode::FileIo;
            }
            info!(path = %path.display(), id = %key.id(), "generated key");
        }
        None => {
            if let Err(error) = stdout.write_all(armored.as_bytes()) {
                let _ = writeln!(stderr, "sealdir: failed to write key: {error}");
                return ExitCode::FileIo;
            }
        }
    }
    ExitCode::Ok
}

/// Writes a fresh key file, refusing to overwrite an existing one.
fn write_key_file(path: &Path, armored: &str) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(armored.as_bytes())?;
    file.sync_all()
}

fn execute_transform<Err: Write>(
    matches: &ArgMatches,
    transform: Transform,
    stderr: &mut Err,
) -> ExitCode {
    let (Some(source), Some(destination)) = (
        matches.get_one::<PathBuf>("source"),
        matches.get_one::<PathBuf>("destination"),
    ) else {
        let _ = writeln!(stderr, "sealdir: missing SRC or DST operand");
        return ExitCode::Syntax;
    };
    let recursive = matches.get_flag("recursive");
    let remove_source = matches.get_flag("remove-source");

    if remove_source && !recursive {
        let _ = writeln!(stderr, "sealdir: --remove-source requires --recursive");
        return ExitCode::Syntax;
    }
    if matches.contains_id("workers") && !recursive {
        let _ = writeln!(stderr, "sealdir: --workers requires --recursive");
        return ExitCode::Syntax;
    }
    if recursive && is_stdout_sentinel(destination) {
        let _ = writeln!(
            stderr,
            "sealdir: standard output cannot receive a recursive run"
        );
        return ExitCode::Syntax;
    }

    let processor = Processor::new(transform);
    let result: Result<(), PipelineError> = if recursive {
        let mut options = PipelineOptions::default();
        if let Some(workers) = matches.get_one::<u32>("workers") {
            options.workers = *workers as usize;
        }
        options.remove_source = remove_source;
        run_tree(source, destination, &processor, &options).map(|summary| {
            info!(files = summary.files, "tree complete");
        })
    } else {
        processor.process(source, destination)
    };

    match result {
        Ok(()) => ExitCode::Ok,
        Err(error) => {
            let _ = writeln!(stderr, "sealdir: {error}");
            ExitCode::from_pipeline_error(&error)
        }
    }
}

/// Loads and merges every key from the given key files.
fn load_keys<'a, Err: Write>(
    paths: Option<clap::parser::ValuesRef<'a, PathBuf>>,
    stderr: &mut Err,
) -> Result<Vec<EnvelopeKey>, ExitCode> {
    let mut keys = Vec::new();
    for path in paths.into_iter().flatten() {
        let keyring = Keyring::load(path).map_err(|error| key_load_failure(&error, stderr))?;
        keys.extend(keyring.keys().iter().cloned());
    }
    Ok(keys)
}

fn load_signing_key<Err: Write>(path: &Path, stderr: &mut Err) -> Result<EnvelopeKey, ExitCode> {
    let keyring = Keyring::load(path).map_err(|error| key_load_failure(&error, stderr))?;
    keyring
        .keys()
        .first()
        .cloned()
        .ok_or_else(|| key_load_failure(&EnvelopeError::NoMatchingKey, stderr))
}

fn key_load_failure<Err: Write>(error: &EnvelopeError, stderr: &mut Err) -> ExitCode {
    let _ = writeln!(stderr, "sealdir: {error}");
    ExitCode::Input
}
