use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::keyring::KeyId;

/// Failure raised while sealing or opening an envelope, or while loading key
/// material.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnvelopeError {
    /// The underlying reader or writer failed.
    #[error("envelope stream I/O failed: {0}")]
    Io(#[from] io::Error),

    /// The envelope header could not be parsed.
    #[error("malformed envelope header: {0}")]
    MalformedHeader(&'static str),

    /// None of the keys the envelope is addressed to are present in the
    /// supplied keyring.
    #[error("envelope is not addressed to any key in the keyring")]
    NoMatchingKey,

    /// Unwrapping the session key failed even though the key id matched.
    #[error("session key unwrap failed for key id {id}")]
    SessionKeyUnwrap {
        /// Identifier of the keyring key whose unwrap attempt failed.
        id: KeyId,
    },

    /// The stream ended before the final data frame.
    #[error("envelope truncated before the final frame")]
    Truncated,

    /// A frame failed authentication, indicating corruption or tampering.
    #[error("envelope frame {index} failed authentication")]
    FrameAuthentication {
        /// Zero-based index of the frame that failed.
        index: u64,
    },

    /// A frame declared a length outside the format's bounds.
    #[error("envelope frame {index} declares an invalid length of {length} bytes")]
    FrameLength {
        /// Zero-based index of the offending frame.
        index: u64,
        /// Declared ciphertext length.
        length: u32,
    },

    /// A key file could not be read.
    #[error("failed to read key file '{}': {source}", path.display())]
    KeyringRead {
        /// Path of the key file.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// A key file did not contain validly armored key material.
    #[error("malformed key armor in '{}': {reason}", path.display())]
    MalformedArmor {
        /// Path of the key file.
        path: PathBuf,
        /// What was wrong with the armor.
        reason: &'static str,
    },

    /// Sealing requires at least one recipient.
    #[error("cannot seal an envelope without recipients")]
    NoRecipients,

    /// Sealing supports at most 255 recipients.
    #[error("cannot seal an envelope for more than 255 recipients")]
    TooManyRecipients,

    /// Signature verification was requested but the envelope carries none.
    #[error("envelope is not signed")]
    Unsigned,

    /// The envelope's signature does not match the plaintext.
    #[error("envelope signature verification failed")]
    SignatureMismatch,
}

impl EnvelopeError {
    /// Wraps the error into an [`io::Error`] for use inside [`std::io::Read`]
    /// and [`std::io::Write`] implementations.
    #[must_use]
    pub fn into_io(self) -> io::Error {
        match self {
            Self::Io(error) => error,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }

    /// Recovers an [`EnvelopeError`] previously wrapped with
    /// [`EnvelopeError::into_io`], handing back the original [`io::Error`]
    /// when the value carries a different payload.
    pub fn try_from_io(error: io::Error) -> Result<Self, io::Error> {
        if error
            .get_ref()
            .is_some_and(|inner| inner.is::<Self>())
        {
            match error.into_inner() {
                Some(inner) => match inner.downcast::<Self>() {
                    Ok(envelope) => Ok(*envelope),
                    Err(other) => Err(io::Error::new(io::ErrorKind::InvalidData, other)),
                },
                None => Err(io::Error::from(io::ErrorKind::InvalidData)),
            }
        } else {
            Err(error)
        }
    }
}
