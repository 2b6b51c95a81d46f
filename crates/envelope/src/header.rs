//! Envelope header encoding and decoding.
//!
//! The serialized header doubles as the associated data for every frame, so
//! both sides keep the exact bytes around after parsing.

use std::io::Read;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::error::EnvelopeError;
use crate::keyring::{EnvelopeKey, KeyId, Keyring};

/// Magic bytes identifying a version-1 envelope.
pub(crate) const MAGIC: [u8; 8] = *b"SEALDIR\x01";

/// Header flag: a signature frame trails the data frames.
pub(crate) const FLAG_SIGNED: u8 = 0b0000_0001;

/// Plaintext bytes carried per data frame.
pub(crate) const CHUNK_SIZE: usize = 64 * 1024;

/// Poly1305 tag length appended to every ciphertext.
pub(crate) const TAG_LEN: usize = 16;

/// HKDF salt length.
pub(crate) const SALT_LEN: usize = 16;

const WRAP_NONCE_LEN: usize = 12;
const WRAPPED_KEY_LEN: usize = 32 + TAG_LEN;
const RECIPIENT_ENTRY_LEN: usize = KeyId::LEN + WRAP_NONCE_LEN + WRAPPED_KEY_LEN;

/// Frame kind markers. The kind participates in the frame nonce, so flipping
/// the wire byte breaks authentication.
pub(crate) mod frame_kind {
    pub(crate) const DATA: u8 = 0;
    pub(crate) const FINAL: u8 = 1;
    pub(crate) const SIGNATURE: u8 = 2;
}

/// Builds the serialized header for the given recipients, wrapping the
/// session key once per recipient.
pub(crate) fn encode(
    recipients: &[EnvelopeKey],
    session_key: &[u8; 32],
    salt: &[u8; SALT_LEN],
    wrap_nonces: &[[u8; WRAP_NONCE_LEN]],
    signed: bool,
) -> Result<Vec<u8>, EnvelopeError> {
    if recipients.is_empty() {
        return Err(EnvelopeError::NoRecipients);
    }
    if recipients.len() > u8::MAX as usize {
        return Err(EnvelopeError::TooManyRecipients);
    }
    debug_assert_eq!(recipients.len(), wrap_nonces.len());

    let mut header = Vec::with_capacity(
        MAGIC.len() + 2 + recipients.len() * RECIPIENT_ENTRY_LEN + SALT_LEN,
    );
    header.extend_from_slice(&MAGIC);
    header.push(if signed { FLAG_SIGNED } else { 0 });
    header.push(recipients.len() as u8);

    for (recipient, nonce) in recipients.iter().zip(wrap_nonces) {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(recipient.as_bytes()));
        let wrapped = cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: session_key,
                    aad: &MAGIC,
                },
            )
            .map_err(|_| EnvelopeError::MalformedHeader("session key wrap failed"))?;
        debug_assert_eq!(wrapped.len(), WRAPPED_KEY_LEN);

        header.extend_from_slice(recipient.id().as_bytes());
        header.extend_from_slice(nonce);
        header.extend_from_slice(&wrapped);
    }

    header.extend_from_slice(salt);
    Ok(header)
}

/// Result of parsing an envelope header against a keyring.
pub(crate) struct ParsedHeader {
    /// The exact header bytes, reused as frame associated data.
    pub(crate) bytes: Vec<u8>,
    /// The unwrapped session key.
    pub(crate) session_key: [u8; 32],
    /// HKDF salt.
    pub(crate) salt: [u8; SALT_LEN],
    /// Whether a signature frame trails the data.
    pub(crate) signed: bool,
}

/// Reads and parses a header from `reader`, unwrapping the session key with
/// the first keyring key the envelope is addressed to.
pub(crate) fn decode<R: Read>(
    reader: &mut R,
    keyring: &Keyring,
) -> Result<ParsedHeader, EnvelopeError> {
    let mut fixed = [0u8; MAGIC.len() + 2];
    read_exact(reader, &mut fixed)?;
    if fixed[..MAGIC.len()] != MAGIC {
        return Err(EnvelopeError::MalformedHeader("bad magic"));
    }
    let flags = fixed[MAGIC.len()];
    if flags & !FLAG_SIGNED != 0 {
        return Err(EnvelopeError::MalformedHeader("unknown flags"));
    }
    let count = fixed[MAGIC.len() + 1] as usize;
    if count == 0 {
        return Err(EnvelopeError::MalformedHeader("no recipients"));
    }

    let mut entries = vec![0u8; count * RECIPIENT_ENTRY_LEN];
    read_exact(reader, &mut entries)?;
    let mut salt = [0u8; SALT_LEN];
    read_exact(reader, &mut salt)?;

    let mut bytes = Vec::with_capacity(fixed.len() + entries.len() + salt.len());
    bytes.extend_from_slice(&fixed);
    bytes.extend_from_slice(&entries);
    bytes.extend_from_slice(&salt);

    let mut matched = None;
    for entry in entries.chunks_exact(RECIPIENT_ENTRY_LEN) {
        let id = KeyId::from_slice(&entry[..KeyId::LEN]);
        let Some(key) = keyring.find(&id) else {
            continue;
        };
        matched = Some(id);

        let nonce = &entry[KeyId::LEN..KeyId::LEN + WRAP_NONCE_LEN];
        let wrapped = &entry[KeyId::LEN + WRAP_NONCE_LEN..];
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let Ok(session) = cipher.decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: wrapped,
                aad: &MAGIC,
            },
        ) else {
            continue;
        };

        let mut session_key = [0u8; 32];
        session_key.copy_from_slice(&session);
        return Ok(ParsedHeader {
            bytes,
            session_key,
            salt,
            signed: flags & FLAG_SIGNED != 0,
        });
    }

    match matched {
        Some(id) => Err(EnvelopeError::SessionKeyUnwrap { id }),
        None => Err(EnvelopeError::NoMatchingKey),
    }
}

/// Derives the frame key from the unwrapped session key and the header salt.
pub(crate) fn derive_frame_key(session_key: &[u8; 32], salt: &[u8; SALT_LEN]) -> [u8; 32] {
    let hk = hkdf::Hkdf::<sha2::Sha256>::new(Some(salt), session_key);
    let mut okm = [0u8; 32];
    // Expanding 32 bytes from SHA-256 output cannot fail.
    let _ = hk.expand(b"sealdir.v1 frame", &mut okm);
    okm
}

/// Builds the 12-byte frame nonce for a frame kind and counter.
pub(crate) fn frame_nonce(kind: u8, counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[0] = kind;
    nonce[1..9].copy_from_slice(&counter.to_le_bytes());
    nonce
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), EnvelopeError> {
    reader.read_exact(buf).map_err(|error| {
        if error.kind() == std::io::ErrorKind::UnexpectedEof {
            EnvelopeError::MalformedHeader("header ends prematurely")
        } else {
            EnvelopeError::Io(error)
        }
    })
}
