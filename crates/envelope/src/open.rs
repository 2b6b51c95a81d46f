//! Streaming envelope reader.

use std::fmt;
use std::io::{self, Read};

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use zeroize::Zeroize;

use crate::error::EnvelopeError;
use crate::header::{self, CHUNK_SIZE, TAG_LEN, frame_kind, frame_nonce};
use crate::keyring::{EnvelopeKey, Keyring};

/// Opens an envelope, yielding the plaintext lazily through [`Read`].
///
/// Construction parses the header and unwraps the session key; the data
/// frames are decrypted one at a time as the caller consumes bytes. The
/// plaintext is handed out without signature verification, mirroring the
/// conventional unverified-body contract of streamed decryption; callers that
/// care can drain the stream and then call [`Opener::verify`].
pub struct Opener<R: Read> {
    reader: R,
    cipher: ChaCha20Poly1305,
    header: Vec<u8>,
    signed: bool,
    buf: Vec<u8>,
    pos: usize,
    counter: u64,
    done: bool,
    signature: Option<[u8; 32]>,
    verifier: Option<blake3::Hasher>,
}

impl<R: Read> Opener<R> {
    /// Parses the envelope header from `reader` and unwraps the session key
    /// with the first matching key in `keyring`.
    pub fn new(mut reader: R, keyring: &Keyring) -> Result<Self, EnvelopeError> {
        let parsed = header::decode(&mut reader, keyring)?;
        let mut frame_key = header::derive_frame_key(&parsed.session_key, &parsed.salt);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&frame_key));
        frame_key.zeroize();

        Ok(Self {
            reader,
            cipher,
            header: parsed.bytes,
            signed: parsed.signed,
            buf: Vec::new(),
            pos: 0,
            counter: 0,
            done: false,
            signature: None,
            verifier: None,
        })
    }

    /// Enables signature verification against `key`.
    ///
    /// Must be applied before any plaintext is consumed; the verifier hashes
    /// the plaintext as it streams past.
    #[must_use]
    pub fn verifying(mut self, key: &EnvelopeKey) -> Self {
        debug_assert_eq!(self.counter, 0, "verifying() after reading started");
        self.verifier = Some(blake3::Hasher::new_keyed(key.as_bytes()));
        self
    }

    /// Whether the envelope declares a trailing signature frame.
    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Checks the envelope's signature after the stream has been drained.
    ///
    /// Fails with [`EnvelopeError::Unsigned`] when the envelope carries no
    /// signature, [`EnvelopeError::Truncated`] when the stream has not been
    /// fully consumed, and [`EnvelopeError::SignatureMismatch`] when the MAC
    /// does not match. Requires [`Opener::verifying`].
    pub fn verify(&self) -> Result<(), EnvelopeError> {
        if !self.done {
            return Err(EnvelopeError::Truncated);
        }
        let (Some(verifier), Some(signature)) = (self.verifier.as_ref(), self.signature.as_ref())
        else {
            return Err(EnvelopeError::Unsigned);
        };
        let computed = verifier.finalize();
        // blake3::Hash comparison is constant-time.
        if computed == blake3::Hash::from_bytes(*signature) {
            Ok(())
        } else {
            Err(EnvelopeError::SignatureMismatch)
        }
    }

    fn next_frame(&mut self) -> Result<(), EnvelopeError> {
        let (kind, plaintext) = self.read_frame()?;
        match kind {
            frame_kind::DATA | frame_kind::FINAL => {
                if let Some(verifier) = self.verifier.as_mut() {
                    verifier.update(&plaintext);
                }
                self.buf = plaintext;
                self.pos = 0;
                if kind == frame_kind::FINAL {
                    if self.signed {
                        self.read_signature_frame()?;
                    }
                    self.done = true;
                }
                Ok(())
            }
            _ => Err(EnvelopeError::MalformedHeader("unexpected frame kind")),
        }
    }

    fn read_signature_frame(&mut self) -> Result<(), EnvelopeError> {
        let (kind, plaintext) = self.read_frame()?;
        if kind != frame_kind::SIGNATURE || plaintext.len() != 32 {
            return Err(EnvelopeError::MalformedHeader("missing signature frame"));
        }
        let mut signature = [0u8; 32];
        signature.copy_from_slice(&plaintext);
        self.signature = Some(signature);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<(u8, Vec<u8>), EnvelopeError> {
        let mut prefix = [0u8; 5];
        self.reader.read_exact(&mut prefix).map_err(|error| {
            if error.kind() == io::ErrorKind::UnexpectedEof {
                EnvelopeError::Truncated
            } else {
                EnvelopeError::Io(error)
            }
        })?;
        let kind = prefix[0];
        let length = u32::from_le_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]);
        if (length as usize) < TAG_LEN || length as usize > CHUNK_SIZE + TAG_LEN {
            return Err(EnvelopeError::FrameLength {
                index: self.counter,
                length,
            });
        }

        let mut ciphertext = vec![0u8; length as usize];
        self.reader.read_exact(&mut ciphertext).map_err(|error| {
            if error.kind() == io::ErrorKind::UnexpectedEof {
                EnvelopeError::Truncated
            } else {
                EnvelopeError::Io(error)
            }
        })?;

        let nonce = frame_nonce(kind, self.counter);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: &self.header,
                },
            )
            .map_err(|_| EnvelopeError::FrameAuthentication {
                index: self.counter,
            })?;
        self.counter += 1;
        Ok((kind, plaintext))
    }
}

impl<R: Read> fmt::Debug for Opener<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the cipher or decrypted plaintext.
        f.debug_struct("Opener")
            .field("frames", &self.counter)
            .field("signed", &self.signed)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<R: Read> Read for Opener<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        while self.pos == self.buf.len() {
            if self.done {
                return Ok(0);
            }
            self.next_frame().map_err(EnvelopeError::into_io)?;
        }

        let available = &self.buf[self.pos..];
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}
