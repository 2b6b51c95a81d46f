//! Streaming envelope writer.

use std::fmt;
use std::io::{self, Write};

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::error::EnvelopeError;
use crate::header::{self, CHUNK_SIZE, SALT_LEN, derive_frame_key, frame_kind, frame_nonce};
use crate::keyring::EnvelopeKey;

/// Seals a plaintext stream into an envelope addressed to one or more
/// recipients.
///
/// Bytes written through the [`Write`] impl are buffered into fixed-size
/// frames; [`Sealer::finish`] emits the final frame (and the signature frame
/// when a signing key was supplied) and must be called for the envelope to be
/// complete. Dropping a sealer without finishing produces a truncated
/// envelope that readers reject.
pub struct Sealer<W: Write> {
    writer: W,
    cipher: ChaCha20Poly1305,
    header: Vec<u8>,
    buf: Vec<u8>,
    counter: u64,
    signer: Option<blake3::Hasher>,
}

impl<W: Write> Sealer<W> {
    /// Starts an envelope on `writer`, writing the header immediately.
    ///
    /// Fails with [`EnvelopeError::NoRecipients`] on an empty recipient list
    /// and [`EnvelopeError::TooManyRecipients`] beyond 255 entries.
    pub fn new(
        mut writer: W,
        recipients: &[EnvelopeKey],
        signing_key: Option<&EnvelopeKey>,
    ) -> Result<Self, EnvelopeError> {
        let mut session_key = [0u8; 32];
        OsRng.fill_bytes(&mut session_key);
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut wrap_nonces = vec![[0u8; 12]; recipients.len()];
        for nonce in &mut wrap_nonces {
            OsRng.fill_bytes(nonce);
        }

        let header = header::encode(
            recipients,
            &session_key,
            &salt,
            &wrap_nonces,
            signing_key.is_some(),
        )?;
        writer.write_all(&header)?;

        let mut frame_key = derive_frame_key(&session_key, &salt);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&frame_key));
        session_key.zeroize();
        frame_key.zeroize();

        Ok(Self {
            writer,
            cipher,
            header,
            buf: Vec::with_capacity(CHUNK_SIZE),
            counter: 0,
            signer: signing_key.map(|key| blake3::Hasher::new_keyed(key.as_bytes())),
        })
    }

    /// Flushes the remaining plaintext as the final frame, appends the
    /// signature frame when signing, and returns the underlying writer.
    pub fn finish(mut self) -> Result<W, EnvelopeError> {
        let remainder = std::mem::take(&mut self.buf);
        self.emit_frame(frame_kind::FINAL, &remainder)?;

        if let Some(signer) = self.signer.take() {
            let tag = signer.finalize();
            self.emit_frame(frame_kind::SIGNATURE, tag.as_bytes())?;
        }

        self.writer.flush()?;
        Ok(self.writer)
    }

    fn emit_frame(&mut self, kind: u8, plaintext: &[u8]) -> Result<(), EnvelopeError> {
        let nonce = frame_nonce(kind, self.counter);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &self.header,
                },
            )
            .map_err(|_| EnvelopeError::FrameAuthentication {
                index: self.counter,
            })?;
        self.counter += 1;

        self.writer.write_all(&[kind])?;
        // Frames never exceed CHUNK_SIZE + TAG_LEN bytes of ciphertext.
        self.writer.write_all(&(ciphertext.len() as u32).to_le_bytes())?;
        self.writer.write_all(&ciphertext)?;
        Ok(())
    }

    fn drain_full_chunks(&mut self) -> Result<(), EnvelopeError> {
        while self.buf.len() >= CHUNK_SIZE {
            let rest = self.buf.split_off(CHUNK_SIZE);
            let chunk = std::mem::replace(&mut self.buf, rest);
            self.emit_frame(frame_kind::DATA, &chunk)?;
        }
        Ok(())
    }
}

impl<W: Write> fmt::Debug for Sealer<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the cipher or buffered plaintext.
        f.debug_struct("Sealer")
            .field("frames", &self.counter)
            .field("buffered", &self.buf.len())
            .field("signed", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

impl<W: Write> Write for Sealer<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if let Some(signer) = self.signer.as_mut() {
            signer.update(data);
        }
        self.buf.extend_from_slice(data);
        self.drain_full_chunks().map_err(EnvelopeError::into_io)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Partial frames stay buffered until finish(); only the sink flushes.
        self.writer.flush()
    }
}

