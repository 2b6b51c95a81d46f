#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `envelope` implements the encrypted message format moved through the
//! sealdir pipeline, together with the key material it is addressed to. An
//! envelope carries a random session key wrapped once per recipient, followed
//! by a stream of authenticated frames; reading and writing are both
//! streaming, so arbitrarily large files pass through in constant memory.
//!
//! # Wire format
//!
//! ```text
//! magic            8  "SEALDIR\x01"
//! flags            1  bit 0: a signature frame trails the data
//! recipient count  1  1..=255
//! per recipient:
//!   key id         8  BLAKE3(key)[..8]
//!   wrap nonce    12
//!   wrapped key   48  ChaCha20-Poly1305(recipient key, session key)
//! salt            16  HKDF-SHA256 salt for the frame key
//! frames:
//!   kind           1  0 data, 1 final data (may be empty), 2 signature
//!   length         4  u32 LE ciphertext length
//!   ciphertext     n
//! ```
//!
//! Each frame is sealed with the HKDF-derived frame key under a nonce of
//! `kind || frame counter (u64 LE) || 0^3` with the full header as associated
//! data, so frames cannot be reordered, truncated, or transplanted between
//! envelopes without failing authentication. The final-data frame terminates
//! the stream; a clean EOF before it is reported as truncation.
//!
//! The optional signature is a keyed-BLAKE3 MAC over the whole plaintext,
//! carried as the payload of a trailing signature frame. Reading never
//! requires verification; [`Opener::verify`] checks the MAC once the stream
//! has been drained.

mod error;
mod header;
mod keyring;
mod open;
mod seal;

pub use error::EnvelopeError;
pub use keyring::{EnvelopeKey, KeyId, Keyring};
pub use open::Opener;
pub use seal::Sealer;
