//! Key material: 32-byte symmetric keys, their armored file format, and the
//! keyring used to locate the key an envelope is addressed to.

use std::fmt;
use std::fs;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::EnvelopeError;

const KEY_LEN: usize = 32;
const ARMOR_BEGIN: &str = "-----BEGIN SEALDIR KEY-----";
const ARMOR_END: &str = "-----END SEALDIR KEY-----";
const ARMOR_WIDTH: usize = 64;

/// A 32-byte symmetric key.
///
/// The same type serves as recipient key, keyring entry, and signing key;
/// what distinguishes them is where the caller got the key from. Key bytes
/// are zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EnvelopeKey {
    bytes: [u8; KEY_LEN],
}

impl EnvelopeKey {
    /// Generates a fresh random key from the operating system's RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Wraps existing key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Returns the key's public identifier.
    #[must_use]
    pub fn id(&self) -> KeyId {
        let hash = blake3::hash(&self.bytes);
        KeyId::from_slice(&hash.as_bytes()[..KeyId::LEN])
    }

    /// Renders the key in its armored file representation.
    #[must_use]
    pub fn armor(&self) -> String {
        let encoded = BASE64.encode(self.bytes);
        let mut out = String::with_capacity(encoded.len() + 64);
        out.push_str(ARMOR_BEGIN);
        out.push('\n');
        for line in encoded.as_bytes().chunks(ARMOR_WIDTH) {
            // Base64 output is always ASCII.
            out.push_str(std::str::from_utf8(line).unwrap_or_default());
            out.push('\n');
        }
        out.push_str(ARMOR_END);
        out.push('\n');
        out
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key bytes.
        f.debug_struct("EnvelopeKey").field("id", &self.id()).finish()
    }
}

/// Public identifier of an [`EnvelopeKey`]: the first eight bytes of the
/// BLAKE3 hash of the key bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId([u8; KeyId::LEN]);

impl KeyId {
    /// Length of a key identifier in bytes.
    pub const LEN: usize = 8;

    pub(crate) fn from_slice(slice: &[u8]) -> Self {
        let mut id = [0u8; Self::LEN];
        id.copy_from_slice(slice);
        Self(id)
    }

    /// Returns the identifier bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({self})")
    }
}

/// An ordered collection of keys, loaded from one or more armored key files.
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    keys: Vec<EnvelopeKey>,
}

impl Keyring {
    /// Loads every armored key block found in the file at `path`.
    pub fn load(path: &Path) -> Result<Self, EnvelopeError> {
        let text = fs::read_to_string(path).map_err(|source| EnvelopeError::KeyringRead {
            path: path.to_path_buf(),
            source,
        })?;
        let keys = parse_armored(&text).map_err(|reason| EnvelopeError::MalformedArmor {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(Self { keys })
    }

    /// Builds a keyring from keys already in memory.
    #[must_use]
    pub fn from_keys(keys: Vec<EnvelopeKey>) -> Self {
        Self { keys }
    }

    /// Looks a key up by identifier.
    #[must_use]
    pub fn find(&self, id: &KeyId) -> Option<&EnvelopeKey> {
        self.keys.iter().find(|key| key.id() == *id)
    }

    /// Returns the keys in load order.
    #[must_use]
    pub fn keys(&self) -> &[EnvelopeKey] {
        &self.keys
    }

    /// Number of keys in the ring.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the ring holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn parse_armored(text: &str) -> Result<Vec<EnvelopeKey>, &'static str> {
    let mut keys = Vec::new();
    let mut collecting: Option<String> = None;

    for line in text.lines() {
        let line = line.trim();
        let Some(body) = collecting.as_mut() else {
            if line == ARMOR_BEGIN {
                collecting = Some(String::new());
            }
            continue;
        };

        if line == ARMOR_END {
            let decoded = BASE64
                .decode(body.as_bytes())
                .map_err(|_| "key block is not valid base64")?;
            if decoded.len() != KEY_LEN {
                return Err("key block does not decode to 32 bytes");
            }
            let mut bytes = [0u8; KEY_LEN];
            bytes.copy_from_slice(&decoded);
            keys.push(EnvelopeKey::from_bytes(bytes));
            collecting = None;
        } else if line == ARMOR_BEGIN {
            return Err("nested key block");
        } else {
            body.push_str(line);
        }
    }

    if collecting.is_some() {
        return Err("unterminated key block");
    }
    if keys.is_empty() {
        return Err("no key blocks found");
    }
    Ok(keys)
}
