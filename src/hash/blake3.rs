//! BLAKE3-based content hashing.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::IoBuf;

/// BLAKE3 digest of a chain's bytes.
///
/// Comparison is constant time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentHash(blake3::Hash);

impl ContentHash {
    /// Digest length in bytes.
    pub const SIZE: usize = blake3::OUT_LEN;

    /// Wraps raw digest bytes, e.g. read back from storage.
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self(blake3::Hash::from_bytes(bytes))
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        self.0.as_bytes()
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        self.0.to_hex().as_str().to_owned()
    }

    /// Parses a 64-character hex string. `None` on malformed input.
    pub fn from_hex(hex: &str) -> Option<Self> {
        blake3::Hash::from_hex(hex).ok().map(Self)
    }

    /// Whether `chain` currently holds the bytes this digest was taken of.
    pub fn matches(&self, chain: &IoBuf) -> bool {
        chain.content_hash() == *self
    }
}

impl Hash for ContentHash {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(self.as_bytes());
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.to_hex().as_str())
    }
}

/// A hasher that computes BLAKE3 hashes over one or more chains.
#[derive(Debug, Clone)]
pub struct ContentHasher {
    state: blake3::Hasher,
}

impl ContentHasher {
    /// Creates a new hasher.
    pub fn new() -> Self {
        Self {
            state: blake3::Hasher::new(),
        }
    }

    /// Creates a hasher keyed with `key`.
    pub fn new_keyed(key: &[u8; 32]) -> Self {
        Self {
            state: blake3::Hasher::new_keyed(key),
        }
    }

    /// Updates the hasher with more data.
    pub fn update(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    /// Updates the hasher with every byte of `chain`, in order.
    pub fn update_chain(&mut self, chain: &IoBuf) {
        for span in chain.cursor() {
            self.state.update(span);
        }
    }

    /// Finalizes and returns the hash.
    pub fn finalize(&self) -> ContentHash {
        ContentHash(self.state.finalize())
    }

    /// Resets the hasher to its initial state.
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Hashes `data` in one shot.
    pub fn hash(data: &[u8]) -> ContentHash {
        ContentHash(blake3::hash(data))
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl IoBuf {
    /// BLAKE3 digest of the chain's bytes. Equal chains have equal digests
    /// regardless of segmentation.
    pub fn content_hash(&self) -> ContentHash {
        let mut hasher = ContentHasher::new();
        hasher.update_chain(self);
        hasher.finalize()
    }
}
