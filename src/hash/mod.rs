//! Content digests for buffer chains.
//!
//! This module provides cryptographic hashing of a chain's logical content,
//! independent of how the bytes are split into segments. Currently supports
//! BLAKE3 via the `hash-blake3` feature.
//!
//! - [`ContentHash`] - 32-byte digest of a chain's bytes
//! - [`ContentHasher`] - incremental hasher fed span by span

#[cfg(feature = "hash-blake3")]
mod blake3;

#[cfg(feature = "hash-blake3")]
pub use self::blake3::{ContentHash, ContentHasher};
