//! Content comparison: two chains are equal when their bytes are, however
//! the bytes are split into segments.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use crate::cursor::Cursor;

use super::IoBuf;

/// Hash input is fed in blocks of this size so the result does not depend
/// on segment boundaries.
const HASH_BLOCK: usize = 64;

fn compare_content(a: &IoBuf, b: &IoBuf) -> Ordering {
    let mut left = Cursor::new(a);
    let mut right = Cursor::new(b);
    loop {
        let l = left.peek();
        let r = right.peek();
        if l.is_empty() || r.is_empty() {
            // the exhausted side sorts first
            return (!l.is_empty()).cmp(&!r.is_empty());
        }
        let n = l.len().min(r.len());
        match l[..n].cmp(&r[..n]) {
            Ordering::Equal => {}
            other => return other,
        }
        // both sides just peeked at least n bytes
        left.skip_unchecked(n);
        right.skip_unchecked(n);
    }
}

impl PartialEq for IoBuf {
    fn eq(&self, other: &Self) -> bool {
        self.compute_chain_data_length() == other.compute_chain_data_length()
            && compare_content(self, other) == Ordering::Equal
    }
}

impl Eq for IoBuf {}

impl PartialOrd for IoBuf {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IoBuf {
    /// Lexicographic over the chain's bytes.
    fn cmp(&self, other: &Self) -> Ordering {
        compare_content(self, other)
    }
}

impl Hash for IoBuf {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut block = [0u8; HASH_BLOCK];
        let mut cursor = Cursor::new(self);
        let total = cursor.remaining();
        while cursor.remaining() >= HASH_BLOCK {
            cursor.pull_unchecked(&mut block);
            state.write(&block);
        }
        let tail = cursor.remaining();
        cursor.pull_unchecked(&mut block[..tail]);
        state.write(&block[..tail]);
        state.write_usize(total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn chain_of(parts: &[&[u8]]) -> IoBuf {
        let mut chain = IoBuf::copy_from_slice(parts[0]).unwrap();
        for part in &parts[1..] {
            chain.append_to_chain(IoBuf::copy_from_slice(part).unwrap());
        }
        chain
    }

    fn hash_of(buf: &IoBuf) -> u64 {
        let mut hasher = DefaultHasher::new();
        buf.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_equality_ignores_segmentation() {
        let a = chain_of(&[b"hello ", b"world"]);
        let b = chain_of(&[b"hel", b"", b"lo wor", b"ld"]);
        let c = IoBuf::copy_from_slice(b"hello world").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_ne!(a, chain_of(&[b"hello worle"]));
        assert_ne!(a, chain_of(&[b"hello"]));
    }

    #[test]
    fn test_ordering() {
        let short = chain_of(&[b"ab"]);
        let long = chain_of(&[b"a", b"bc"]);
        let bigger = chain_of(&[b"b"]);
        assert!(short < long);
        assert!(long < bigger);
        assert_eq!(short.cmp(&chain_of(&[b"a", b"b"])), Ordering::Equal);
        assert!(IoBuf::new() < short);
        assert_eq!(IoBuf::new().cmp(&IoBuf::create(8).unwrap()), Ordering::Equal);
    }

    #[test]
    fn test_hash_ignores_segmentation() {
        let data: Vec<u8> = (0..200u8).collect();
        let whole = IoBuf::copy_from_slice(&data).unwrap();
        let split = chain_of(&[&data[..7], &data[7..70], &data[70..]]);
        assert_eq!(hash_of(&whole), hash_of(&split));
        assert_ne!(hash_of(&whole), hash_of(&chain_of(&[&data[..199]])));
    }

    #[test]
    fn test_block_boundaries_and_empty_segments() {
        // exact multiples of the hash block, with empty nodes on the seams
        let data: Vec<u8> = (0..2 * HASH_BLOCK).map(|i| (i * 13) as u8).collect();
        let whole = IoBuf::copy_from_slice(&data).unwrap();
        let split = chain_of(&[
            &b""[..],
            &data[..HASH_BLOCK],
            &b""[..],
            &b""[..],
            &data[HASH_BLOCK..HASH_BLOCK + 1],
            &data[HASH_BLOCK + 1..],
            &b""[..],
        ]);
        assert_eq!(whole, split);
        assert_eq!(hash_of(&whole), hash_of(&split));

        let prefix = chain_of(&[&data[..HASH_BLOCK], &b""[..]]);
        assert!(prefix < split);
        assert!(split > prefix);
    }
}
