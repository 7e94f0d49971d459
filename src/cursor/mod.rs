//! Forward traversal over the bytes of a chain.
//!
//! A [`Cursor`] walks the data of every segment in order, one full pass
//! from the head, without copying. Empty segments are stepped over lazily.
//! It implements [`bytes::Buf`] and [`std::io::Read`], so a chain can feed
//! any consumer of those traits directly.
//!
//! # Example
//!
//! ```
//! use iobufrs::{Cursor, IoBuf};
//!
//! let mut chain = IoBuf::copy_from_slice(b"hello ")?;
//! chain.append_to_chain(IoBuf::copy_from_slice(b"world")?);
//!
//! let mut cursor = Cursor::new(&chain);
//! assert_eq!(cursor.peek(), b"hello ");
//! cursor.skip(4)?;
//!
//! let mut word = [0u8; 4];
//! cursor.pull(&mut word)?;
//! assert_eq!(&word, b"o wo");
//! assert_eq!(cursor.remaining(), 3);
//! # Ok::<(), iobufrs::IoBufError>(())
//! ```

use std::io::{self, IoSlice};
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::ptr::NonNull;

use bytes::Buf;

use crate::buf::{IoBuf, Node, Segment};
use crate::error::IoBufError;

/// A restartable read position within a chain.
#[derive(Clone)]
pub struct Cursor<'a> {
    head: NonNull<Node>,
    current: NonNull<Node>,
    offset: usize,
    remaining: usize,
    total: usize,
    _chain: PhantomData<&'a IoBuf>,
}

impl<'a> Cursor<'a> {
    /// Positions a cursor at the first byte of `buf`.
    pub fn new(buf: &'a IoBuf) -> Self {
        let total = buf.compute_chain_data_length();
        Self {
            head: buf.head_ptr(),
            current: buf.head_ptr(),
            offset: 0,
            remaining: total,
            total,
            _chain: PhantomData,
        }
    }

    fn segment(node: NonNull<Node>) -> &'a Segment {
        // SAFETY: the chain is borrowed for 'a, so its nodes are live.
        unsafe { &(*node.as_ptr()).seg }
    }

    fn next_node(node: NonNull<Node>) -> NonNull<Node> {
        // SAFETY: as in `segment`.
        unsafe { node.as_ref() }.next
    }

    /// The contiguous bytes at the current position, up to the end of the
    /// current segment. Empty at the end of the chain.
    pub fn peek(&self) -> &'a [u8] {
        if self.remaining == 0 {
            return &[];
        }
        let mut node = self.current;
        let mut offset = self.offset;
        loop {
            let data = Self::segment(node).data();
            if offset < data.len() {
                return &data[offset..];
            }
            node = Self::next_node(node);
            offset = 0;
        }
    }

    /// Moves forward `n` bytes.
    ///
    /// # Errors
    ///
    /// [`IoBufError::OutOfBounds`] when fewer than `n` bytes remain; the
    /// position is unchanged.
    pub fn skip(&mut self, n: usize) -> Result<(), IoBufError> {
        IoBufError::check_bounds("skip", n, self.remaining)?;
        self.skip_unchecked(n);
        Ok(())
    }

    /// Moves past `n` bytes the caller knows are there.
    pub(crate) fn skip_unchecked(&mut self, mut n: usize) {
        debug_assert!(n <= self.remaining);
        while n > 0 {
            let available = Self::segment(self.current).length() - self.offset;
            if available == 0 {
                self.current = Self::next_node(self.current);
                self.offset = 0;
                continue;
            }
            let step = n.min(available);
            self.offset += step;
            self.remaining -= step;
            n -= step;
        }
    }

    /// Copies the next `dst.len()` bytes into `dst` and moves past them.
    ///
    /// # Errors
    ///
    /// [`IoBufError::OutOfBounds`] when fewer bytes remain; nothing is
    /// consumed.
    pub fn pull(&mut self, dst: &mut [u8]) -> Result<(), IoBufError> {
        IoBufError::check_bounds("pull", dst.len(), self.remaining)?;
        self.pull_unchecked(dst);
        Ok(())
    }

    /// Fills `dst` from bytes the caller knows are there.
    pub(crate) fn pull_unchecked(&mut self, dst: &mut [u8]) {
        debug_assert!(dst.len() <= self.remaining);
        let mut filled = 0;
        while filled < dst.len() {
            let span = self.peek();
            let step = span.len().min(dst.len() - filled);
            dst[filled..filled + step].copy_from_slice(&span[..step]);
            self.skip_unchecked(step);
            filled += step;
        }
    }

    /// Returns the next non-empty span and moves past it.
    pub fn next_span(&mut self) -> Option<&'a [u8]> {
        let span = self.peek();
        if span.is_empty() {
            return None;
        }
        self.skip_unchecked(span.len());
        Some(span)
    }

    /// Bytes left until the end of the chain.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Bytes consumed since the start of the chain.
    pub fn position(&self) -> usize {
        self.total - self.remaining
    }

    /// Whether every byte has been consumed.
    pub fn is_at_end(&self) -> bool {
        self.remaining == 0
    }

    /// Returns to the first byte of the chain.
    pub fn reset(&mut self) {
        self.current = self.head;
        self.offset = 0;
        self.remaining = self.total;
    }
}

impl<'a> IntoIterator for Cursor<'a> {
    type Item = &'a [u8];
    type IntoIter = Spans<'a>;

    fn into_iter(self) -> Spans<'a> {
        Spans { cursor: self }
    }
}

/// Iterator over the non-empty spans left in a [`Cursor`].
#[derive(Clone)]
pub struct Spans<'a> {
    cursor: Cursor<'a>,
}

impl<'a> Iterator for Spans<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        self.cursor.next_span()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.cursor.remaining();
        (usize::from(remaining > 0), Some(remaining))
    }
}

impl FusedIterator for Spans<'_> {}

impl Buf for Cursor<'_> {
    fn remaining(&self) -> usize {
        self.remaining
    }

    fn chunk(&self) -> &[u8] {
        self.peek()
    }

    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= self.remaining,
            "cannot advance past the end of the chain: {cnt} > {}",
            self.remaining
        );
        self.skip_unchecked(cnt);
    }

    fn chunks_vectored<'b>(&'b self, dst: &mut [IoSlice<'b>]) -> usize {
        let mut probe = self.clone();
        let mut filled = 0;
        while filled < dst.len() {
            match probe.next_span() {
                Some(span) => {
                    dst[filled] = IoSlice::new(span);
                    filled += 1;
                }
                None => break,
            }
        }
        filled
    }
}

impl io::Read for Cursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining);
        if n == 0 {
            return Ok(0);
        }
        let span = self.peek();
        if span.len() >= n {
            buf[..n].copy_from_slice(&span[..n]);
            self.skip_unchecked(n);
            return Ok(n);
        }
        self.pull(&mut buf[..n])
            .map_err(|e| io::Error::new(io::ErrorKind::UnexpectedEof, e))?;
        Ok(n)
    }
}

impl IoBuf {
    /// A cursor at the first byte of the chain.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn sample() -> IoBuf {
        let mut chain = IoBuf::copy_from_slice(b"ab").unwrap();
        chain.append_to_chain(IoBuf::create(16).unwrap());
        chain.append_to_chain(IoBuf::copy_from_slice(b"cde").unwrap());
        chain.append_to_chain(IoBuf::new());
        chain.append_to_chain(IoBuf::copy_from_slice(b"f").unwrap());
        chain
    }

    #[test]
    fn test_peek_skips_empty_segments() {
        let chain = sample();
        let mut cursor = chain.cursor();
        assert_eq!(cursor.peek(), b"ab");
        cursor.skip(2).unwrap();
        assert_eq!(cursor.peek(), b"cde");
        cursor.skip(3).unwrap();
        assert_eq!(cursor.peek(), b"f");
        cursor.skip(1).unwrap();
        assert!(cursor.peek().is_empty());
        assert!(cursor.is_at_end());
    }

    #[test]
    fn test_skip_bounds() {
        let chain = sample();
        let mut cursor = chain.cursor();
        cursor.skip(4).unwrap();
        assert_eq!(cursor.position(), 4);
        assert!(matches!(
            cursor.skip(3),
            Err(IoBufError::OutOfBounds {
                op: "skip",
                requested: 3,
                available: 2
            })
        ));
        assert_eq!(cursor.position(), 4);
        assert_eq!(cursor.peek(), b"e");
    }

    #[test]
    fn test_spans_and_reset() {
        let chain = sample();
        let mut cursor = chain.cursor();
        let mut spans = Vec::new();
        while let Some(span) = cursor.next_span() {
            spans.push(span);
        }
        assert_eq!(spans, vec![&b"ab"[..], b"cde", b"f"]);

        cursor.reset();
        assert_eq!(cursor.remaining(), 6);
        assert_eq!(cursor.peek(), b"ab");

        cursor.skip(3).unwrap();
        let rest: Vec<&[u8]> = cursor.into_iter().collect();
        assert_eq!(rest, vec![&b"de"[..], b"f"]);
    }

    #[test]
    fn test_pull_across_segments() {
        let chain = sample();
        let mut cursor = chain.cursor();
        let mut out = [0u8; 5];
        cursor.pull(&mut out).unwrap();
        assert_eq!(&out, b"abcde");

        let mut too_long = [0u8; 2];
        assert!(cursor.pull(&mut too_long).is_err());
        assert_eq!(cursor.remaining(), 1);
    }

    #[test]
    fn test_buf_impl() {
        let chain = sample();
        let mut cursor = chain.cursor();
        assert_eq!(Buf::remaining(&cursor), 6);
        assert_eq!(cursor.get_u8(), b'a');
        assert_eq!(cursor.get_u16(), u16::from_be_bytes([b'b', b'c']));

        let mut slices = [IoSlice::new(&[]); 4];
        assert_eq!(cursor.chunks_vectored(&mut slices), 2);
        assert_eq!(&*slices[0], b"de");
        assert_eq!(&*slices[1], b"f");
        assert_eq!(cursor.copy_to_bytes(3).as_ref(), b"def");
    }

    #[test]
    fn test_read_impl() {
        let chain = sample();
        let mut out = Vec::new();
        chain.cursor().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcdef");
    }

    #[test]
    fn test_empty_chain() {
        let buf = IoBuf::new();
        let mut cursor = buf.cursor();
        assert!(cursor.peek().is_empty());
        assert!(cursor.next_span().is_none());
        assert!(cursor.skip(0).is_ok());
        assert!(cursor.skip(1).is_err());
    }
}
