//! Core buffer types shared by every decode stage

use crate::error::{DecodeError, Result};

/// A non-owning `(start, len)` window into a byte buffer owned elsewhere
///
/// The span carries no borrow, so it survives moves of the record that owns
/// the bytes. Resolving it against a buffer is always bounds checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawSpan {
    start: usize,
    len: usize,
}

impl RawSpan {
    /// Create a span covering `len` bytes starting at `start`
    pub fn new(start: usize, len: usize) -> Self {
        RawSpan { start, len }
    }

    /// Offset of the first byte
    pub fn start(&self) -> usize {
        self.start
    }

    /// Number of bytes covered
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the span covers no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte, saturating at `usize::MAX`
    pub fn end(&self) -> usize {
        self.start.saturating_add(self.len)
    }

    /// Borrow the covered bytes from `buf`, or `None` if the span falls outside it
    pub fn resolve<'a>(&self, buf: &'a [u8]) -> Option<&'a [u8]> {
        let end = self.start.checked_add(self.len)?;
        buf.get(self.start..end)
    }
}

/// Fixed-capacity, inline byte string
///
/// Records in a batch are reused in place, so their text lives in arrays
/// rather than on the heap. Appends that would overflow are rejected whole.
#[derive(Clone, PartialEq, Eq)]
pub struct ByteString<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> ByteString<N> {
    /// Create an empty string
    pub const fn new() -> Self {
        ByteString { buf: [0; N], len: 0 }
    }

    /// Create a string holding a copy of `bytes`
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let mut s = Self::new();
        s.push_slice(bytes)?;
        Ok(s)
    }

    /// The stored bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Number of stored bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of bytes the string can hold
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes still available
    pub fn remaining(&self) -> usize {
        N - self.len
    }

    /// Forget the contents without touching the storage
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Append `bytes`, failing without modification if they do not fit
    pub fn push_slice(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.remaining() {
            return Err(DecodeError::invalid_length(format!(
                "{} bytes do not fit in {} remaining",
                bytes.len(),
                self.remaining()
            )));
        }
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    /// Append a single byte
    pub fn push(&mut self, byte: u8) -> Result<()> {
        self.push_slice(&[byte])
    }

    /// Replace the contents with `bytes`
    pub fn assign(&mut self, bytes: &[u8]) -> Result<()> {
        self.clear();
        self.push_slice(bytes)
    }
}

impl<const N: usize> Default for ByteString<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> AsRef<[u8]> for ByteString<N> {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl<const N: usize> std::fmt::Debug for ByteString<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl<const N: usize> std::fmt::Display for ByteString<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_resolve() {
        let buf = b"AIVDM,1,1";
        let span = RawSpan::new(6, 3);
        assert_eq!(span.resolve(buf), Some(&b"1,1"[..]));
        assert_eq!(span.end(), 9);
        assert!(RawSpan::new(8, 2).resolve(buf).is_none());
    }

    #[test]
    fn test_span_at_address_limit_does_not_resolve() {
        let span = RawSpan::new(usize::MAX, 1);
        assert_eq!(span.end(), usize::MAX);
        assert!(span.resolve(b"AIVDM").is_none());
    }

    #[test]
    fn test_span_default_is_empty() {
        let span = RawSpan::default();
        assert!(span.is_empty());
        assert_eq!(span.resolve(b""), Some(&b""[..]));
    }

    #[test]
    fn test_byte_string_push() -> Result<()> {
        let mut s = ByteString::<8>::new();
        s.push_slice(b"AIVDM")?;
        s.push(b',')?;
        assert_eq!(s.as_bytes(), b"AIVDM,");
        assert_eq!(s.remaining(), 2);
        Ok(())
    }

    #[test]
    fn test_byte_string_overflow_is_rejected_whole() {
        let mut s = ByteString::<4>::from_slice(b"ab").unwrap();
        assert!(s.push_slice(b"cde").is_err());
        assert_eq!(s.as_bytes(), b"ab");
    }

    #[test]
    fn test_byte_string_assign_and_clear() -> Result<()> {
        let mut s = ByteString::<16>::from_slice(b"first")?;
        s.assign(b"second")?;
        assert_eq!(s.to_string(), "second");
        s.clear();
        assert!(s.is_empty());
        Ok(())
    }
}
