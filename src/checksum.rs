//! NMEA 0183 XOR checksum
//!
//! The checksum is the XOR of every byte between the `!`/`$` start delimiter
//! and the `*` that introduces the two hex digits. [`compute`] folds the bulk
//! of the input four bytes at a time; the result is bit-identical to the
//! byte-by-byte [`compute_naive`].

use crate::error::{DecodeError, Result};
use crate::sentence::Fragment;

/// Length of the `*XX` suffix that closes every sentence
pub const CHECKSUM_SUFFIX_LEN: usize = 3;

/// XOR all bytes of `bytes`, 32 bits at a time over the aligned middle
pub fn compute(bytes: &[u8]) -> u8 {
    let head_len = bytes.as_ptr().align_offset(4).min(bytes.len());
    let (head, rest) = bytes.split_at(head_len);

    let mut checksum = head.iter().fold(0u8, |acc, b| acc ^ b);

    let words = rest.chunks_exact(4);
    let tail = words.remainder();
    let wide = words.fold(0u32, |acc, w| {
        acc ^ u32::from_ne_bytes([w[0], w[1], w[2], w[3]])
    });
    checksum ^= wide.to_ne_bytes().iter().fold(0u8, |acc, b| acc ^ b);

    tail.iter().fold(checksum, |acc, b| acc ^ b)
}

/// Reference byte-at-a-time XOR
pub fn compute_naive(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// The part of a stored sentence covered by its checksum
///
/// Stored sentences have their start delimiter stripped and end with `*XX`.
pub fn checksummed_body(sentence: &[u8]) -> &[u8] {
    let end = sentence.len().saturating_sub(CHECKSUM_SUFFIX_LEN);
    &sentence[..end]
}

/// Validates fragments against the checksum they carry
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumValidator;

impl ChecksumValidator {
    /// Compute the checksum of the fragment's own sentence bytes
    pub fn checksum_of(fragment: &Fragment) -> u8 {
        compute(checksummed_body(fragment.sentence.as_bytes()))
    }

    /// Check the fragment, returning `false` on mismatch
    pub fn is_valid(fragment: &Fragment) -> bool {
        Self::checksum_of(fragment) == fragment.checksum
    }

    /// Check the fragment, returning the mismatch as an error
    pub fn validate(fragment: &Fragment) -> Result<()> {
        let computed = Self::checksum_of(fragment);
        if computed != fragment.checksum {
            return Err(DecodeError::ChecksumMismatch {
                expected: fragment.checksum,
                computed,
            });
        }
        Ok(())
    }
}
